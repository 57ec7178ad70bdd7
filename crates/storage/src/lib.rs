//! Fixed-size pages and the stores that hold them.
//!
//! The tree and the free list never own bytes directly. They go through a
//! [`PageStore`], which hands out two distinct kinds of buffer:
//!
//! - [`Page`]: a published, read-only page returned by [`PageStore::get`].
//! - [`PageBuf`]: an owned, mutable page under construction, consumed by
//!   [`PageStore::new_page`].
//!
//! Only the free list mutates pages in place, through [`PageStore::write`].
//! A recycled id gets new content through [`PageStore::replace`].

pub mod meta;


use std::ops::{Deref, DerefMut, Range};

use bytes::{Bytes, BytesMut};
use common::{DbError, DbResult, PageId};
use hashbrown::HashMap;
use tracing::trace;

pub use meta::{META_SIGNATURE, Meta};

pub const PAGE_SIZE: usize = 4096;

/// A published page. Cloning is cheap and never copies the bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page(Bytes);

impl Page {
    pub fn zeroed() -> Self {
        Self(Bytes::from(vec![0u8; PAGE_SIZE]))
    }

    /// Zero-copy view of a sub-range, usable after the page handle is dropped.
    pub fn slice(&self, range: Range<usize>) -> Bytes {
        self.0.slice(range)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Page {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// An owned page being built. Exactly [`PAGE_SIZE`] bytes long.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageBuf(BytesMut);

impl PageBuf {
    pub fn zeroed() -> Self {
        Self(BytesMut::zeroed(PAGE_SIZE))
    }

    /// Copies `src` into a fresh page, zero-padding the tail.
    pub fn from_slice(src: &[u8]) -> DbResult<Self> {
        if src.len() > PAGE_SIZE {
            return Err(DbError::Storage(format!(
                "buffer of {} bytes does not fit a {PAGE_SIZE}-byte page",
                src.len()
            )));
        }
        let mut buf = Self::zeroed();
        buf.0[..src.len()].copy_from_slice(src);
        Ok(buf)
    }

    pub fn freeze(self) -> Page {
        Page(self.0.freeze())
    }
}

impl Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for PageBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Abstraction for reading, allocating, retiring, and patching pages.
///
/// Implementations are not required to be thread-safe; callers serialize
/// writers externally.
pub trait PageStore {
    /// Returns the current content of a live page.
    fn get(&self, id: PageId) -> DbResult<Page>;

    /// Stores `buf` under a fresh id.
    fn new_page(&mut self, buf: PageBuf) -> DbResult<PageId>;

    /// Retires `id`. The caller must not dereference it again.
    fn del(&mut self, id: PageId) -> DbResult<()>;

    /// Mutable access to an existing page, zero-initialising it if absent.
    fn write(&mut self, id: PageId) -> DbResult<&mut [u8]>;

    /// Publishes `buf` under an id that is already allocated.
    fn replace(&mut self, id: PageId, buf: PageBuf) -> DbResult<()> {
        self.write(id)?.copy_from_slice(&buf);
        Ok(())
    }
}

impl<S: PageStore + ?Sized> PageStore for &mut S {
    fn get(&self, id: PageId) -> DbResult<Page> {
        (**self).get(id)
    }

    fn new_page(&mut self, buf: PageBuf) -> DbResult<PageId> {
        (**self).new_page(buf)
    }

    fn del(&mut self, id: PageId) -> DbResult<()> {
        (**self).del(id)
    }

    fn write(&mut self, id: PageId) -> DbResult<&mut [u8]> {
        (**self).write(id)
    }

    fn replace(&mut self, id: PageId, buf: PageBuf) -> DbResult<()> {
        (**self).replace(id, buf)
    }
}

/// In-memory page store with monotonically increasing ids starting at 1.
///
/// Published pages are kept frozen and shared with every reader. A page
/// patched through [`PageStore::write`] moves to a mutable copy, and reads of
/// it copy until it is published again.
#[derive(Debug)]
pub struct MemPages {
    published: HashMap<PageId, Bytes>,
    dirty: HashMap<PageId, BytesMut>,
    next: u64,
}

impl Default for MemPages {
    fn default() -> Self {
        Self::new()
    }
}

impl MemPages {
    pub fn new() -> Self {
        Self {
            published: HashMap::new(),
            dirty: HashMap::new(),
            next: 1,
        }
    }

    /// Number of pages currently live in the store.
    pub fn pages_allocated(&self) -> usize {
        self.published.len() + self.dirty.len()
    }

    /// The id the next allocation will receive.
    pub fn next_id(&self) -> PageId {
        PageId(self.next)
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.published.contains_key(&id) || self.dirty.contains_key(&id)
    }

    fn publish(&mut self, id: PageId, buf: PageBuf) {
        self.dirty.remove(&id);
        self.published.insert(id, buf.0.freeze());
    }
}

impl PageStore for MemPages {
    fn get(&self, id: PageId) -> DbResult<Page> {
        if let Some(bytes) = self.published.get(&id) {
            return Ok(Page(bytes.clone()));
        }
        match self.dirty.get(&id) {
            Some(buf) => Ok(Page(Bytes::copy_from_slice(buf))),
            None => Ok(Page::zeroed()),
        }
    }

    fn new_page(&mut self, buf: PageBuf) -> DbResult<PageId> {
        let id = PageId(self.next);
        self.next += 1;
        self.publish(id, buf);
        trace!(page = id.0, "mem_pages.new");
        Ok(id)
    }

    fn del(&mut self, id: PageId) -> DbResult<()> {
        self.published.remove(&id);
        self.dirty.remove(&id);
        trace!(page = id.0, "mem_pages.del");
        Ok(())
    }

    fn write(&mut self, id: PageId) -> DbResult<&mut [u8]> {
        if id.is_none() {
            return Err(DbError::Storage("cannot write the reserved page 0".into()));
        }
        if let Some(bytes) = self.published.remove(&id) {
            self.dirty.insert(id, BytesMut::from(&bytes[..]));
        }
        let page = self
            .dirty
            .entry(id)
            .or_insert_with(|| BytesMut::zeroed(PAGE_SIZE));
        Ok(&mut page[..])
    }

    fn replace(&mut self, id: PageId, buf: PageBuf) -> DbResult<()> {
        if id.is_none() || id.0 >= self.next {
            return Err(DbError::Storage(format!("cannot replace unallocated page {id}")));
        }
        trace!(page = id.0, "mem_pages.replace");
        self.publish(id, buf);
        Ok(())
    }
}
