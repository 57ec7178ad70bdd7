//! FIFO queue of reclaimed page ids, stored in a chain of list pages.
//!
//! Each list page holds a `next` pointer followed by [`FREE_LIST_CAP`] ids:
//!
//! ```text
//! | next u64 | id u64 | id u64 | ... |
//! ```
//!
//! Positions are monotonically increasing sequence numbers; `seq % CAP` is
//! the slot within the current page. Ids pushed after the last
//! [`FreeList::set_max_seq`] are held back from [`FreeList::pop_head`].
//!
//! The list allocates its own pages through the store it tracks: growing the
//! tail may consume a queued id, and an exhausted head page is queued for
//! reuse. Both directions are single bounded steps. A pop nested inside a
//! push hands its exhausted page straight to the new tail slot instead of
//! pushing again, so push and pop never recurse into each other more than
//! once.


use common::{DbError, DbResult, PageId};
use serde::{Deserialize, Serialize};
use storage::{PAGE_SIZE, PageBuf, PageStore};
use tracing::{debug, trace};

pub const FREE_LIST_HEADER: usize = 8;

/// Ids per list page.
pub const FREE_LIST_CAP: usize = (PAGE_SIZE - FREE_LIST_HEADER) / 8;

fn slot(seq: u64) -> usize {
    (seq % FREE_LIST_CAP as u64) as usize
}

fn read_next(page: &[u8]) -> PageId {
    PageId(read_u64(page, 0))
}

fn read_ptr(page: &[u8], idx: usize) -> PageId {
    PageId(read_u64(page, FREE_LIST_HEADER + idx * 8))
}

fn write_next(page: &mut [u8], next: PageId) {
    page[0..8].copy_from_slice(&next.0.to_le_bytes());
}

fn write_ptr(page: &mut [u8], idx: usize, id: PageId) {
    let pos = FREE_LIST_HEADER + idx * 8;
    page[pos..pos + 8].copy_from_slice(&id.0.to_le_bytes());
}

fn read_u64(page: &[u8], pos: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&page[pos..pos + 8]);
    u64::from_le_bytes(raw)
}

/// Everything needed to reattach to a persisted free list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeListState {
    pub head_page: PageId,
    pub head_seq: u64,
    pub tail_page: PageId,
    pub tail_seq: u64,
    pub max_seq: u64,
}

#[derive(Debug)]
pub struct FreeList {
    state: FreeListState,
}

impl FreeList {
    /// Creates an empty list, allocating its first page from `store`.
    pub fn new<S: PageStore + ?Sized>(store: &mut S) -> DbResult<Self> {
        let first = store.new_page(PageBuf::zeroed())?;
        Ok(Self::starting_at(first))
    }

    /// Creates an empty list whose first page is `page`, an allocated id
    /// nothing else references.
    pub fn on_page<S: PageStore + ?Sized>(store: &mut S, page: PageId) -> DbResult<Self> {
        store.replace(page, PageBuf::zeroed())?;
        Ok(Self::starting_at(page))
    }

    fn starting_at(first: PageId) -> Self {
        Self {
            state: FreeListState {
                head_page: first,
                tail_page: first,
                ..FreeListState::default()
            },
        }
    }

    pub fn from_state(state: FreeListState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> FreeListState {
        self.state
    }

    /// Number of queued ids, including ones held back by the watermark.
    pub fn len(&self) -> u64 {
        self.state.tail_seq - self.state.head_seq
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ids `pop_head` can return right now.
    pub fn available(&self) -> u64 {
        self.state.max_seq - self.state.head_seq
    }

    /// Makes every id pushed so far eligible for reuse.
    pub fn set_max_seq(&mut self) {
        trace!(
            from = self.state.max_seq,
            to = self.state.tail_seq,
            "freelist.watermark"
        );
        self.state.max_seq = self.state.tail_seq;
    }

    /// Every queued id in FIFO order, including ones held back by the
    /// watermark.
    pub fn queued<S: PageStore + ?Sized>(&self, store: &S) -> DbResult<Vec<PageId>> {
        let mut ids = Vec::with_capacity(self.len() as usize);
        let mut page_id = self.state.head_page;
        let mut page = store.get(page_id)?;
        for seq in self.state.head_seq..self.state.tail_seq {
            if seq != self.state.head_seq && slot(seq) == 0 {
                page_id = self.next_list_page(&page, page_id)?;
                page = store.get(page_id)?;
            }
            ids.push(read_ptr(&page, slot(seq)));
        }
        Ok(ids)
    }

    /// The list's own pages, head to tail.
    pub fn list_pages<S: PageStore + ?Sized>(&self, store: &S) -> DbResult<Vec<PageId>> {
        let mut pages = vec![self.state.head_page];
        let mut current = self.state.head_page;
        while current != self.state.tail_page {
            // a chain longer than the queue can fill has lost its tail
            if pages.len() as u64 > self.len() / FREE_LIST_CAP as u64 + 1 {
                return Err(DbError::Corruption(format!(
                    "free list chain from page {} never reaches tail page {}",
                    self.state.head_page, self.state.tail_page
                )));
            }
            current = self.next_list_page(&store.get(current)?, current)?;
            pages.push(current);
        }
        Ok(pages)
    }

    fn next_list_page(&self, page: &[u8], id: PageId) -> DbResult<PageId> {
        let next = read_next(page);
        if next.is_none() {
            return Err(DbError::Corruption(format!(
                "free list page {id} ends the chain before tail page {}",
                self.state.tail_page
            )));
        }
        Ok(next)
    }

    /// Takes the oldest reusable id, or `None` when nothing is eligible.
    pub fn pop_head<S: PageStore + ?Sized>(&mut self, store: &mut S) -> DbResult<Option<PageId>> {
        let Some((id, exhausted)) = self.pop(store)? else {
            return Ok(None);
        };
        if let Some(page) = exhausted {
            self.push_tail(store, page)?;
        }
        Ok(Some(id))
    }

    /// Queues `id` for reuse once the watermark passes it.
    pub fn push_tail<S: PageStore + ?Sized>(&mut self, store: &mut S, id: PageId) -> DbResult<()> {
        write_ptr(store.write(self.state.tail_page)?, slot(self.state.tail_seq), id);
        self.state.tail_seq += 1;
        if slot(self.state.tail_seq) != 0 {
            return Ok(());
        }

        // The tail page is full: link a new one, reusing a queued id if possible.
        let (next, exhausted) = match self.pop(store)? {
            Some((reused, exhausted)) => (reused, exhausted),
            None => (store.new_page(PageBuf::zeroed())?, None),
        };
        write_next(store.write(self.state.tail_page)?, next);
        self.state.tail_page = next;
        write_next(store.write(next)?, PageId::NONE);
        if let Some(page) = exhausted {
            write_ptr(store.write(next)?, 0, page);
            self.state.tail_seq += 1;
        }
        debug!(
            tail_page = next.0,
            recycled_head = ?exhausted,
            "freelist.grow"
        );
        Ok(())
    }

    /// Reads the head slot. Also returns the head page if it was just used up.
    fn pop<S: PageStore + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> DbResult<Option<(PageId, Option<PageId>)>> {
        if self.state.head_seq == self.state.max_seq {
            return Ok(None);
        }
        let head = store.get(self.state.head_page)?;
        let id = read_ptr(&head, slot(self.state.head_seq));
        self.state.head_seq += 1;

        let mut exhausted = None;
        if slot(self.state.head_seq) == 0 {
            exhausted = Some(self.state.head_page);
            self.state.head_page = read_next(&head);
            trace!(
                head_page = self.state.head_page.0,
                "freelist.head_page_exhausted"
            );
        }
        Ok(Some((id, exhausted)))
    }
}
