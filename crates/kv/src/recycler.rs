use common::{DbResult, PageId};
use freelist::FreeList;
use storage::{Page, PageBuf, PageStore};
use tracing::trace;

/// Page source that allocates from the free list before growing the store,
/// and queues retired pages instead of dropping them.
pub struct Recycler<'a, S: PageStore + ?Sized> {
    store: &'a mut S,
    free: &'a mut FreeList,
}

impl<'a, S: PageStore + ?Sized> Recycler<'a, S> {
    pub fn new(store: &'a mut S, free: &'a mut FreeList) -> Self {
        Self { store, free }
    }
}

impl<S: PageStore + ?Sized> PageStore for Recycler<'_, S> {
    fn get(&self, id: PageId) -> DbResult<Page> {
        self.store.get(id)
    }

    fn new_page(&mut self, buf: PageBuf) -> DbResult<PageId> {
        match self.free.pop_head(&mut *self.store)? {
            Some(id) => {
                self.store.replace(id, buf)?;
                trace!(page = id.0, "recycler.reuse");
                Ok(id)
            }
            None => self.store.new_page(buf),
        }
    }

    fn del(&mut self, id: PageId) -> DbResult<()> {
        self.free.push_tail(&mut *self.store, id)
    }

    fn write(&mut self, id: PageId) -> DbResult<&mut [u8]> {
        self.store.write(id)
    }

    fn replace(&mut self, id: PageId, buf: PageBuf) -> DbResult<()> {
        self.store.replace(id, buf)
    }
}
