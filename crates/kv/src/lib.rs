//! In-memory key/value store: a copy-on-write B+Tree whose retired pages are
//! recycled through a free list.
//!
//! `Kv` serializes writers behind a single lock; readers share it.
//!
//! ```
//! use common::Config;
//! use kv::Kv;
//!
//! let kv = Kv::new(Config::default()).unwrap();
//! kv.set(b"a", b"1").unwrap();
//! assert_eq!(kv.get(b"a").unwrap().as_deref(), Some(&b"1"[..]));
//! assert!(kv.del(b"a").unwrap());
//! ```

mod recycler;


use btree::BTree;
use bytes::Bytes;
use common::{Config, DbError, DbResult, PageId, WatermarkPolicy};
use freelist::FreeList;
use hashbrown::HashSet;
use parking_lot::RwLock;
use storage::{MemPages, Meta, PageBuf, PageStore};
use tracing::{debug, info};

pub use recycler::Recycler;

struct Inner {
    store: MemPages,
    tree: BTree,
    free: Option<FreeList>,
    saved: Option<SavePoint>,
}

/// The last saved root and how far the free list's tail had got at the time.
/// Ids queued from `tail_seq` on were retired after the save.
#[derive(Clone, Copy, Debug)]
struct SavePoint {
    root: PageId,
    tail_seq: u64,
}

impl Inner {
    /// Runs a tree mutation against the page source selected by the config.
    fn mutate<R>(
        &mut self,
        f: impl FnOnce(&mut BTree, &mut dyn PageStore) -> DbResult<R>,
    ) -> DbResult<R> {
        match self.free.as_mut() {
            Some(free) => {
                let mut recycler = Recycler::new(&mut self.store, free);
                f(&mut self.tree, &mut recycler)
            }
            None => f(&mut self.tree, &mut self.store),
        }
    }
}

pub struct Kv {
    config: Config,
    inner: RwLock<Inner>,
}

impl Kv {
    pub fn new(config: Config) -> DbResult<Self> {
        let mut store = MemPages::new();
        let free = if config.recycle_pages {
            Some(FreeList::new(&mut store)?)
        } else {
            None
        };
        info!(
            recycle_pages = config.recycle_pages,
            watermark = ?config.watermark,
            "kv.open"
        );
        Ok(Self {
            config,
            inner: RwLock::new(Inner {
                store,
                tree: BTree::new(),
                free,
                saved: None,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn get(&self, key: &[u8]) -> DbResult<Option<Bytes>> {
        let inner = self.inner.read();
        inner.tree.get(&inner.store, key)
    }

    /// Inserts or overwrites `key`.
    pub fn set(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        let mut inner = self.inner.write();
        inner.mutate(|tree, store| tree.insert(store, key, value))?;
        self.after_write(&mut inner);
        Ok(())
    }

    /// Removes `key`, returning whether it was present.
    pub fn del(&self, key: &[u8]) -> DbResult<bool> {
        let mut inner = self.inner.write();
        let found = inner.mutate(|tree, store| tree.delete(store, key))?;
        if found {
            self.after_write(&mut inner);
        }
        Ok(found)
    }

    /// Makes every page retired so far eligible for reuse.
    pub fn commit_watermark(&self) {
        if let Some(free) = self.inner.write().free.as_mut() {
            free.set_max_seq();
        }
    }

    fn after_write(&self, inner: &mut Inner) {
        if self.config.watermark != WatermarkPolicy::PerWrite {
            return;
        }
        if let Some(free) = inner.free.as_mut() {
            free.set_max_seq();
        }
    }

    /// Encodes the current root and page count as a meta page, and remembers
    /// the root so a later [`Kv::load_meta`] can return to it.
    pub fn save_meta(&self) -> PageBuf {
        let mut inner = self.inner.write();
        let meta = Meta {
            root: inner.tree.root(),
            flushed: inner.store.next_id().0,
        };
        inner.saved = Some(SavePoint {
            root: meta.root,
            tail_seq: inner.free.as_ref().map_or(0, |free| free.state().tail_seq),
        });
        debug!(root = meta.root.0, flushed = meta.flushed, "kv.meta.save");
        meta.encode()
    }

    /// Points the tree back at the root recorded in `data`.
    ///
    /// Pages only the abandoned tree used are retired. With recycling on, the
    /// free list is rebuilt from those pages plus everything it held, minus the
    /// pages of the restored tree, and all of it becomes reusable at once.
    ///
    /// Fails with [`DbError::Meta`] when the saved tree can no longer be
    /// trusted: without recycling, when one of its pages was dropped; with
    /// recycling, when `data` is not from the latest [`Kv::save_meta`] or a
    /// page retired since that save has been reused. Under
    /// [`WatermarkPolicy::Manual`] nothing is reused until
    /// [`Kv::commit_watermark`], so a save stays restorable until then.
    pub fn load_meta(&self, data: &[u8]) -> DbResult<()> {
        let meta = Meta::decode(data)?;
        let mut inner = self.inner.write();
        let Inner {
            store,
            tree,
            free,
            saved,
        } = &mut *inner;
        if meta.root.0 >= store.next_id().0 {
            return Err(DbError::Meta(format!(
                "root {} was never allocated by this store",
                meta.root
            )));
        }
        if meta.root == tree.root() {
            debug!(root = meta.root.0, "kv.meta.load_unchanged");
            return Ok(());
        }
        if let Some(list) = free.as_ref() {
            let intact = saved.is_some_and(|point| {
                point.root == meta.root && list.state().head_seq <= point.tail_seq
            });
            if !intact {
                return Err(DbError::Meta(format!(
                    "pages of the tree saved at root {} may have been reused",
                    meta.root
                )));
            }
        }

        let restored = BTree::with_root(meta.root);
        let keep: HashSet<PageId> = restored
            .pages(&*store)
            .map_err(|e| {
                DbError::Meta(format!("tree saved at root {} is gone: {e}", meta.root))
            })?
            .into_iter()
            .collect();
        let mut retired = tree.pages(&*store)?;
        if let Some(list) = free.as_ref() {
            retired.extend(list.queued(&*store)?);
            retired.extend(list.list_pages(&*store)?);
        }
        retired.retain(|id| !keep.contains(id));
        retired.sort_unstable();
        retired.dedup();

        let count = retired.len();
        match free.as_mut() {
            Some(list) => {
                let mut ids = retired.into_iter();
                let mut rebuilt = match ids.next() {
                    Some(first) => FreeList::on_page(&mut *store, first)?,
                    None => FreeList::new(&mut *store)?,
                };
                for id in ids {
                    rebuilt.push_tail(&mut *store, id)?;
                }
                rebuilt.set_max_seq();
                *saved = Some(SavePoint {
                    root: meta.root,
                    tail_seq: rebuilt.state().tail_seq,
                });
                *list = rebuilt;
            }
            None => {
                for id in retired {
                    store.del(id)?;
                }
            }
        }
        *tree = restored;
        info!(
            root = meta.root.0,
            flushed = meta.flushed,
            retired = count,
            "kv.meta.load"
        );
        Ok(())
    }

    pub fn root(&self) -> PageId {
        self.inner.read().tree.root()
    }

    pub fn height(&self) -> DbResult<usize> {
        let inner = self.inner.read();
        inner.tree.height(&inner.store)
    }

    /// Pages live in the backing store, including queued and free-list pages.
    pub fn pages_allocated(&self) -> usize {
        self.inner.read().store.pages_allocated()
    }

    /// Ids waiting on the free list, eligible or not.
    pub fn free_pages(&self) -> u64 {
        self.inner.read().free.as_ref().map_or(0, FreeList::len)
    }

    /// Runs `f` with read access to the tree and its pages.
    pub fn inspect<R>(&self, f: impl FnOnce(&BTree, &MemPages) -> R) -> R {
        let inner = self.inner.read();
        f(&inner.tree, &inner.store)
    }
}
