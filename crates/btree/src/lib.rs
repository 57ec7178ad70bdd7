//! Copy-on-write B+Tree over fixed-size pages.
//!
//! Every update rebuilds the root-to-leaf path into fresh pages and retires
//! the pages it replaced; a published page is never modified. Nodes are
//! encoded by [`node`] and kept within one page by the 3-way split in
//! `split`.
//!
//! Internal nodes store, for each child, the first key of that child's
//! subtree. The first insert into an empty tree writes an empty-key sentinel,
//! so every floor lookup on the root chain lands on a valid child.
//!
//! Descent is recursive; the depth is bounded by the tree height, which grows
//! logarithmically with the number of entries.
//!
//! # Example
//!
//! ```
//! use btree::BTree;
//! use storage::MemPages;
//!
//! let mut store = MemPages::new();
//! let mut tree = BTree::new();
//! tree.insert(&mut store, b"a", b"one").unwrap();
//! assert_eq!(tree.get(&store, b"a").unwrap().as_deref(), Some(&b"one"[..]));
//! assert!(tree.delete(&mut store, b"a").unwrap());
//! ```

pub mod node;
mod split;

pub use node::{MAX_KEY_SIZE, MAX_VAL_SIZE, NodeBuilder, NodeRef, NodeType};

use std::cmp::Ordering;

use bytes::Bytes;
use common::{DbError, DbResult, PageId};
use storage::{PAGE_SIZE, Page, PageBuf, PageStore};
use tracing::{debug, trace};

use split::{merge, merged_size, split3};

/// Children at or below this size try to merge with a sibling.
pub const MERGE_THRESHOLD: usize = PAGE_SIZE / 4;

/// Deepest level a page walk descends to before reporting corruption.
pub const MAX_DEPTH: usize = 64;

/// Rejects keys and values the page layout cannot hold.
pub fn check_limit(key: &[u8], value: &[u8]) -> DbResult<()> {
    if key.len() > MAX_KEY_SIZE || value.len() > MAX_VAL_SIZE {
        return Err(DbError::SizeLimit {
            key_len: key.len(),
            value_len: value.len(),
        });
    }
    Ok(())
}

/// Handle on a tree: just its root page. The pages live in a [`PageStore`]
/// passed to each call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BTree {
    root: PageId,
}

impl BTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self { root: PageId::NONE }
    }

    /// Reattach to a tree whose root was recorded elsewhere (e.g. a meta page).
    pub fn with_root(root: PageId) -> Self {
        Self { root }
    }

    pub fn root(&self) -> PageId {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of levels from the root to the leaves; 0 for an empty tree.
    pub fn height<S: PageStore + ?Sized>(&self, store: &S) -> DbResult<usize> {
        if self.root.is_none() {
            return Ok(0);
        }
        let mut height = 1;
        let mut page = store.get(self.root)?;
        loop {
            let node = NodeRef::new(&page)?;
            if node.is_leaf() {
                return Ok(height);
            }
            let child = node.ptr(0)?;
            page = store.get(child)?;
            height += 1;
        }
    }

    /// Every page reachable from the root, parents before children.
    ///
    /// Fails with [`DbError::Corruption`] when a page does not decode, leaves
    /// sit at different depths, or the walk goes deeper than [`MAX_DEPTH`].
    pub fn pages<S: PageStore + ?Sized>(&self, store: &S) -> DbResult<Vec<PageId>> {
        let mut pages = Vec::new();
        if self.root.is_none() {
            return Ok(pages);
        }
        let mut leaf_depth = None;
        let mut stack = vec![(self.root, 1)];
        while let Some((id, depth)) = stack.pop() {
            if depth > MAX_DEPTH {
                return Err(DbError::Corruption(format!(
                    "page {id} sits deeper than {MAX_DEPTH} levels"
                )));
            }
            let page = store.get(id)?;
            let node = NodeRef::new(&page)?;
            pages.push(id);
            if node.is_leaf() {
                if *leaf_depth.get_or_insert(depth) != depth {
                    return Err(DbError::Corruption(format!(
                        "leaf {id} at depth {depth}, expected {leaf_depth:?}"
                    )));
                }
                continue;
            }
            for i in (0..node.len()).rev() {
                stack.push((node.ptr(i)?, depth + 1));
            }
        }
        Ok(pages)
    }

    /// Looks up `key`, returning a slice that shares the leaf page's buffer.
    pub fn get<S: PageStore + ?Sized>(&self, store: &S, key: &[u8]) -> DbResult<Option<Bytes>> {
        if self.root.is_none() {
            return Ok(None);
        }
        let mut page = store.get(self.root)?;
        loop {
            let node = NodeRef::new(&page)?;
            let idx = node.lookup_le(key)?;
            match node.node_type() {
                NodeType::Leaf => {
                    if idx < node.len() && node.key(idx)? == key {
                        let range = node.value_range(idx)?;
                        return Ok(Some(page.slice(range)));
                    }
                    return Ok(None);
                }
                NodeType::Internal => {
                    let child = node.ptr(idx)?;
                    page = store.get(child)?;
                }
            }
        }
    }

    /// Inserts or overwrites `key`.
    ///
    /// Oversized keys or values fail with [`DbError::SizeLimit`] before any
    /// page is touched.
    pub fn insert<S: PageStore + ?Sized>(
        &mut self,
        store: &mut S,
        key: &[u8],
        value: &[u8],
    ) -> DbResult<()> {
        check_limit(key, value)?;

        if self.root.is_none() {
            let root = if key.is_empty() {
                let mut root = NodeBuilder::page(NodeType::Leaf, 1)?;
                root.append(PageId::NONE, key, value)?;
                root
            } else {
                let mut root = NodeBuilder::page(NodeType::Leaf, 2)?;
                root.append(PageId::NONE, &[], &[])?;
                root.append(PageId::NONE, key, value)?;
                root
            };
            self.root = store.new_page(root.into_page()?)?;
            debug!(root = self.root.0, "btree.insert.first_root");
            return Ok(());
        }

        let page = store.get(self.root)?;
        let updated = tree_insert(store, &NodeRef::new(&page)?, key, value)?;
        self.publish_root(store, updated)
    }

    /// Removes `key`, returning whether it was present.
    pub fn delete<S: PageStore + ?Sized>(&mut self, store: &mut S, key: &[u8]) -> DbResult<bool> {
        if self.root.is_none() {
            return Ok(false);
        }
        let page = store.get(self.root)?;
        let Some(updated) = tree_delete(store, &NodeRef::new(&page)?, key)? else {
            return Ok(false);
        };

        if updated.is_empty() {
            store.del(self.root)?;
            debug!(old_root = self.root.0, "btree.delete.tree_emptied");
            self.root = PageId::NONE;
            return Ok(true);
        }
        if updated.node_type() == NodeType::Internal && updated.len() == 1 {
            let child = updated.view()?.ptr(0)?;
            store.del(self.root)?;
            debug!(old_root = self.root.0, root = child.0, "btree.delete.height_shrunk");
            self.root = child;
            return Ok(true);
        }
        self.publish_root(store, updated)?;
        Ok(true)
    }

    /// Replaces the root with `updated`, adding a level if it had to split.
    fn publish_root<S: PageStore + ?Sized>(
        &mut self,
        store: &mut S,
        updated: NodeBuilder,
    ) -> DbResult<()> {
        let pieces = split3(updated)?;
        store.del(self.root)?;
        if pieces.len() > 1 {
            let mut root = NodeBuilder::page(NodeType::Internal, pieces.len())?;
            for piece in pieces {
                let (id, first_key) = publish_child(store, piece)?;
                root.append(id, &first_key, &[])?;
            }
            self.root = store.new_page(root.into_page()?)?;
            debug!(root = self.root.0, "btree.root.height_grew");
        } else {
            let piece = pieces
                .into_iter()
                .next()
                .ok_or_else(|| DbError::Corruption("split returned no pages".into()))?;
            self.root = store.new_page(piece)?;
        }
        Ok(())
    }
}

/// Stores a split piece and returns its id with the key the parent records.
fn publish_child<S: PageStore + ?Sized>(store: &mut S, piece: PageBuf) -> DbResult<(PageId, Vec<u8>)> {
    let first_key = NodeRef::new(&piece)?.key(0)?.to_vec();
    let id = store.new_page(piece)?;
    Ok((id, first_key))
}

/// Where a new key goes in a leaf whose floor entry is `idx`.
fn insert_pos(node: &NodeRef<'_>, idx: usize, key: &[u8]) -> DbResult<usize> {
    if node.is_empty() {
        return Ok(0);
    }
    // Only reachable at index 0 when the sentinel has been deleted.
    if node.key(idx)?.cmp(key) == Ordering::Greater {
        return Ok(idx);
    }
    Ok(idx + 1)
}

fn leaf_insert(old: &NodeRef<'_>, idx: usize, key: &[u8], value: &[u8]) -> DbResult<NodeBuilder> {
    let mut new = NodeBuilder::scratch(NodeType::Leaf, old.len() + 1)?;
    new.append_range(old, 0, idx)?;
    new.append(PageId::NONE, key, value)?;
    new.append_range(old, idx, old.len() - idx)?;
    Ok(new)
}

fn leaf_update(old: &NodeRef<'_>, idx: usize, key: &[u8], value: &[u8]) -> DbResult<NodeBuilder> {
    let mut new = NodeBuilder::scratch(NodeType::Leaf, old.len())?;
    new.append_range(old, 0, idx)?;
    new.append(PageId::NONE, key, value)?;
    new.append_range(old, idx + 1, old.len() - (idx + 1))?;
    Ok(new)
}

fn leaf_delete(old: &NodeRef<'_>, idx: usize) -> DbResult<NodeBuilder> {
    let mut new = NodeBuilder::scratch(NodeType::Leaf, old.len() - 1)?;
    new.append_range(old, 0, idx)?;
    new.append_range(old, idx + 1, old.len() - (idx + 1))?;
    Ok(new)
}

/// Replaces child `idx` of `old` with the given pages, publishing each.
fn replace_kid_n<S: PageStore + ?Sized>(
    store: &mut S,
    old: &NodeRef<'_>,
    idx: usize,
    kids: Vec<PageBuf>,
) -> DbResult<NodeBuilder> {
    let inc = kids.len();
    let mut new = NodeBuilder::scratch(NodeType::Internal, old.len() + inc - 1)?;
    new.append_range(old, 0, idx)?;
    for kid in kids {
        let (id, first_key) = publish_child(store, kid)?;
        new.append(id, &first_key, &[])?;
    }
    new.append_range(old, idx + 1, old.len() - (idx + 1))?;
    Ok(new)
}

/// Replaces children `idx` and `idx + 1` of `old` with one merged child.
fn replace_2_kid(old: &NodeRef<'_>, idx: usize, ptr: PageId, key: &[u8]) -> DbResult<NodeBuilder> {
    let mut new = NodeBuilder::scratch(NodeType::Internal, old.len() - 1)?;
    new.append_range(old, 0, idx)?;
    new.append(ptr, key, &[])?;
    new.append_range(old, idx + 2, old.len() - (idx + 2))?;
    Ok(new)
}

fn tree_insert<S: PageStore + ?Sized>(
    store: &mut S,
    node: &NodeRef<'_>,
    key: &[u8],
    value: &[u8],
) -> DbResult<NodeBuilder> {
    let idx = node.lookup_le(key)?;
    match node.node_type() {
        NodeType::Leaf => {
            if idx < node.len() && node.key(idx)? == key {
                leaf_update(node, idx, key, value)
            } else {
                leaf_insert(node, insert_pos(node, idx, key)?, key, value)
            }
        }
        NodeType::Internal => {
            let ptr = node.ptr(idx)?;
            let child_page = store.get(ptr)?;
            let child = tree_insert(store, &NodeRef::new(&child_page)?, key, value)?;
            let kids = split3(child)?;
            store.del(ptr)?;
            replace_kid_n(store, node, idx, kids)
        }
    }
}

enum MergeWith {
    Left(Page),
    Right(Page),
}

/// Picks a sibling to absorb an undersized child, preferring the left one.
fn should_merge<S: PageStore + ?Sized>(
    store: &S,
    node: &NodeRef<'_>,
    idx: usize,
    updated: &NodeRef<'_>,
) -> DbResult<Option<MergeWith>> {
    if updated.encoded_size()? > MERGE_THRESHOLD {
        return Ok(None);
    }
    if idx > 0 {
        let sibling = store.get(node.ptr(idx - 1)?)?;
        if merged_size(&NodeRef::new(&sibling)?, updated)? <= PAGE_SIZE {
            return Ok(Some(MergeWith::Left(sibling)));
        }
    }
    if idx + 1 < node.len() {
        let sibling = store.get(node.ptr(idx + 1)?)?;
        if merged_size(&NodeRef::new(&sibling)?, updated)? <= PAGE_SIZE {
            return Ok(Some(MergeWith::Right(sibling)));
        }
    }
    Ok(None)
}

/// Returns `None` when `key` is absent; the tree is then left untouched.
fn tree_delete<S: PageStore + ?Sized>(
    store: &mut S,
    node: &NodeRef<'_>,
    key: &[u8],
) -> DbResult<Option<NodeBuilder>> {
    let idx = node.lookup_le(key)?;
    if node.is_leaf() {
        if idx >= node.len() || node.key(idx)? != key {
            return Ok(None);
        }
        return leaf_delete(node, idx).map(Some);
    }

    let kptr = node.ptr(idx)?;
    let child_page = store.get(kptr)?;
    let Some(updated) = tree_delete(store, &NodeRef::new(&child_page)?, key)? else {
        return Ok(None);
    };
    store.del(kptr)?;

    let merge_with = should_merge(store, node, idx, &updated.view()?)?;
    let new = match merge_with {
        Some(MergeWith::Left(sibling)) => {
            let merged = merge(&NodeRef::new(&sibling)?, &updated.view()?)?;
            store.del(node.ptr(idx - 1)?)?;
            let (id, first_key) = publish_child(store, merged.into_page()?)?;
            trace!(page = id.0, "btree.delete.merged_left");
            replace_2_kid(node, idx - 1, id, &first_key)?
        }
        Some(MergeWith::Right(sibling)) => {
            let merged = merge(&updated.view()?, &NodeRef::new(&sibling)?)?;
            store.del(node.ptr(idx + 1)?)?;
            let (id, first_key) = publish_child(store, merged.into_page()?)?;
            trace!(page = id.0, "btree.delete.merged_right");
            replace_2_kid(node, idx, id, &first_key)?
        }
        None if updated.is_empty() => {
            // The only child emptied out; the caller collapses this node.
            NodeBuilder::scratch(NodeType::Internal, 0)?
        }
        None => {
            let kids = split3(updated)?;
            replace_kid_n(store, node, idx, kids)?
        }
    };
    Ok(Some(new))
}

#[cfg(test)]
mod tests;
