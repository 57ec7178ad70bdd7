//! Structural assertions over a tree and the pages it reaches.
//!
//! These walk the whole tree from its root, so they are meant for tests with
//! at most a few thousand entries.

use btree::{BTree, NodeRef, NodeType};
use common::{DbResult, PageId};
use storage::{PAGE_SIZE, PageStore};

/// What [`assert_tree_invariants`] observed while walking a tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Levels from root to leaves; 0 for an empty tree.
    pub height: usize,
    /// Leaf entries, the sentinel included.
    pub entries: usize,
    /// Every page reachable from the root, in visiting order.
    pub pages: Vec<PageId>,
}

/// Assert that the tree rooted at `tree.root()` is well formed.
///
/// Checks, for every reachable node:
/// - it decodes and fits in one page
/// - it is non-empty and its keys are strictly increasing
/// - each internal key equals the first key of the child it points to
/// - all leaves sit at the same depth
/// - no page is reachable twice
///
/// # Example
///
/// ```
/// use btree::BTree;
/// use storage::MemPages;
/// use testsupport::prelude::*;
///
/// let store = MemPages::new();
/// let stats = assert_tree_invariants(&BTree::new(), &store);
/// assert_eq!(stats, TreeStats::default());
/// ```
pub fn assert_tree_invariants<S: PageStore + ?Sized>(tree: &BTree, store: &S) -> TreeStats {
    let mut stats = TreeStats::default();
    if tree.is_empty() {
        return stats;
    }
    stats.height = walk(store, tree.root(), None, &mut stats);

    let mut sorted = stats.pages.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(
        sorted.len(),
        stats.pages.len(),
        "a page is reachable from more than one parent"
    );
    stats
}

fn walk<S: PageStore + ?Sized>(
    store: &S,
    id: PageId,
    parent_key: Option<&[u8]>,
    stats: &mut TreeStats,
) -> usize {
    assert!(!id.is_none(), "tree points at the reserved page");
    stats.pages.push(id);
    let page = store.get(id).expect("page read failed");
    let node = NodeRef::new(&page).unwrap_or_else(|e| panic!("page {id} does not decode: {e}"));
    let size = node.encoded_size().expect("node size");
    assert!(size <= PAGE_SIZE, "page {id} holds {size} bytes");
    assert!(!node.is_empty(), "page {id} is an empty node");

    let keys: Vec<&[u8]> = (0..node.len()).map(|i| node.key(i).expect("key")).collect();
    for pair in keys.windows(2) {
        assert!(pair[0] < pair[1], "keys out of order in page {id}: {pair:?}");
    }
    if let Some(expected) = parent_key {
        assert_eq!(keys[0], expected, "parent key does not match page {id}");
    }

    match node.node_type() {
        NodeType::Leaf => {
            stats.entries += node.len();
            1
        }
        NodeType::Internal => {
            let mut depth = None;
            for (i, key) in keys.iter().enumerate() {
                let child = node.ptr(i).expect("child pointer");
                let d = walk(store, child, Some(key), stats);
                if let Some(prev) = depth {
                    assert_eq!(prev, d, "leaves under page {id} sit at different depths");
                }
                depth = Some(d);
            }
            depth.unwrap_or(0) + 1
        }
    }
}

/// Every entry in key order, read leaf by leaf.
pub fn collect_entries<S: PageStore + ?Sized>(
    tree: &BTree,
    store: &S,
) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut out = Vec::new();
    if !tree.is_empty() {
        collect_from(store, tree.root(), &mut out)?;
    }
    Ok(out)
}

fn collect_from<S: PageStore + ?Sized>(
    store: &S,
    id: PageId,
    out: &mut Vec<(Vec<u8>, Vec<u8>)>,
) -> DbResult<()> {
    let page = store.get(id)?;
    let node = NodeRef::new(&page)?;
    for i in 0..node.len() {
        match node.node_type() {
            NodeType::Leaf => out.push((node.key(i)?.to_vec(), node.value(i)?.to_vec())),
            NodeType::Internal => collect_from(store, node.ptr(i)?, out)?,
        }
    }
    Ok(())
}

/// Assert that an operation failed with an error whose message contains `expected`.
///
/// # Example
///
/// ```
/// use common::DbError;
/// use testsupport::prelude::*;
///
/// let result: Result<(), DbError> = Err(DbError::Meta("bad signature".into()));
/// assert_error_contains(result, "bad signature");
/// ```
pub fn assert_error_contains<T>(result: DbResult<T>, expected: &str) {
    match result {
        Ok(_) => panic!("expected error containing '{expected}', but got Ok"),
        Err(e) => {
            let message = e.to_string();
            assert!(
                message.contains(expected),
                "expected error to contain '{expected}', but got: {message}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::be_key;
    use pretty_assertions::assert_eq;
    use storage::MemPages;

    #[test]
    fn stats_of_a_single_leaf() {
        let mut store = MemPages::new();
        let mut tree = BTree::new();
        tree.insert(&mut store, b"x", b"1").unwrap();

        let stats = assert_tree_invariants(&tree, &store);
        assert_eq!(stats.height, 1);
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.pages, vec![tree.root()]);
    }

    #[test]
    fn entries_come_back_sorted() {
        let mut store = MemPages::new();
        let mut tree = BTree::new();
        for i in (0..300).rev() {
            tree.insert(&mut store, &be_key(i), &[9u8; 40]).unwrap();
        }
        let entries = collect_entries(&tree, &store).unwrap();
        assert_eq!(entries.len(), 301);
        assert_eq!(entries[0].0, Vec::<u8>::new());
        assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));

        let stats = assert_tree_invariants(&tree, &store);
        assert_eq!(stats.height, tree.height(&store).unwrap());
        assert_eq!(stats.pages.len(), store.pages_allocated());
    }

    #[test]
    #[should_panic(expected = "does not decode")]
    fn garbage_root_is_reported() {
        let mut store = MemPages::new();
        store.write(PageId(1)).unwrap()[0] = 0x7f;
        assert_tree_invariants(&BTree::with_root(PageId(1)), &store);
    }
}
