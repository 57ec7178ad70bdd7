use super::*;
use pretty_assertions::assert_eq;
use storage::MemPages;

/// Walks the subtree at `id`, checking ordering, page size, and parent keys.
/// Returns the subtree height and the number of entries in its leaves.
fn check_subtree(store: &MemPages, id: PageId, first_key: Option<&[u8]>) -> (usize, usize) {
    assert!(store.contains(id), "page {id} referenced but not live");
    let page = store.get(id).unwrap();
    let node = NodeRef::new(&page).unwrap();
    assert!(node.encoded_size().unwrap() <= PAGE_SIZE);
    assert!(!node.is_empty(), "published node {id} is empty");

    let keys: Vec<&[u8]> = (0..node.len()).map(|i| node.key(i).unwrap()).collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]), "keys out of order in {id}");
    if let Some(expected) = first_key {
        assert_eq!(keys[0], expected, "parent key mismatch for {id}");
    }

    match node.node_type() {
        NodeType::Leaf => (1, node.len()),
        NodeType::Internal => {
            let mut height = None;
            let mut count = 0;
            for i in 0..node.len() {
                let (h, c) = check_subtree(store, node.ptr(i).unwrap(), Some(keys[i]));
                assert!(height.is_none() || height == Some(h), "uneven leaf depth");
                height = Some(h);
                count += c;
            }
            (height.unwrap_or(0) + 1, count)
        }
    }
}

fn check_tree(tree: &BTree, store: &MemPages) -> (usize, usize) {
    if tree.is_empty() {
        return (0, 0);
    }
    check_subtree(store, tree.root(), None)
}

fn be_key(i: u32) -> [u8; 4] {
    i.to_be_bytes()
}

fn root_size(tree: &BTree, store: &MemPages) -> usize {
    if tree.is_empty() {
        return 0;
    }
    let page = store.get(tree.root()).unwrap();
    NodeRef::new(&page).unwrap().encoded_size().unwrap()
}

fn get(tree: &BTree, store: &MemPages, key: &[u8]) -> Option<Vec<u8>> {
    tree.get(store, key).unwrap().map(|v| v.to_vec())
}

#[test]
fn empty_tree_has_nothing() {
    let store = MemPages::new();
    let tree = BTree::new();
    assert!(tree.is_empty());
    assert_eq!(tree.height(&store).unwrap(), 0);
    assert_eq!(get(&tree, &store, b"a"), None);
}

#[test]
fn single_key_root_carries_sentinel() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    tree.insert(&mut store, b"a", b"one").unwrap();

    let page = store.get(tree.root()).unwrap();
    let root = NodeRef::new(&page).unwrap();
    assert_eq!(root.node_type(), NodeType::Leaf);
    assert_eq!(root.len(), 2);
    assert_eq!(root.key(0).unwrap(), b"");
    assert_eq!(root.value(0).unwrap(), b"");
    assert_eq!(root.key(1).unwrap(), b"a");

    assert_eq!(get(&tree, &store, b"a"), Some(b"one".to_vec()));
    assert_eq!(get(&tree, &store, b"z"), None);
    assert_eq!(store.pages_allocated(), 1);
}

#[test]
fn update_replaces_without_growing() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    tree.insert(&mut store, b"a", b"one").unwrap();
    tree.insert(&mut store, b"b", b"two").unwrap();
    let (_, before) = check_tree(&tree, &store);

    tree.insert(&mut store, b"a", b"uno").unwrap();
    let (_, after) = check_tree(&tree, &store);

    assert_eq!(before, after);
    assert_eq!(get(&tree, &store, b"a"), Some(b"uno".to_vec()));
    assert_eq!(get(&tree, &store, b"b"), Some(b"two".to_vec()));
}

#[test]
fn oversized_insert_is_rejected_and_harmless() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    tree.insert(&mut store, b"keep", b"me").unwrap();
    let root = tree.root();

    let err = tree
        .insert(&mut store, &vec![b'k'; MAX_KEY_SIZE + 1], b"v")
        .unwrap_err();
    assert!(matches!(err, DbError::SizeLimit { key_len: 1001, .. }));
    let err = tree
        .insert(&mut store, b"k", &vec![0u8; MAX_VAL_SIZE + 1])
        .unwrap_err();
    assert!(matches!(err, DbError::SizeLimit { value_len: 3001, .. }));

    assert_eq!(tree.root(), root);
    assert_eq!(get(&tree, &store, b"keep"), Some(b"me".to_vec()));
}

#[test]
fn maximal_entries_are_accepted() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    for i in 0..6u8 {
        let mut key = vec![b'k'; MAX_KEY_SIZE];
        key[0] = i;
        tree.insert(&mut store, &key, &vec![i; MAX_VAL_SIZE]).unwrap();
    }
    let (height, count) = check_tree(&tree, &store);
    assert_eq!(count, 7);
    assert!(height >= 2);
    for i in 0..6u8 {
        let mut key = vec![b'k'; MAX_KEY_SIZE];
        key[0] = i;
        assert_eq!(get(&tree, &store, &key), Some(vec![i; MAX_VAL_SIZE]));
    }
}

#[test]
fn delete_twice_reports_absence() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    tree.insert(&mut store, b"a", b"1").unwrap();
    tree.insert(&mut store, b"b", b"2").unwrap();

    assert!(tree.delete(&mut store, b"a").unwrap());
    assert!(!tree.delete(&mut store, b"a").unwrap());
    assert_eq!(get(&tree, &store, b"a"), None);
    assert_eq!(get(&tree, &store, b"b"), Some(b"2".to_vec()));
}

#[test]
fn delete_missing_key_leaves_tree_untouched() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    for i in 0..50 {
        tree.insert(&mut store, &be_key(i * 2), b"v").unwrap();
    }
    let root = tree.root();
    let pages = store.pages_allocated();

    assert!(!tree.delete(&mut store, &be_key(7)).unwrap());
    assert_eq!(tree.root(), root);
    assert_eq!(store.pages_allocated(), pages);
    assert!(!BTree::new().delete(&mut store, b"x").unwrap());
}

#[test]
fn sequential_scenario_grows_shrinks_and_retires_roots() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    let payload = vec![b'p'; 100];

    // 8-byte pointer, 2-byte offset, 4-byte entry header, key, value
    let entry_size = 8 + 2 + 4 + 4 + payload.len();
    let mut last_height = 0;
    for i in 0..200 {
        let root_size = root_size(&tree, &store);
        tree.insert(&mut store, &be_key(i), &payload).unwrap();
        let (height, count) = check_tree(&tree, &store);
        assert!(height >= last_height);
        if last_height > 0 && height > last_height {
            assert!(
                root_size + entry_size > PAGE_SIZE,
                "root of {root_size} bytes split on insert {i}"
            );
        }
        // every key plus the sentinel
        assert_eq!(count, i as usize + 2);
        last_height = height;
    }
    assert!(last_height >= 2, "200 entries of ~110 bytes need several leaves");
    for i in 0..200 {
        assert_eq!(get(&tree, &store, &be_key(i)), Some(payload.clone()));
    }

    for i in (0..200).step_by(2) {
        assert!(tree.delete(&mut store, &be_key(i)).unwrap());
    }
    check_tree(&tree, &store);
    for i in 0..200 {
        let expected = (i % 2 == 1).then(|| payload.clone());
        assert_eq!(get(&tree, &store, &be_key(i)), expected);
    }

    let mut retired = Vec::new();
    for i in (0..200).step_by(2) {
        retired.push(tree.root());
        tree.insert(&mut store, &be_key(i), &payload).unwrap();
    }
    assert!(retired.iter().all(|id| !store.contains(*id)));
    let (_, count) = check_tree(&tree, &store);
    assert_eq!(count, 201);
    // only reachable pages remain live
    for i in 0..200 {
        assert_eq!(get(&tree, &store, &be_key(i)), Some(payload.clone()));
    }
}

#[test]
fn live_pages_match_reachable_pages() {
    fn reachable(store: &MemPages, id: PageId) -> usize {
        let page = store.get(id).unwrap();
        let node = NodeRef::new(&page).unwrap();
        if node.is_leaf() {
            return 1;
        }
        1 + (0..node.len())
            .map(|i| reachable(store, node.ptr(i).unwrap()))
            .sum::<usize>()
    }

    let mut store = MemPages::new();
    let mut tree = BTree::new();
    for i in 0..300 {
        tree.insert(&mut store, &be_key(i), &[7u8; 64]).unwrap();
    }
    for i in (0..300).filter(|i| i % 3 != 0) {
        tree.delete(&mut store, &be_key(i)).unwrap();
    }
    assert_eq!(store.pages_allocated(), reachable(&store, tree.root()));
}

#[test]
fn reverse_order_inserts_stay_sorted() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    for i in (0..400).rev() {
        tree.insert(&mut store, &be_key(i), &[1u8; 32]).unwrap();
    }
    let (_, count) = check_tree(&tree, &store);
    assert_eq!(count, 401);
}

#[test]
fn deleting_everything_empties_the_tree() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    for i in 0..150 {
        tree.insert(&mut store, &be_key(i), &[2u8; 50]).unwrap();
    }
    for i in 0..150 {
        assert!(tree.delete(&mut store, &be_key(i)).unwrap());
        check_tree(&tree, &store);
    }
    // the sentinel is an ordinary entry
    assert!(tree.delete(&mut store, b"").unwrap());
    assert!(tree.is_empty());
    assert_eq!(store.pages_allocated(), 0);

    tree.insert(&mut store, b"again", b"1").unwrap();
    assert_eq!(get(&tree, &store, b"again"), Some(b"1".to_vec()));
    assert_eq!(get(&tree, &store, b""), Some(Vec::new()));
}

#[test]
fn merges_shrink_height_back() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    for i in 0..500 {
        tree.insert(&mut store, &be_key(i), &[3u8; 40]).unwrap();
    }
    let (tall, _) = check_tree(&tree, &store);
    for i in 5..500 {
        tree.delete(&mut store, &be_key(i)).unwrap();
    }
    let (short, count) = check_tree(&tree, &store);
    assert_eq!(tree.height(&store).unwrap(), short);
    assert!(short < tall);
    assert_eq!(short, 1);
    assert_eq!(count, 6);
}

#[test]
fn inserts_below_a_deleted_sentinel_keep_order() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    tree.insert(&mut store, b"m", b"1").unwrap();
    tree.insert(&mut store, b"n", b"2").unwrap();
    assert!(tree.delete(&mut store, b"").unwrap());

    tree.insert(&mut store, b"a", b"0").unwrap();
    check_tree(&tree, &store);
    assert_eq!(get(&tree, &store, b"a"), Some(b"0".to_vec()));
    assert_eq!(get(&tree, &store, b"m"), Some(b"1".to_vec()));
}

#[test]
fn empty_key_on_empty_tree_is_a_single_entry() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    tree.insert(&mut store, b"", b"root").unwrap();
    let (_, count) = check_tree(&tree, &store);
    assert_eq!(count, 1);
    assert_eq!(get(&tree, &store, b""), Some(b"root".to_vec()));
}

#[test]
fn corrupted_root_is_fatal() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    tree.insert(&mut store, b"a", b"1").unwrap();
    store.write(tree.root()).unwrap()[0] = 0xff;

    assert!(tree.get(&store, b"a").unwrap_err().is_fatal());
    assert!(tree.insert(&mut store, b"b", b"2").unwrap_err().is_fatal());
}

#[test]
fn pages_lists_every_reachable_page_once() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    assert!(tree.pages(&store).unwrap().is_empty());

    for i in 0..300 {
        tree.insert(&mut store, &be_key(i), &[5u8; 64]).unwrap();
    }
    let mut pages = tree.pages(&store).unwrap();
    assert_eq!(pages[0], tree.root());
    pages.sort();
    pages.dedup();
    // every live page belongs to the tree without recycling
    assert_eq!(pages.len(), store.pages_allocated());
    assert!(pages.iter().all(|id| store.contains(*id)));
}

#[test]
fn pages_reports_undecodable_children() {
    let mut store = MemPages::new();
    let mut tree = BTree::new();
    for i in 0..100 {
        tree.insert(&mut store, &be_key(i), &[6u8; 100]).unwrap();
    }
    let page = store.get(tree.root()).unwrap();
    let child = NodeRef::new(&page).unwrap().ptr(1).unwrap();
    store.del(child).unwrap();

    assert!(tree.pages(&store).unwrap_err().is_fatal());
}
