//! Test support utilities for the page store workspace.
//!
//! This crate provides:
//! - Structural checks for a tree and the pages it reaches
//! - Deterministic keys and payloads
//! - Property-based generators for key/value workloads
//!
//! # Example Usage
//!
//! ```
//! use btree::BTree;
//! use storage::MemPages;
//! use testsupport::prelude::*;
//!
//! let mut store = MemPages::new();
//! let mut tree = BTree::new();
//! for i in 0..100 {
//!     tree.insert(&mut store, &be_key(i), &payload(i, 32)).unwrap();
//! }
//! let stats = assert_tree_invariants(&tree, &store);
//! assert_eq!(stats.entries, 101);
//! ```

pub mod assertions;
pub mod fixtures;
pub mod proptest_generators;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::fixtures::*;
}
