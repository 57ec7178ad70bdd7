#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Identifier for a page in the storage layer.
///
/// Id 0 is never handed out for a live tree or free-list page: it marks an
/// empty tree root, the end of the free-list chain, and the meta page slot.
/// Examples:
/// - `let empty_root = PageId(0);`
/// - `let leaf = PageId(42);`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

impl PageId {
    /// The "no page" marker.
    pub const NONE: PageId = PageId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Canonical error type shared across the storage engine.
#[derive(Error, Debug)]
pub enum DbError {
    /// A key or value exceeded the insert limits. The tree is untouched.
    #[error("key or value exceeds max size (key {key_len} bytes, value {value_len} bytes)")]
    SizeLimit { key_len: usize, value_len: usize },
    #[error("meta: {0}")]
    Meta(String),
    /// An invariant of the on-page format or the tree shape was violated.
    /// The operation that detected it has been abandoned.
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DbError {
    /// Fatal errors indicate a logic bug or damaged pages, not a bad request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DbError::Corruption(_))
    }
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// When the free list's reuse watermark advances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatermarkPolicy {
    /// Advance after every completed write.
    #[default]
    PerWrite,
    /// Advance only when the caller commits explicitly.
    Manual,
}

/// Runtime configuration for the key/value store.
///
/// # Example
/// ```
/// use common::{Config, WatermarkPolicy};
///
/// let config = Config::builder()
///     .recycle_pages(true)
///     .watermark(WatermarkPolicy::Manual)
///     .build();
/// assert!(config.recycle_pages);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Queue pages retired by the tree on the free list and allocate from it.
    #[builder(default = true)]
    pub recycle_pages: bool,
    /// Controls when retired pages become eligible for reuse.
    #[builder(default)]
    pub watermark: WatermarkPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recycle_pages: true,
            watermark: WatermarkPolicy::PerWrite,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, DbError, DbResult, PageId, WatermarkPolicy};
}
