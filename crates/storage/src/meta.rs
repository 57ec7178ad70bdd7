//! Meta page codec.
//!
//! The meta page records where the tree starts and how far the page file has
//! grown. Only the first 32 bytes are used:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 16 | [`META_SIGNATURE`] |
//! | 16 | 8 | root page id (LE) |
//! | 24 | 8 | flushed page count (LE) |

use std::fs;
use std::ops::Range;
use std::path::Path;

use common::{DbError, DbResult, PageId};

use crate::PageBuf;

/// Identifies the file format and its version.
pub const META_SIGNATURE: &[u8; 16] = b"PageKV-Format-01";

const META_SIG: Range<usize> = 0..16;
const META_ROOT: Range<usize> = 16..24;
const META_FLUSHED: Range<usize> = 24..32;

/// Minimum number of bytes a meta page must carry.
pub const META_LEN: usize = META_FLUSHED.end;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Meta {
    /// Root page of the tree, [`PageId::NONE`] for an empty tree.
    pub root: PageId,
    /// Number of pages the page file has handed out so far.
    pub flushed: u64,
}

impl Meta {
    pub fn encode(&self) -> PageBuf {
        let mut buf = PageBuf::zeroed();
        buf[META_SIG].copy_from_slice(META_SIGNATURE);
        buf[META_ROOT].copy_from_slice(&self.root.0.to_le_bytes());
        buf[META_FLUSHED].copy_from_slice(&self.flushed.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> DbResult<Self> {
        if data.len() < META_LEN {
            return Err(DbError::Meta(format!(
                "meta page too small: {} bytes, need {META_LEN}",
                data.len()
            )));
        }
        if &data[META_SIG] != META_SIGNATURE {
            return Err(DbError::Meta("bad signature".into()));
        }
        Ok(Self {
            root: PageId(read_u64(&data[META_ROOT])),
            flushed: read_u64(&data[META_FLUSHED]),
        })
    }

    /// Writes the encoded page to `path`, replacing any existing file.
    pub fn save_to(&self, path: &Path) -> DbResult<()> {
        fs::write(path, &self.encode()[..])?;
        Ok(())
    }

    pub fn load_from(path: &Path) -> DbResult<Self> {
        Self::decode(&fs::read(path)?)
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}
