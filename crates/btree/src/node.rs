//! On-page node encoding.
//!
//! ```text
//! | type u16 | nkeys u16 | ptrs [u64; n] | offsets [u16; n] | entries ... |
//! entry = | klen u16 | vlen u16 | key | value |
//! ```
//!
//! All integers are little-endian. `offsets[i]` holds the cumulative size of
//! entries `0..=i`, so the offset of entry 0 is implicitly 0 and the offset
//! of entry `n` (one past the end) is stored in the last slot.

use std::fmt;
use std::ops::Range;

use common::{DbError, DbResult, PageId};
use storage::{PAGE_SIZE, PageBuf};

pub const HEADER: usize = 4;
const PTR_BYTES: usize = 8;
const OFFSET_BYTES: usize = 2;
const ENTRY_PREFIX: usize = 4;

pub const MAX_KEY_SIZE: usize = 1000;
pub const MAX_VAL_SIZE: usize = 3000;

/// Build buffers may hold a node up to twice the page size before splitting.
pub const SCRATCH_SIZE: usize = 2 * PAGE_SIZE;

/// The type of a B+Tree node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum NodeType {
    Internal = 1,
    Leaf = 2,
}

impl TryFrom<u16> for NodeType {
    type Error = DbError;

    fn try_from(tag: u16) -> DbResult<Self> {
        match tag {
            1 => Ok(NodeType::Internal),
            2 => Ok(NodeType::Leaf),
            other => Err(DbError::Corruption(format!("unknown node type tag {other}"))),
        }
    }
}

fn corruption(msg: impl Into<String>) -> DbError {
    DbError::Corruption(msg.into())
}

fn read_u16(data: &[u8], pos: usize) -> DbResult<u16> {
    data.get(pos..pos + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| corruption(format!("u16 read at {pos} past end of {} bytes", data.len())))
}

fn read_u64(data: &[u8], pos: usize) -> DbResult<u64> {
    let bytes = data
        .get(pos..pos + 8)
        .ok_or_else(|| corruption(format!("u64 read at {pos} past end of {} bytes", data.len())))?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
}

/// Size of a node with `nkeys` entries whose payloads total `payload` bytes.
pub fn node_size(nkeys: usize, payload: usize) -> usize {
    HEADER + nkeys * (PTR_BYTES + OFFSET_BYTES) + payload
}

/// Read-only view over an encoded node.
///
/// Construction checks the header; every accessor checks its own bounds and
/// reports a [`DbError::Corruption`] rather than reading garbage.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    data: &'a [u8],
    node_type: NodeType,
    nkeys: usize,
}

impl<'a> NodeRef<'a> {
    pub fn new(data: &'a [u8]) -> DbResult<Self> {
        let node_type = NodeType::try_from(read_u16(data, 0)?)?;
        let nkeys = read_u16(data, 2)? as usize;
        if node_size(nkeys, 0) > data.len() {
            return Err(corruption(format!(
                "{nkeys} entries do not fit a {}-byte buffer",
                data.len()
            )));
        }
        Ok(Self {
            data,
            node_type,
            nkeys,
        })
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn is_leaf(&self) -> bool {
        self.node_type == NodeType::Leaf
    }

    pub fn len(&self) -> usize {
        self.nkeys
    }

    pub fn is_empty(&self) -> bool {
        self.nkeys == 0
    }

    fn check_index(&self, idx: usize) -> DbResult<()> {
        if idx >= self.nkeys {
            return Err(corruption(format!(
                "entry {idx} out of range for node with {} entries",
                self.nkeys
            )));
        }
        Ok(())
    }

    /// Child pointer at `idx`. Leaves carry 0 in every slot.
    pub fn ptr(&self, idx: usize) -> DbResult<PageId> {
        self.check_index(idx)?;
        read_u64(self.data, HEADER + idx * PTR_BYTES).map(PageId)
    }

    /// Cumulative payload bytes before entry `idx`; valid for `idx <= len()`.
    pub fn offset(&self, idx: usize) -> DbResult<usize> {
        if idx == 0 {
            return Ok(0);
        }
        if idx > self.nkeys {
            return Err(corruption(format!(
                "offset {idx} out of range for node with {} entries",
                self.nkeys
            )));
        }
        let pos = HEADER + self.nkeys * PTR_BYTES + (idx - 1) * OFFSET_BYTES;
        read_u16(self.data, pos).map(usize::from)
    }

    /// Absolute position of entry `idx` within the buffer.
    pub fn entry_pos(&self, idx: usize) -> DbResult<usize> {
        Ok(node_size(self.nkeys, 0) + self.offset(idx)?)
    }

    fn key_range(&self, idx: usize) -> DbResult<(Range<usize>, usize)> {
        self.check_index(idx)?;
        let pos = self.entry_pos(idx)?;
        let klen = read_u16(self.data, pos)? as usize;
        let vlen = read_u16(self.data, pos + 2)? as usize;
        let start = pos + ENTRY_PREFIX;
        if start + klen + vlen > self.data.len() {
            return Err(corruption(format!("entry {idx} overruns the node buffer")));
        }
        Ok((start..start + klen, vlen))
    }

    pub fn key(&self, idx: usize) -> DbResult<&'a [u8]> {
        let (range, _) = self.key_range(idx)?;
        Ok(&self.data[range])
    }

    /// Byte range of the value at `idx`, for zero-copy slicing of a page.
    pub fn value_range(&self, idx: usize) -> DbResult<Range<usize>> {
        let (key, vlen) = self.key_range(idx)?;
        Ok(key.end..key.end + vlen)
    }

    pub fn value(&self, idx: usize) -> DbResult<&'a [u8]> {
        let range = self.value_range(idx)?;
        Ok(&self.data[range])
    }

    /// Total bytes the node occupies.
    pub fn encoded_size(&self) -> DbResult<usize> {
        self.entry_pos(self.nkeys)
    }

    /// Index of the last entry whose key is `<= key`, clamped to 0.
    ///
    /// An exact match wins at its first occurrence.
    pub fn lookup_le(&self, key: &[u8]) -> DbResult<usize> {
        for i in 0..self.nkeys {
            match self.key(i)?.cmp(key) {
                std::cmp::Ordering::Equal => return Ok(i),
                std::cmp::Ordering::Greater => return Ok(i.saturating_sub(1)),
                std::cmp::Ordering::Less => {}
            }
        }
        Ok(self.nkeys.saturating_sub(1))
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("node_type", &self.node_type)
            .field("nkeys", &self.nkeys)
            .field("encoded_size", &self.encoded_size().ok())
            .finish()
    }
}

/// Owned buffer a node is appended into, one entry at a time.
///
/// The entry count is fixed up front because it determines where the offsets
/// table and the payload start. Entries must then be appended in slot order.
pub struct NodeBuilder {
    buf: Vec<u8>,
    node_type: NodeType,
    nkeys: usize,
    filled: usize,
}

impl NodeBuilder {
    pub fn with_capacity(node_type: NodeType, nkeys: usize, capacity: usize) -> DbResult<Self> {
        if nkeys > u16::MAX as usize || node_size(nkeys, 0) > capacity {
            return Err(corruption(format!(
                "node of {nkeys} entries does not fit a {capacity}-byte buffer"
            )));
        }
        let mut buf = vec![0u8; capacity];
        buf[0..2].copy_from_slice(&(node_type as u16).to_le_bytes());
        buf[2..4].copy_from_slice(&(nkeys as u16).to_le_bytes());
        Ok(Self {
            buf,
            node_type,
            nkeys,
            filled: 0,
        })
    }

    /// A builder sized for exactly one page.
    pub fn page(node_type: NodeType, nkeys: usize) -> DbResult<Self> {
        Self::with_capacity(node_type, nkeys, PAGE_SIZE)
    }

    /// A builder that may temporarily overflow one page.
    pub fn scratch(node_type: NodeType, nkeys: usize) -> DbResult<Self> {
        Self::with_capacity(node_type, nkeys, SCRATCH_SIZE)
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn len(&self) -> usize {
        self.nkeys
    }

    pub fn is_empty(&self) -> bool {
        self.nkeys == 0
    }

    fn cursor(&self) -> usize {
        if self.filled == 0 {
            return 0;
        }
        let pos = HEADER + self.nkeys * PTR_BYTES + (self.filled - 1) * OFFSET_BYTES;
        u16::from_le_bytes([self.buf[pos], self.buf[pos + 1]]) as usize
    }

    /// Writes the next entry and records its end offset.
    pub fn append(&mut self, ptr: PageId, key: &[u8], value: &[u8]) -> DbResult<()> {
        let idx = self.filled;
        if idx >= self.nkeys {
            return Err(corruption(format!(
                "append past the {} entries declared for this node",
                self.nkeys
            )));
        }
        let ptr_pos = HEADER + idx * PTR_BYTES;
        self.buf[ptr_pos..ptr_pos + PTR_BYTES].copy_from_slice(&ptr.0.to_le_bytes());

        let offset = self.cursor();
        let pos = node_size(self.nkeys, offset);
        let end = pos + ENTRY_PREFIX + key.len() + value.len();
        let end_offset = offset + ENTRY_PREFIX + key.len() + value.len();
        if end > self.buf.len() || end_offset > u16::MAX as usize {
            return Err(corruption(format!(
                "entry {idx} overflows the {}-byte build buffer",
                self.buf.len()
            )));
        }
        self.buf[pos..pos + 2].copy_from_slice(&(key.len() as u16).to_le_bytes());
        self.buf[pos + 2..pos + 4].copy_from_slice(&(value.len() as u16).to_le_bytes());
        let key_start = pos + ENTRY_PREFIX;
        self.buf[key_start..key_start + key.len()].copy_from_slice(key);
        self.buf[key_start + key.len()..end].copy_from_slice(value);

        let off_pos = HEADER + self.nkeys * PTR_BYTES + idx * OFFSET_BYTES;
        self.buf[off_pos..off_pos + OFFSET_BYTES].copy_from_slice(&(end_offset as u16).to_le_bytes());
        self.filled += 1;
        Ok(())
    }

    /// Copies entries `from..from + n` of `src` into the next `n` slots.
    pub fn append_range(&mut self, src: &NodeRef<'_>, from: usize, n: usize) -> DbResult<()> {
        for i in from..from + n {
            self.append(src.ptr(i)?, src.key(i)?, src.value(i)?)?;
        }
        Ok(())
    }

    pub fn view(&self) -> DbResult<NodeRef<'_>> {
        NodeRef::new(&self.buf)
    }

    /// Bytes used by the entries appended so far.
    pub fn encoded_size(&self) -> usize {
        node_size(self.nkeys, self.cursor())
    }

    /// Seals the node into a publishable page.
    pub fn into_page(self) -> DbResult<PageBuf> {
        if self.filled != self.nkeys {
            return Err(corruption(format!(
                "node sealed with {} of {} entries",
                self.filled, self.nkeys
            )));
        }
        let size = self.encoded_size();
        if size > PAGE_SIZE {
            return Err(corruption(format!(
                "node of {size} bytes exceeds the {PAGE_SIZE}-byte page"
            )));
        }
        PageBuf::from_slice(&self.buf[..size])
    }
}

impl fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("node_type", &self.node_type)
            .field("nkeys", &self.nkeys)
            .field("filled", &self.filled)
            .field("encoded_size", &self.encoded_size())
            .finish()
    }
}
