//! Page elements
//!
//! Fixed-size element records stored after the page header of branch and
//! leaf pages, plus the bucket header stored as a bucket's value.
//!
//! ## Branch Page
//! ```text
//! | header | elem 0 | ... | elem N-1 | k0 | ... | kN-1 |
//! elem: | pos (4) | ksize (4) | pgid (8) |
//! ```
//!
//! ## Leaf Page
//! ```text
//! | header | elem 0 | ... | elem N-1 | k0 v0 | ... | kN-1 vN-1 |
//! elem: | flags (4) | pos (4) | ksize (4) | vsize (4) |
//! ```
//!
//! `pos` is relative to the element's own offset, not to the page start.

use bytes::{Buf, BufMut};

use crate::error::{BoltError, Result};

use super::{slice_at, Pgid};

pub const BRANCH_PAGE_ELEMENT_SIZE: usize = 16;
pub const LEAF_PAGE_ELEMENT_SIZE: usize = 16;
pub const BUCKET_HEADER_SIZE: usize = 16;

/// Leaf element flag marking the value as a bucket header
pub const BUCKET_LEAF_FLAG: u32 = 0x01;

fn data_range(elem_offset: usize, pos: u32, skip: u32, len: u32) -> Result<(usize, usize)> {
    elem_offset
        .checked_add(pos as usize)
        .and_then(|start| start.checked_add(skip as usize))
        .map(|start| (start, len as usize))
        .ok_or_else(|| BoltError::Corrupted("element offset overflow".to_string()))
}

// =============================================================================
// Branch Element
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BranchPageElement {
    pub pos: u32,
    pub ksize: u32,
    pub pgid: Pgid,
}

impl BranchPageElement {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut b = slice_at(buf, 0, BRANCH_PAGE_ELEMENT_SIZE)?;
        Ok(Self {
            pos: b.get_u32_le(),
            ksize: b.get_u32_le(),
            pgid: b.get_u64_le(),
        })
    }

    /// Caller supplies exactly `BRANCH_PAGE_ELEMENT_SIZE` bytes
    pub fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u32_le(self.pos);
        buf.put_u32_le(self.ksize);
        buf.put_u64_le(self.pgid);
    }

    /// Key bytes, given the page buffer and this element's offset in it
    pub fn key<'a>(&self, page: &'a [u8], elem_offset: usize) -> Result<&'a [u8]> {
        let (start, len) = data_range(elem_offset, self.pos, 0, self.ksize)?;
        slice_at(page, start, len)
    }
}

// =============================================================================
// Leaf Element
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeafPageElement {
    pub flags: u32,
    pub pos: u32,
    pub ksize: u32,
    pub vsize: u32,
}

impl LeafPageElement {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut b = slice_at(buf, 0, LEAF_PAGE_ELEMENT_SIZE)?;
        Ok(Self {
            flags: b.get_u32_le(),
            pos: b.get_u32_le(),
            ksize: b.get_u32_le(),
            vsize: b.get_u32_le(),
        })
    }

    /// Caller supplies exactly `LEAF_PAGE_ELEMENT_SIZE` bytes
    pub fn encode(&self, mut buf: &mut [u8]) {
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.pos);
        buf.put_u32_le(self.ksize);
        buf.put_u32_le(self.vsize);
    }

    pub fn is_bucket(&self) -> bool {
        self.flags & BUCKET_LEAF_FLAG != 0
    }

    pub fn key<'a>(&self, page: &'a [u8], elem_offset: usize) -> Result<&'a [u8]> {
        let (start, len) = data_range(elem_offset, self.pos, 0, self.ksize)?;
        slice_at(page, start, len)
    }

    /// Value bytes, which start right after the key
    pub fn value<'a>(&self, page: &'a [u8], elem_offset: usize) -> Result<&'a [u8]> {
        let (start, len) = data_range(elem_offset, self.pos, self.ksize, self.vsize)?;
        slice_at(page, start, len)
    }
}

// =============================================================================
// Bucket Header
// =============================================================================

/// On-file representation of a bucket, stored as the value of its key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BucketHeader {
    /// Root page of the bucket tree; 0 for an inline bucket
    pub root: Pgid,
    /// Monotonically incrementing, used for auto-increment keys
    pub sequence: u64,
}

impl BucketHeader {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut b = slice_at(buf, 0, BUCKET_HEADER_SIZE)?;
        Ok(Self {
            root: b.get_u64_le(),
            sequence: b.get_u64_le(),
        })
    }

    pub fn to_bytes(&self) -> [u8; BUCKET_HEADER_SIZE] {
        let mut out = [0u8; BUCKET_HEADER_SIZE];
        let mut w = &mut out[..];
        w.put_u64_le(self.root);
        w.put_u64_le(self.sequence);
        out
    }
}
