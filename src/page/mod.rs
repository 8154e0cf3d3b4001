//! Page Module
//!
//! Byte layout of database pages. A page is an owned, length-known buffer;
//! every header field, element and key is reached through a bound-checked
//! offset, never by reinterpreting memory.
//!
//! ## Page Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (16 bytes, little endian)                             │
//! │ ┌──────────┬───────────┬───────────┬──────────────┐          │
//! │ │ id (8)   │ flags (2) │ count (2) │ overflow (4) │          │
//! │ └──────────┴───────────┴───────────┴──────────────┘          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload (interpretation depends on flags)                    │
//! │   branch:   [BranchPageElement; count] keys...               │
//! │   leaf:     [LeafPageElement; count]   k1 v1 k2 v2 ...       │
//! │   meta:     Meta record (64 bytes)                           │
//! │   freelist: [u64; count] (or 0xFFFF + real count first)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod element;

pub use element::{
    BranchPageElement, BucketHeader, LeafPageElement, BRANCH_PAGE_ELEMENT_SIZE,
    BUCKET_HEADER_SIZE, BUCKET_LEAF_FLAG, LEAF_PAGE_ELEMENT_SIZE,
};

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::{BoltError, Result};
use crate::meta::Meta;

/// Page identifier. File offset = id * page_size.
pub type Pgid = u64;

/// Transaction identifier
pub type Txid = u64;

// =============================================================================
// Constants
// =============================================================================

/// Size of the fixed page header
pub const PAGE_HEADER_SIZE: usize = 16;

/// Page size used for new files when none is configured
pub const DEFAULT_PAGE_SIZE: usize = 4096;

// -----------------------------------------------------------------------------
// Format limits honored by the B+tree layer built on these pages
// -----------------------------------------------------------------------------

/// Fewest keys a branch or leaf page may hold before it is merged
pub const MIN_KEYS_PER_PAGE: usize = 2;

/// Maximum length of a key, in bytes
pub const MAX_KEY_SIZE: usize = 32768;

/// Maximum length of a value, in bytes
pub const MAX_VALUE_SIZE: usize = (1 << 31) - 2;

/// Bounds and default for the target occupancy of a page when splitting
pub const MIN_FILL_PERCENT: f64 = 0.1;
pub const MAX_FILL_PERCENT: f64 = 1.0;
pub const DEFAULT_FILL_PERCENT: f64 = 1.0;

/// `Meta::freelist` value when the free list is not persisted
pub const PGID_NO_FREELIST: Pgid = u64::MAX;

bitflags! {
    /// Page type bits stored in the header
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PageFlags: u16 {
        const BRANCH = 0x01;
        const LEAF = 0x02;
        const META = 0x04;
        const FREELIST = 0x10;
    }
}

/// Human readable page type for a set of flags
pub fn page_type(flags: PageFlags) -> String {
    if flags.contains(PageFlags::BRANCH) {
        "branch".to_string()
    } else if flags.contains(PageFlags::LEAF) {
        "leaf".to_string()
    } else if flags.contains(PageFlags::META) {
        "meta".to_string()
    } else if flags.contains(PageFlags::FREELIST) {
        "freelist".to_string()
    } else {
        format!("unknown<{:02x}>", flags.bits())
    }
}

/// Offset of the i-th branch element from the start of the page
pub fn branch_element_offset(index: usize) -> usize {
    PAGE_HEADER_SIZE + index * BRANCH_PAGE_ELEMENT_SIZE
}

/// Offset of the i-th leaf element from the start of the page
pub fn leaf_element_offset(index: usize) -> usize {
    PAGE_HEADER_SIZE + index * LEAF_PAGE_ELEMENT_SIZE
}

/// Borrow `len` bytes at `start`, failing instead of reading past the buffer
pub(crate) fn slice_at(buf: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    let end = start
        .checked_add(len)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| {
            BoltError::Corrupted(format!(
                "range {}+{} out of bounds for {} byte page",
                start,
                len,
                buf.len()
            ))
        })?;
    Ok(&buf[start..end])
}

fn slice_at_mut(buf: &mut [u8], start: usize, len: usize) -> Result<&mut [u8]> {
    let buf_len = buf.len();
    let end = start
        .checked_add(len)
        .filter(|&end| end <= buf_len)
        .ok_or_else(|| {
            BoltError::Corrupted(format!(
                "range {}+{} out of bounds for {} byte page",
                start, len, buf_len
            ))
        })?;
    Ok(&mut buf[start..end])
}

// =============================================================================
// Page Header
// =============================================================================

/// Decoded page header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageHeader {
    pub id: Pgid,
    pub flags: PageFlags,
    pub count: u16,
    pub overflow: u32,
}

impl PageHeader {
    /// Decode a header from the first 16 bytes of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut b = slice_at(buf, 0, PAGE_HEADER_SIZE)?;
        Ok(Self {
            id: b.get_u64_le(),
            flags: PageFlags::from_bits_retain(b.get_u16_le()),
            count: b.get_u16_le(),
            overflow: b.get_u32_le(),
        })
    }

    /// Encode the header into the first 16 bytes of `buf`
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        let mut w = slice_at_mut(buf, 0, PAGE_HEADER_SIZE)?;
        w.put_u64_le(self.id);
        w.put_u16_le(self.flags.bits());
        w.put_u16_le(self.count);
        w.put_u32_le(self.overflow);
        Ok(())
    }

    pub fn typ(&self) -> String {
        page_type(self.flags)
    }
}

/// Human readable information about a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub id: Pgid,
    pub typ: String,
    pub count: usize,
    pub overflow_count: usize,
}

// =============================================================================
// Page
// =============================================================================

/// An owned page buffer, possibly spanning several contiguous disk pages
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    buf: Vec<u8>,
}

impl Page {
    /// Allocate a zeroed run of `pages` disk pages starting at `id`
    pub fn new(id: Pgid, page_size: usize, pages: usize) -> Self {
        let pages = pages.max(1);
        let mut buf = vec![0u8; page_size.max(PAGE_HEADER_SIZE) * pages];
        buf[0..8].copy_from_slice(&id.to_le_bytes());
        buf[12..16].copy_from_slice(&((pages - 1) as u32).to_le_bytes());
        Self { buf }
    }

    /// Wrap bytes read from disk
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        if buf.len() < PAGE_HEADER_SIZE {
            return Err(BoltError::Corrupted(format!(
                "page buffer of {} bytes is smaller than the header",
                buf.len()
            )));
        }
        Ok(Self { buf })
    }

    pub fn header(&self) -> PageHeader {
        let mut b = &self.buf[..PAGE_HEADER_SIZE];
        PageHeader {
            id: b.get_u64_le(),
            flags: PageFlags::from_bits_retain(b.get_u16_le()),
            count: b.get_u16_le(),
            overflow: b.get_u32_le(),
        }
    }

    pub fn id(&self) -> Pgid {
        self.header().id
    }

    pub fn flags(&self) -> PageFlags {
        self.header().flags
    }

    pub fn count(&self) -> u16 {
        self.header().count
    }

    pub fn overflow(&self) -> u32 {
        self.header().overflow
    }

    pub fn set_id(&mut self, id: Pgid) {
        self.buf[0..8].copy_from_slice(&id.to_le_bytes());
    }

    pub fn set_flags(&mut self, flags: PageFlags) {
        self.buf[8..10].copy_from_slice(&flags.bits().to_le_bytes());
    }

    pub fn set_count(&mut self, count: u16) {
        self.buf[10..12].copy_from_slice(&count.to_le_bytes());
    }

    pub fn set_overflow(&mut self, overflow: u32) {
        self.buf[12..16].copy_from_slice(&overflow.to_le_bytes());
    }

    /// Page type: "branch", "leaf", "meta", "freelist" or "unknown<xx>"
    pub fn typ(&self) -> String {
        page_type(self.flags())
    }

    /// Whole buffer, header included
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Payload after the header
    pub fn data(&self) -> &[u8] {
        &self.buf[PAGE_HEADER_SIZE..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[PAGE_HEADER_SIZE..]
    }

    /// Total buffer length in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() <= PAGE_HEADER_SIZE
    }

    pub fn info(&self) -> PageInfo {
        let header = self.header();
        PageInfo {
            id: header.id,
            typ: header.typ(),
            count: header.count as usize,
            overflow_count: header.overflow as usize,
        }
    }

    /// Decode the payload as a meta record. Fails unless the meta flag is set.
    pub fn as_meta(&self) -> Result<Meta> {
        if !self.flags().contains(PageFlags::META) {
            return Err(BoltError::Invalid);
        }
        Meta::decode(self.data())
    }

    // -------------------------------------------------------------------------
    // Branch Elements
    // -------------------------------------------------------------------------

    pub fn branch_element(&self, index: usize) -> Result<BranchPageElement> {
        let offset = branch_element_offset(index);
        BranchPageElement::decode(slice_at(&self.buf, offset, BRANCH_PAGE_ELEMENT_SIZE)?)
    }

    /// All `count` branch elements
    pub fn branch_elements(&self) -> Result<Vec<BranchPageElement>> {
        (0..self.count() as usize)
            .map(|i| self.branch_element(i))
            .collect()
    }

    pub fn branch_key(&self, index: usize) -> Result<&[u8]> {
        let elem = self.branch_element(index)?;
        elem.key(&self.buf, branch_element_offset(index))
    }

    pub fn write_branch_element(&mut self, index: usize, elem: &BranchPageElement) -> Result<()> {
        let offset = branch_element_offset(index);
        elem.encode(slice_at_mut(&mut self.buf, offset, BRANCH_PAGE_ELEMENT_SIZE)?);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Leaf Elements
    // -------------------------------------------------------------------------

    pub fn leaf_element(&self, index: usize) -> Result<LeafPageElement> {
        let offset = leaf_element_offset(index);
        LeafPageElement::decode(slice_at(&self.buf, offset, LEAF_PAGE_ELEMENT_SIZE)?)
    }

    /// All `count` leaf elements
    pub fn leaf_elements(&self) -> Result<Vec<LeafPageElement>> {
        (0..self.count() as usize)
            .map(|i| self.leaf_element(i))
            .collect()
    }

    pub fn leaf_key(&self, index: usize) -> Result<&[u8]> {
        let elem = self.leaf_element(index)?;
        elem.key(&self.buf, leaf_element_offset(index))
    }

    pub fn leaf_value(&self, index: usize) -> Result<&[u8]> {
        let elem = self.leaf_element(index)?;
        elem.value(&self.buf, leaf_element_offset(index))
    }

    pub fn write_leaf_element(&mut self, index: usize, elem: &LeafPageElement) -> Result<()> {
        let offset = leaf_element_offset(index);
        elem.encode(slice_at_mut(&mut self.buf, offset, LEAF_PAGE_ELEMENT_SIZE)?);
        Ok(())
    }

    /// Copy `bytes` into the page at absolute offset `offset`
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        slice_at_mut(&mut self.buf, offset, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("header", &self.header())
            .field("len", &self.buf.len())
            .finish()
    }
}
