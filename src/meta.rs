//! Meta page
//!
//! The database header. Two copies live on pages 0 and 1; a commit writes
//! the slot chosen by `txid % 2`, so the previous header stays intact until
//! the new one is synced.
//!
//! ## Record Format (64 bytes, little endian)
//! ```text
//! ┌───────┬─────────┬───────────┬───────┬──────────────────┬──────────┬──────┬──────┬──────────┐
//! │magic 4│version 4│page_size 4│flags 4│root 8 | seq 8    │freelist 8│pgid 8│txid 8│checksum 8│
//! └───────┴─────────┴───────────┴───────┴──────────────────┴──────────┴──────┴──────┴──────────┘
//! ```
//! `checksum` is FNV-1a over the 56 bytes before it.

use bytes::{Buf, BufMut};
use fnv_rs::{Fnv64, FnvHasher};

use crate::error::{BoltError, Result};
use crate::page::{slice_at, BucketHeader, Page, PageFlags, Pgid, Txid, PAGE_HEADER_SIZE};

/// Identifies a boltkv database file
pub const MAGIC: u32 = 0xED0CDAED;

/// Data file format version
pub const VERSION: u32 = 2;

/// Encoded size of a meta record
pub const META_SIZE: usize = 64;

/// Offset of the checksum field; everything before it is hashed
pub const CHECKSUM_OFFSET: usize = 56;

/// Page that holds the meta for `txid`
pub fn meta_slot(txid: Txid) -> Pgid {
    txid % 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Meta {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    pub flags: u32,
    pub root: BucketHeader,
    pub freelist: Pgid,
    /// High-water mark: number of pages in the file
    pub pgid: Pgid,
    pub txid: Txid,
    pub checksum: u64,
}

impl Meta {
    /// Fresh meta for a newly created file
    pub fn new(page_size: u32, txid: Txid, root: Pgid, freelist: Pgid, pgid: Pgid) -> Self {
        let mut meta = Self {
            magic: MAGIC,
            version: VERSION,
            page_size,
            flags: 0,
            root: BucketHeader { root, sequence: 0 },
            freelist,
            pgid,
            txid,
            checksum: 0,
        };
        meta.checksum = meta.sum64();
        meta
    }

    /// Check magic, version and checksum, in that order.
    /// A zero checksum means "unset" and is accepted.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(BoltError::Invalid);
        }
        if self.version != VERSION {
            return Err(BoltError::VersionMismatch);
        }
        if self.checksum != 0 && self.checksum != self.sum64() {
            return Err(BoltError::Checksum);
        }
        Ok(())
    }

    /// FNV-1a 64 over every field before `checksum`
    pub fn sum64(&self) -> u64 {
        let mut hasher = Fnv64::new();
        hasher.update(&self.encode()[..CHECKSUM_OFFSET]);
        u64::from(hasher)
    }

    /// Stamp `page` as this meta's slot, refresh the checksum and copy the
    /// record into the page payload.
    pub fn write(&mut self, page: &mut Page) -> Result<()> {
        page.set_id(meta_slot(self.txid));
        page.set_flags(page.flags() | PageFlags::META);

        self.checksum = self.sum64();

        page.write_at(PAGE_HEADER_SIZE, &self.encode())
    }

    pub fn encode(&self) -> [u8; META_SIZE] {
        let mut out = [0u8; META_SIZE];
        let mut w = &mut out[..];
        w.put_u32_le(self.magic);
        w.put_u32_le(self.version);
        w.put_u32_le(self.page_size);
        w.put_u32_le(self.flags);
        w.put_slice(&self.root.to_bytes());
        w.put_u64_le(self.freelist);
        w.put_u64_le(self.pgid);
        w.put_u64_le(self.txid);
        w.put_u64_le(self.checksum);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut b = slice_at(buf, 0, META_SIZE)?;
        let magic = b.get_u32_le();
        let version = b.get_u32_le();
        let page_size = b.get_u32_le();
        let flags = b.get_u32_le();
        let root = BucketHeader::decode(&b[..])?;
        b.advance(crate::page::BUCKET_HEADER_SIZE);
        Ok(Self {
            magic,
            version,
            page_size,
            flags,
            root,
            freelist: b.get_u64_le(),
            pgid: b.get_u64_le(),
            txid: b.get_u64_le(),
            checksum: b.get_u64_le(),
        })
    }
}
