//! Root bucket directory
//!
//! The top-level buckets of a database live as entries of a single leaf page
//! referenced by `Meta::root`. Each bucket entry carries `BUCKET_LEAF_FLAG`
//! and a 16 byte `BucketHeader` as its value.
//!
//! ```text
//! | header | elem 0 | ... | elem N-1 | name0 hdr0 | ... | nameN-1 hdrN-1 |
//! ```
//!
//! A transaction decodes the page into an ordered map, edits it in memory
//! and writes it to a freshly allocated page on commit.

use std::collections::BTreeMap;

use crate::error::{BoltError, Result};
use crate::page::{
    leaf_element_offset, BucketHeader, LeafPageElement, Page, PageFlags, Pgid, BUCKET_LEAF_FLAG,
    LEAF_PAGE_ELEMENT_SIZE, MAX_KEY_SIZE, PAGE_HEADER_SIZE,
};

/// A named top-level bucket as seen by a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    name: Vec<u8>,
    header: BucketHeader,
}

impl Bucket {
    pub(crate) fn new(name: Vec<u8>, header: BucketHeader) -> Self {
        Self { name, header }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Root page of the bucket's tree, 0 when the bucket is inline
    pub fn root(&self) -> Pgid {
        self.header.root
    }

    pub fn sequence(&self) -> u64 {
        self.header.sequence
    }

    pub fn header(&self) -> BucketHeader {
        self.header
    }
}

/// Bucket names must be non-empty and fit in a key
pub(crate) fn validate_name(name: &[u8]) -> Result<()> {
    if name.is_empty() || name.len() > MAX_KEY_SIZE {
        return Err(BoltError::InvalidName);
    }
    Ok(())
}

// =============================================================================
// Directory Entries
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RootEntry {
    Bucket(BucketHeader),
    /// Plain value at the top level; never created here, but tolerated
    Value(Vec<u8>),
}

impl RootEntry {
    fn flags(&self) -> u32 {
        match self {
            RootEntry::Bucket(_) => BUCKET_LEAF_FLAG,
            RootEntry::Value(_) => 0,
        }
    }

    fn value(&self) -> Vec<u8> {
        match self {
            RootEntry::Bucket(header) => header.to_bytes().to_vec(),
            RootEntry::Value(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RootBuckets {
    entries: BTreeMap<Vec<u8>, RootEntry>,
}

impl RootBuckets {
    /// Decode the directory from its leaf page
    pub fn read(page: &Page) -> Result<Self> {
        let flags = page.flags();
        if flags.contains(PageFlags::BRANCH) {
            return Err(BoltError::Corrupted(format!(
                "root directory page {} is a branch page",
                page.id()
            )));
        }
        if !flags.contains(PageFlags::LEAF) {
            return Err(BoltError::Invalid);
        }

        let mut entries = BTreeMap::new();
        for (i, elem) in page.leaf_elements()?.iter().enumerate() {
            let key = page.leaf_key(i)?.to_vec();
            let value = page.leaf_value(i)?;
            let entry = if elem.is_bucket() {
                RootEntry::Bucket(BucketHeader::decode(value)?)
            } else {
                RootEntry::Value(value.to_vec())
            };
            entries.insert(key, entry);
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, name: &[u8]) -> Option<&RootEntry> {
        self.entries.get(name)
    }

    pub fn bucket(&self, name: &[u8]) -> Option<Bucket> {
        match self.entries.get(name) {
            Some(RootEntry::Bucket(header)) => Some(Bucket::new(name.to_vec(), *header)),
            _ => None,
        }
    }

    /// Buckets in name order, skipping plain values
    pub fn buckets(&self) -> impl Iterator<Item = Bucket> + '_ {
        self.entries.iter().filter_map(|(name, entry)| match entry {
            RootEntry::Bucket(header) => Some(Bucket::new(name.clone(), *header)),
            RootEntry::Value(_) => None,
        })
    }

    pub fn insert(&mut self, name: Vec<u8>, header: BucketHeader) {
        self.entries.insert(name, RootEntry::Bucket(header));
    }

    pub fn remove(&mut self, name: &[u8]) -> Option<RootEntry> {
        self.entries.remove(name)
    }

    /// Bytes needed to serialize the directory, header included
    pub fn size(&self) -> usize {
        self.entries.iter().fold(
            PAGE_HEADER_SIZE + self.entries.len() * LEAF_PAGE_ELEMENT_SIZE,
            |acc, (name, entry)| acc + name.len() + entry.value().len(),
        )
    }

    /// Disk pages needed for the directory
    pub fn page_count(&self, page_size: usize) -> usize {
        self.size().div_ceil(page_size).max(1)
    }

    /// Serialize into `page` as a leaf page
    pub fn write(&self, page: &mut Page) -> Result<()> {
        let count = u16::try_from(self.len()).map_err(|_| {
            BoltError::Corrupted(format!(
                "{} top-level entries do not fit in one leaf page",
                self.len()
            ))
        })?;
        page.set_flags(PageFlags::LEAF);
        page.set_count(count);

        let mut data = leaf_element_offset(self.entries.len());
        for (i, (name, entry)) in self.entries.iter().enumerate() {
            let offset = leaf_element_offset(i);
            let value = entry.value();
            let elem = LeafPageElement {
                flags: entry.flags(),
                pos: (data - offset) as u32,
                ksize: name.len() as u32,
                vsize: value.len() as u32,
            };
            page.write_leaf_element(i, &elem)?;
            page.write_at(data, name)?;
            page.write_at(data + name.len(), &value)?;
            data += name.len() + value.len();
        }
        Ok(())
    }
}
