//! FreeList Module
//!
//! Tracks which pages can be handed out next and which pages were freed by a
//! writer but may still be visible to an open reader.
//!
//! ## Page States
//! ```text
//!            allocate               free(txid)             release
//!   free ────────────▶ allocs ──────────────▶ pending ───────────────▶ free
//!     ▲                  │                       │
//!     │  rollback(txid)  │     rollback(txid)    │
//!     └──────────────────┘  ◀────────────────────┘ (back to allocs)
//! ```
//!
//! The set of free ids is owned by a `FreePages` strategy chosen once at
//! construction: a sorted array, or span maps that coalesce neighbours.

mod array;
mod hashmap;

pub use array::ArrayFreePages;
pub use hashmap::HashMapFreePages;

use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::{Buf, BufMut};

use crate::config::FreeListType;
use crate::error::{BoltError, Result};
use crate::page::{slice_at, Page, PageFlags, PageHeader, Pgid, Txid, PAGE_HEADER_SIZE};

/// Header `count` value meaning "real count is stored in the first element"
const COUNT_OVERFLOW: usize = 0xFFFF;

const PGID_SIZE: usize = std::mem::size_of::<Pgid>();

/// Storage strategy for immediately allocatable page ids.
///
/// All five operations come from the same implementation for the life of a
/// `FreeList`.
pub trait FreePages: Send {
    /// First id of `n` contiguous free pages, removed from the set.
    /// Returns 0 when no such run exists.
    fn allocate(&mut self, n: usize) -> Pgid;

    fn free_count(&self) -> usize;

    /// Add ids to the free set, joining adjacent runs
    fn merge_spans(&mut self, ids: &[Pgid]);

    /// All free ids in ascending order
    fn free_page_ids(&self) -> Vec<Pgid>;

    /// Replace the free set with `ids` (ascending)
    fn read_ids(&mut self, ids: Vec<Pgid>);
}

/// Pages freed by one transaction, waiting until no reader can see them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxPending {
    pub ids: Vec<Pgid>,
    /// Transaction that allocated `ids[i]`, 0 if unknown
    pub alloc_txs: Vec<Txid>,
    /// `begin` of the last `release_range` pass over this entry
    pub last_release_begin: Txid,
}

pub struct FreeList {
    typ: FreeListType,
    pages: Box<dyn FreePages>,
    /// Owning transaction of each page allocated from the free list
    allocs: HashMap<Pgid, Txid>,
    pending: BTreeMap<Txid, TxPending>,
    /// Every free or pending id
    cache: HashSet<Pgid>,
}

impl FreeList {
    /// Create an empty free list using the given strategy
    pub fn new(typ: FreeListType) -> Self {
        let pages: Box<dyn FreePages> = match typ {
            FreeListType::Array => Box::<ArrayFreePages>::default(),
            FreeListType::HashMap => Box::<HashMapFreePages>::default(),
        };
        Self {
            typ,
            pages,
            allocs: HashMap::new(),
            pending: BTreeMap::new(),
            cache: HashSet::new(),
        }
    }

    pub fn freelist_type(&self) -> FreeListType {
        self.typ
    }

    // =========================================================================
    // Counts
    // =========================================================================

    /// Size of the freelist page once serialized
    pub fn size(&self) -> usize {
        let mut n = self.count();
        if n >= COUNT_OVERFLOW {
            // first element holds the real count
            n += 1;
        }
        PAGE_HEADER_SIZE + PGID_SIZE * n
    }

    /// Free plus pending pages
    pub fn count(&self) -> usize {
        self.free_count() + self.pending_count()
    }

    /// Immediately allocatable pages
    pub fn free_count(&self) -> usize {
        self.pages.free_count()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(|txp| txp.ids.len()).sum()
    }

    pub fn free_page_ids(&self) -> Vec<Pgid> {
        self.pages.free_page_ids()
    }

    pub fn pending(&self) -> &BTreeMap<Txid, TxPending> {
        &self.pending
    }

    pub fn allocs(&self) -> &HashMap<Pgid, Txid> {
        &self.allocs
    }

    /// Whether `pgid` is free or pending
    pub fn freed(&self, pgid: Pgid) -> bool {
        self.cache.contains(&pgid)
    }

    /// Every free and pending id, sorted
    pub fn copy_all(&self) -> Vec<Pgid> {
        let mut ids = self.pages.free_page_ids();
        ids.reserve(self.pending_count());
        for txp in self.pending.values() {
            ids.extend_from_slice(&txp.ids);
        }
        ids.sort_unstable();
        ids
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Take `n` contiguous pages for `txid`.
    ///
    /// Returns 0 when no run is long enough; the caller grows the file.
    pub fn allocate(&mut self, txid: Txid, n: usize) -> Pgid {
        if n == 0 {
            return 0;
        }
        let start = self.pages.allocate(n);
        if start == 0 {
            return 0;
        }
        for id in start..start + n as Pgid {
            self.allocs.insert(id, txid);
            self.cache.remove(&id);
        }
        tracing::trace!(txid, start, n, "allocated from freelist");
        start
    }

    /// Move the page (and its overflow) into `txid`'s pending list
    pub fn free(&mut self, txid: Txid, header: &PageHeader) -> Result<()> {
        if header.id <= 1 {
            return Err(BoltError::Invalid);
        }
        let last = header.id + header.overflow as Pgid;
        if let Some(id) = (header.id..=last).find(|id| self.cache.contains(id)) {
            return Err(BoltError::Corrupted(format!("page {} already freed", id)));
        }

        let owner = self.allocs.get(&header.id).copied();
        let fallback = if header.flags.contains(PageFlags::FREELIST) {
            // freelist pages written before this process started
            txid.saturating_sub(1)
        } else {
            0
        };

        let txp = self.pending.entry(txid).or_default();
        for id in header.id..=last {
            let alloc_tx = self.allocs.remove(&id).or(owner).unwrap_or(fallback);
            txp.ids.push(id);
            txp.alloc_txs.push(alloc_tx);
            self.cache.insert(id);
        }
        tracing::trace!(txid, pgid = header.id, overflow = header.overflow, "page freed");
        Ok(())
    }

    /// Make every page freed by a transaction `<= txid` allocatable
    pub fn release(&mut self, txid: Txid) {
        let remaining = match txid.checked_add(1) {
            Some(next) => self.pending.split_off(&next),
            None => BTreeMap::new(),
        };
        let released = std::mem::replace(&mut self.pending, remaining);

        let mut ids: Vec<Pgid> = released.into_values().flat_map(|txp| txp.ids).collect();
        if ids.is_empty() {
            return;
        }
        ids.sort_unstable();
        tracing::trace!(txid, count = ids.len(), "released pending pages");
        self.pages.merge_spans(&ids);
    }

    /// Release pages that were both allocated and freed by transactions in
    /// `[begin, end]`. No reader can observe them: none started in between.
    pub fn release_range(&mut self, begin: Txid, end: Txid) {
        if begin > end {
            return;
        }
        let mut ids = Vec::new();
        let mut emptied = Vec::new();
        for (&tid, txp) in self.pending.range_mut(begin..=end) {
            if txp.last_release_begin == begin {
                continue;
            }
            let mut i = 0;
            while i < txp.ids.len() {
                let atx = txp.alloc_txs[i];
                if atx < begin || atx > end {
                    i += 1;
                    continue;
                }
                ids.push(txp.ids.swap_remove(i));
                txp.alloc_txs.swap_remove(i);
            }
            txp.last_release_begin = begin;
            if txp.ids.is_empty() {
                emptied.push(tid);
            }
        }
        for tid in emptied {
            self.pending.remove(&tid);
        }
        if ids.is_empty() {
            return;
        }
        ids.sort_unstable();
        tracing::trace!(begin, end, count = ids.len(), "released pending range");
        self.pages.merge_spans(&ids);
    }

    /// Undo everything `txid` did to the free list.
    ///
    /// Its pending frees are dropped (the pages return to their previous
    /// owners) and pages it allocated from the free list become free again.
    pub fn rollback(&mut self, txid: Txid) {
        if let Some(txp) = self.pending.remove(&txid) {
            for (id, alloc_tx) in txp.ids.into_iter().zip(txp.alloc_txs) {
                self.cache.remove(&id);
                if alloc_tx != 0 {
                    self.allocs.insert(id, alloc_tx);
                }
            }
        }

        let mut reclaimed: Vec<Pgid> = self
            .allocs
            .iter()
            .filter(|&(_, &owner)| owner == txid)
            .map(|(&id, _)| id)
            .collect();
        if reclaimed.is_empty() {
            return;
        }
        reclaimed.sort_unstable();
        for id in &reclaimed {
            self.allocs.remove(id);
            self.cache.insert(*id);
        }
        self.pages.merge_spans(&reclaimed);
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Initialize from a freelist page
    pub fn read(&mut self, page: &Page) -> Result<()> {
        let ids = Self::page_ids(page)?;
        self.read_ids(ids);
        Ok(())
    }

    /// Decode the sorted ids stored on a freelist page.
    ///
    /// Meta page ids are never free, so a page listing 0 or 1 is corrupt.
    pub fn page_ids(page: &Page) -> Result<Vec<Pgid>> {
        if !page.flags().contains(PageFlags::FREELIST) {
            return Err(BoltError::Invalid);
        }
        let data = page.data();
        let mut count = page.count() as usize;
        let mut skip = 0;
        if count == COUNT_OVERFLOW {
            let mut b = slice_at(data, 0, PGID_SIZE)?;
            count = usize::try_from(b.get_u64_le()).map_err(|_| {
                BoltError::Corrupted("freelist count does not fit in memory".to_string())
            })?;
            skip = 1;
        }

        let len = count
            .checked_mul(PGID_SIZE)
            .ok_or_else(|| BoltError::Corrupted("freelist count overflow".to_string()))?;
        let mut b = slice_at(data, skip * PGID_SIZE, len)?;
        let mut ids = Vec::with_capacity(count);
        while b.has_remaining() {
            let id = b.get_u64_le();
            if id < 2 {
                return Err(BoltError::Corrupted(format!(
                    "freelist page {} lists meta page {}",
                    page.id(),
                    id
                )));
            }
            ids.push(id);
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Initialize the free set from a list of ids
    pub fn read_ids(&mut self, mut ids: Vec<Pgid>) {
        ids.sort_unstable();
        self.pages.read_ids(ids);
        self.reindex();
    }

    /// Serialize free and pending ids into `page`.
    ///
    /// Pending ids are included so that they come back as free after a
    /// crash, when no reader survives.
    pub fn write(&self, page: &mut Page) -> Result<()> {
        let ids = self.copy_all();
        page.set_flags(page.flags() | PageFlags::FREELIST);

        let mut buf = Vec::with_capacity(self.size() - PAGE_HEADER_SIZE);
        if ids.len() < COUNT_OVERFLOW {
            page.set_count(ids.len() as u16);
        } else {
            page.set_count(COUNT_OVERFLOW as u16);
            buf.put_u64_le(ids.len() as u64);
        }
        for id in &ids {
            buf.put_u64_le(*id);
        }
        page.write_at(PAGE_HEADER_SIZE, &buf)
    }

    /// Re-read a freelist page, keeping pages that are still pending out of
    /// the free set
    pub fn reload(&mut self, page: &Page) -> Result<()> {
        let ids = Self::page_ids(page)?;
        self.no_sync_reload(ids);
        Ok(())
    }

    /// Rebuild the free set from scanned ids, minus pending ones
    pub fn no_sync_reload(&mut self, ids: Vec<Pgid>) {
        let pending: HashSet<Pgid> = self
            .pending
            .values()
            .flat_map(|txp| txp.ids.iter().copied())
            .collect();
        let ids = ids.into_iter().filter(|id| !pending.contains(id)).collect();
        self.read_ids(ids);
    }

    fn reindex(&mut self) {
        self.cache = self.pages.free_page_ids().into_iter().collect();
        for txp in self.pending.values() {
            self.cache.extend(txp.ids.iter().copied());
        }
    }
}

impl std::fmt::Debug for FreeList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeList")
            .field("type", &self.typ)
            .field("free", &self.free_count())
            .field("pending", &self.pending_count())
            .field("allocs", &self.allocs.len())
            .finish()
    }
}
