//! Database Module
//!
//! Owns the data file and everything transactions share: the two meta
//! slots, the free list, the writer lock and the list of open readers.
//!
//! ## File Layout
//! ```text
//! ┌────────┬────────┬──────────┬───────────┬─────────────────────────┐
//! │ meta 0 │ meta 1 │ freelist │ root leaf │ data pages ...          │
//! │ page 0 │ page 1 │ page 2   │ page 3    │ (copy-on-write)         │
//! └────────┴────────┴──────────┴───────────┴─────────────────────────┘
//! ```
//! Page 2 and 3 only hold those roles in a fresh file; later commits move
//! the freelist and root directory to newly allocated pages.
//!
//! ## Concurrency Model: Single-Writer / Multiple-Reader
//!
//! - **Writer**: serialized by `rwlock`, acquired with a timeout
//! - **Readers**: never block; each registers its snapshot txid in `txs`
//!   so the writer knows which pending pages are still visible
//!
//! Lock order: `txs` → `metas` → `freelist` → `file`.

use std::collections::HashSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::config::Config;
use crate::error::{BoltError, Result};
use crate::freelist::FreeList;
use crate::meta::{Meta, META_SIZE};
use crate::page::{
    BucketHeader, Page, PageFlags, PageHeader, Pgid, Txid, PAGE_HEADER_SIZE, PGID_NO_FREELIST,
};
use crate::tx::{Tx, TxStats};

/// Page id of the free list in a freshly created file
const INIT_FREELIST_PGID: Pgid = 2;

/// Page id of the root directory in a freshly created file
const INIT_ROOT_PGID: Pgid = 3;

/// Pages in a freshly created file
const INIT_PAGE_COUNT: Pgid = 4;

// =============================================================================
// Stats
// =============================================================================

/// Database-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Free pages on the free list
    pub free_page_n: usize,
    /// Pages freed but still visible to some reader
    pub pending_page_n: usize,
    /// Bytes held by free and pending pages
    pub free_alloc: usize,
    /// Bytes used by the serialized free list
    pub freelist_inuse: usize,

    /// Read transactions started
    pub tx_n: u64,
    /// Read transactions currently open
    pub open_tx_n: usize,

    /// Accumulated statistics of closed transactions
    pub tx_stats: TxStats,
}

impl Stats {
    /// Difference between two snapshots; the free list gauges are taken
    /// from `self`
    pub fn sub(&self, other: &Stats) -> Stats {
        Stats {
            free_page_n: self.free_page_n,
            pending_page_n: self.pending_page_n,
            free_alloc: self.free_alloc,
            freelist_inuse: self.freelist_inuse,
            tx_n: self.tx_n.saturating_sub(other.tx_n),
            open_tx_n: self.open_tx_n,
            tx_stats: self.tx_stats.sub(&other.tx_stats),
        }
    }
}

// =============================================================================
// DB
// =============================================================================

pub struct DB {
    path: PathBuf,
    config: Config,
    page_size: usize,

    file: Mutex<File>,

    /// Last valid meta of each slot, as read at open and published by commits
    metas: RwLock<[Meta; 2]>,

    pub(crate) freelist: Mutex<FreeList>,

    /// Serializes writable transactions
    rwlock: Mutex<()>,

    /// Snapshot txids of open read transactions
    txs: Mutex<Vec<Txid>>,

    stats: Mutex<Stats>,
}

impl DB {
    /// Open the database at `path`, creating and initializing it if needed
    ///
    /// On startup:
    /// 1. Open (or create) the file
    /// 2. Write the four initial pages into an empty file
    /// 3. Detect the page size and read both meta slots
    /// 4. Pick the current meta; fail if neither slot validates
    /// 5. Load the free list from its page or by scanning reachable pages
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        validate_page_size(config.page_size)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(!config.read_only)
            .create(!config.read_only)
            .open(&path)?;

        if config.mlock {
            tracing::warn!(path = %path.display(), "mlock requested but pages are not memory mapped");
        }

        if file.metadata()?.len() == 0 {
            if config.read_only {
                return Err(BoltError::Invalid);
            }
            init_file(&mut file, &config)?;
            tracing::debug!(path = %path.display(), page_size = config.page_size, "initialized new database");
        }

        let page_size = detect_page_size(&mut file, config.page_size)?;
        let metas = [
            read_meta(&mut file, 0, page_size)?,
            read_meta(&mut file, 1, page_size)?,
        ];

        let db = Self {
            path,
            page_size,
            file: Mutex::new(file),
            metas: RwLock::new(metas),
            freelist: Mutex::new(FreeList::new(config.freelist_type)),
            rwlock: Mutex::new(()),
            txs: Mutex::new(Vec::new()),
            stats: Mutex::new(Stats::default()),
            config,
        };

        let meta = db.meta()?;
        let newest = if metas[1].txid > metas[0].txid { 1 } else { 0 };
        if meta != metas[newest] {
            tracing::warn!(
                slot = newest,
                txid = meta.txid,
                "newest meta slot is invalid, using previous commit"
            );
        }
        tracing::debug!(
            path = %db.path.display(),
            txid = meta.txid,
            pgid = meta.pgid,
            page_size,
            "opened database"
        );

        let synced = db.load_freelist(&meta)?;
        if !synced && !db.config.read_only && !db.config.no_freelist_sync {
            // persist the scanned free list so the next open can skip the scan
            db.begin_rw()?.commit()?;
        }
        Ok(db)
    }

    /// Returns whether the free list came from a freelist page
    fn load_freelist(&self, meta: &Meta) -> Result<bool> {
        let scan = meta.freelist == PGID_NO_FREELIST
            || (!self.config.read_only && self.config.no_freelist_sync);

        let mut freelist = self.freelist.lock();
        if scan {
            let ids = self.scan_free_pages(meta)?;
            tracing::debug!(free = ids.len(), "free list rebuilt by page scan");
            freelist.read_ids(ids);
            Ok(false)
        } else {
            let page = self.read_freelist_page(meta)?;
            freelist.read(&page)?;
            tracing::debug!(
                pgid = meta.freelist,
                free = freelist.free_count(),
                "free list loaded"
            );
            Ok(true)
        }
    }

    /// Freelist page of `meta`, checked against its high-water mark
    fn read_freelist_page(&self, meta: &Meta) -> Result<Page> {
        let page = self.read_page(meta.freelist)?;
        if let Some(&id) = FreeList::page_ids(&page)?.last() {
            if id >= meta.pgid {
                return Err(BoltError::Corrupted(format!(
                    "free page {} beyond high water mark {}",
                    id, meta.pgid
                )));
            }
        }
        Ok(page)
    }

    /// Rebuild the free list from the current meta after a failed commit.
    ///
    /// Pages still pending for open readers stay out of the free set. On
    /// error the in-memory rollback is kept.
    pub(crate) fn reload_freelist(&self) {
        let result = self.meta().and_then(|meta| {
            if meta.freelist == PGID_NO_FREELIST || self.config.no_freelist_sync {
                let ids = self.scan_free_pages(&meta)?;
                self.freelist.lock().no_sync_reload(ids);
            } else {
                let page = self.read_freelist_page(&meta)?;
                self.freelist.lock().reload(&page)?;
            }
            Ok(meta.txid)
        });
        match result {
            Ok(txid) => tracing::debug!(txid, "free list reloaded"),
            Err(err) => tracing::warn!(error = %err, "free list reload failed, keeping rollback state"),
        }
    }

    /// Every page below the high-water mark that no live structure references.
    ///
    /// Reachable: both meta pages, the freelist page (if any), the root
    /// directory and every bucket tree hanging off it.
    fn scan_free_pages(&self, meta: &Meta) -> Result<Vec<Pgid>> {
        let mut reachable: HashSet<Pgid> = HashSet::from([0, 1]);

        if meta.freelist != PGID_NO_FREELIST {
            let header = self.read_header(meta.freelist)?;
            reachable.extend(header.id..=header.id + header.overflow as Pgid);
        }

        let mut stack = Vec::new();
        if meta.root.root != 0 {
            stack.push(meta.root.root);
        }
        while let Some(id) = stack.pop() {
            if id >= meta.pgid {
                return Err(BoltError::Corrupted(format!(
                    "page {} beyond high water mark {}",
                    id, meta.pgid
                )));
            }
            if !reachable.insert(id) {
                return Err(BoltError::Corrupted(format!(
                    "page {} referenced more than once",
                    id
                )));
            }

            let page = self.read_page(id)?;
            reachable.extend(id + 1..=id + page.overflow() as Pgid);

            let flags = page.flags();
            if flags.contains(PageFlags::BRANCH) {
                stack.extend(page.branch_elements()?.iter().map(|e| e.pgid));
            } else if flags.contains(PageFlags::LEAF) {
                for (i, elem) in page.leaf_elements()?.iter().enumerate() {
                    if !elem.is_bucket() {
                        continue;
                    }
                    let header = BucketHeader::decode(page.leaf_value(i)?)?;
                    if header.root != 0 {
                        stack.push(header.root);
                    }
                }
            } else {
                return Err(BoltError::Corrupted(format!(
                    "page {}: unexpected {} page in a bucket tree",
                    id,
                    page.typ()
                )));
            }
        }

        Ok((2..meta.pgid).filter(|id| !reachable.contains(id)).collect())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current meta: the newest slot if it validates, otherwise the other one
    pub fn meta(&self) -> Result<Meta> {
        let metas = self.metas.read();
        let (newest, previous) = if metas[1].txid > metas[0].txid {
            (metas[1], metas[0])
        } else {
            (metas[0], metas[1])
        };
        match newest.validate() {
            Ok(()) => Ok(newest),
            Err(err) => previous.validate().map(|()| previous).map_err(|_| err),
        }
    }

    pub fn stats(&self) -> Stats {
        let open_tx_n = self.txs.lock().len();
        let mut stats = self.stats.lock().clone();
        let freelist = self.freelist.lock();
        stats.free_page_n = freelist.free_count();
        stats.pending_page_n = freelist.pending_count();
        stats.free_alloc = (stats.free_page_n + stats.pending_page_n) * self.page_size;
        stats.freelist_inuse = freelist.size();
        stats.open_tx_n = open_tx_n;
        stats
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Start a read-only transaction on the current snapshot
    pub fn begin(&self) -> Result<Tx<'_>> {
        let meta = {
            // registering under `txs` keeps free_pages from missing us
            let mut txs = self.txs.lock();
            let meta = self.meta()?;
            txs.push(meta.txid);
            meta
        };
        self.stats.lock().tx_n += 1;
        tracing::debug!(txid = meta.txid, "begin read tx");
        Tx::begin(self, meta, None)
    }

    /// Start the writable transaction, waiting up to `Config::timeout`
    pub fn begin_rw(&self) -> Result<Tx<'_>> {
        if self.config.read_only {
            return Err(BoltError::DatabaseReadOnly);
        }

        let guard = if self.config.timeout.is_zero() {
            self.rwlock.lock()
        } else {
            self.rwlock
                .try_lock_for(self.config.timeout)
                .ok_or(BoltError::Timeout)?
        };

        let mut meta = self.meta()?;
        meta.txid += 1;

        self.free_pages();
        tracing::debug!(txid = meta.txid, "begin write tx");
        Tx::begin(self, meta, Some(guard))
    }

    /// Run `f` in a writable transaction, committing on `Ok`
    pub fn update<'db, T>(&'db self, f: impl FnOnce(&mut Tx<'db>) -> Result<T>) -> Result<T> {
        let mut tx = self.begin_rw()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }

    /// Run `f` in a read-only transaction
    pub fn view<'db, T>(&'db self, f: impl FnOnce(&Tx<'db>) -> Result<T>) -> Result<T> {
        let tx = self.begin()?;
        let result = f(&tx);
        tx.rollback();
        result
    }

    /// Move pending pages no open reader can see into the free set
    fn free_pages(&self) {
        let txs = self.txs.lock();
        let mut readers = txs.clone();
        readers.sort_unstable();

        let mut freelist = self.freelist.lock();
        let mut minid = readers.first().copied().unwrap_or(Txid::MAX);
        if minid > 0 {
            freelist.release(minid - 1);
        }
        for t in readers {
            if t > 0 {
                freelist.release_range(minid, t - 1);
            }
            minid = t.saturating_add(1);
        }
        freelist.release_range(minid, Txid::MAX);
    }

    pub(crate) fn remove_tx(&self, txid: Txid, tx_stats: &TxStats) {
        {
            let mut txs = self.txs.lock();
            if let Some(pos) = txs.iter().position(|&t| t == txid) {
                txs.swap_remove(pos);
            }
        }
        self.stats.lock().tx_stats.add(tx_stats);
    }

    pub(crate) fn close_rw(&self, tx_stats: &TxStats) {
        self.stats.lock().tx_stats.add(tx_stats);
    }

    pub(crate) fn publish_meta(&self, meta: Meta) {
        let slot = crate::meta::meta_slot(meta.txid) as usize;
        self.metas.write()[slot] = meta;
    }

    // =========================================================================
    // File I/O
    // =========================================================================

    /// Read the page at `id` together with its overflow pages
    pub(crate) fn read_page(&self, id: Pgid) -> Result<Page> {
        let offset = self.page_offset(id)?;
        let mut file = self.file.lock();
        let mut buf = vec![0u8; self.page_size];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;

        let header = PageHeader::decode(&buf)?;
        if header.overflow > 0 {
            let file_len = file.metadata()?.len();
            let total = (header.overflow as usize + 1)
                .checked_mul(self.page_size)
                .filter(|&total| offset.saturating_add(total as u64) <= file_len)
                .ok_or_else(|| {
                    BoltError::Corrupted(format!(
                        "page {} overflow {} runs past the end of the file",
                        id, header.overflow
                    ))
                })?;
            buf.resize(total, 0);
            file.read_exact(&mut buf[self.page_size..])?;
        }
        Page::from_bytes(buf)
    }

    fn read_header(&self, id: Pgid) -> Result<PageHeader> {
        let offset = self.page_offset(id)?;
        let mut file = self.file.lock();
        let mut buf = [0u8; PAGE_HEADER_SIZE];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        PageHeader::decode(&buf)
    }

    pub(crate) fn write_page(&self, page: &Page) -> Result<()> {
        let offset = self.page_offset(page.id())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(page.as_bytes())?;
        Ok(())
    }

    /// Extend the file to at least `size` bytes
    pub(crate) fn grow(&self, size: u64) -> Result<()> {
        let file = self.file.lock();
        if file.metadata()?.len() >= size {
            return Ok(());
        }
        file.set_len(size)?;
        if !self.config.no_grow_sync && !self.config.no_sync {
            file.sync_all()?;
        }
        tracing::trace!(size, "file grown");
        Ok(())
    }

    /// fsync unless `no_sync` is set
    pub(crate) fn sync_data(&self) -> Result<()> {
        if self.config.no_sync {
            return Ok(());
        }
        self.file.lock().sync_data()?;
        Ok(())
    }

    /// Flush file contents to disk, regardless of `no_sync`
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    /// Close the database, syncing the file when writable
    pub fn close(self) -> Result<()> {
        if !self.config.read_only {
            self.file.lock().sync_all()?;
        }
        tracing::debug!(path = %self.path.display(), "closed database");
        Ok(())
    }

    fn page_offset(&self, id: Pgid) -> Result<u64> {
        id.checked_mul(self.page_size as u64)
            .ok_or_else(|| BoltError::Corrupted(format!("page id {} out of range", id)))
    }
}

impl fmt::Display for DB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DB<{:?}>", self.path)
    }
}

impl fmt::Debug for DB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DB")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .field("read_only", &self.config.read_only)
            .finish()
    }
}

// =============================================================================
// Open Helpers
// =============================================================================

fn validate_page_size(page_size: usize) -> Result<()> {
    if page_size < PAGE_HEADER_SIZE + META_SIZE || !page_size.is_power_of_two() {
        return Err(BoltError::Config(format!(
            "page size {} must be a power of two of at least {} bytes",
            page_size,
            PAGE_HEADER_SIZE + META_SIZE
        )));
    }
    Ok(())
}

/// Write both metas, an empty freelist and an empty root directory
fn init_file(file: &mut File, config: &Config) -> Result<()> {
    let page_size = config.page_size;
    let mut buf = Vec::with_capacity(page_size * INIT_PAGE_COUNT as usize);

    for txid in 0..2 {
        let mut page = Page::new(txid, page_size, 1);
        let mut meta = Meta::new(
            page_size as u32,
            txid,
            INIT_ROOT_PGID,
            INIT_FREELIST_PGID,
            INIT_PAGE_COUNT,
        );
        meta.write(&mut page)?;
        buf.extend_from_slice(page.as_bytes());
    }

    let mut freelist = Page::new(INIT_FREELIST_PGID, page_size, 1);
    freelist.set_flags(PageFlags::FREELIST);
    buf.extend_from_slice(freelist.as_bytes());

    let mut root = Page::new(INIT_ROOT_PGID, page_size, 1);
    root.set_flags(PageFlags::LEAF);
    buf.extend_from_slice(root.as_bytes());

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&buf)?;
    let size = (buf.len() as u64).max(config.initial_mmap_size as u64);
    file.set_len(size)?;
    file.sync_all()?;
    Ok(())
}

/// Page size recorded in the first meta slot that validates, or `fallback`.
///
/// Slot 1 can only be found at `fallback` bytes into the file.
fn detect_page_size(file: &mut File, fallback: usize) -> Result<usize> {
    for offset in [0, fallback as u64] {
        let mut buf = [0u8; PAGE_HEADER_SIZE + META_SIZE];
        file.seek(SeekFrom::Start(offset))?;
        if file.read_exact(&mut buf).is_err() {
            continue;
        }
        let Ok(meta) = Meta::decode(&buf[PAGE_HEADER_SIZE..]) else {
            continue;
        };
        if meta.validate().is_ok() && validate_page_size(meta.page_size as usize).is_ok() {
            return Ok(meta.page_size as usize);
        }
    }
    Ok(fallback)
}

/// Meta of `slot`; an unreadable slot yields an empty meta that fails
/// validation
fn read_meta(file: &mut File, slot: Pgid, page_size: usize) -> Result<Meta> {
    let mut buf = [0u8; PAGE_HEADER_SIZE + META_SIZE];
    file.seek(SeekFrom::Start(slot * page_size as u64))?;
    if let Err(err) = file.read_exact(&mut buf) {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            tracing::debug!(slot, "meta slot past end of file");
            return Ok(Meta::default());
        }
        return Err(err.into());
    }
    Meta::decode(&buf[PAGE_HEADER_SIZE..])
}
