//! Transaction Module
//!
//! A transaction is a consistent view of the database bound to one meta
//! snapshot. Read-only transactions run concurrently; at most one writable
//! transaction exists at a time.
//!
//! ## Commit Protocol
//! ```text
//!   spill root directory ──▶ free old freelist ──▶ write new freelist
//!            │                                            │
//!            ▼                                            ▼
//!   grow file (sync) ──▶ write dirty pages (sync) ──▶ write meta slot (sync)
//!                                                         │
//!                                                         ▼
//!                        release writer ◀── publish meta to DB
//!                              │
//!                              ▼
//!                      run on_commit handlers
//! ```
//!
//! Nothing a writer does is visible until the meta write at the end. A
//! failure before that point rolls back the free list, reloads it from the
//! previous meta and leaves that meta as the current state.

mod bucket;
mod stats;

pub use bucket::Bucket;
pub use stats::TxStats;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use parking_lot::MutexGuard;

use crate::db::DB;
use crate::error::{BoltError, Result};
use crate::meta::Meta;
use crate::page::{BucketHeader, Page, PageFlags, PageInfo, Pgid, Txid, PGID_NO_FREELIST};

use bucket::{validate_name, RootBuckets, RootEntry};

type CommitHandler<'db> = Box<dyn FnOnce() + 'db>;

pub struct Tx<'db> {
    db: &'db DB,

    /// Snapshot taken at begin; a writer updates its copy as it commits
    meta: Meta,

    /// Held for the whole life of a writable transaction
    writer: Option<MutexGuard<'db, ()>>,

    /// Pages allocated by this transaction, written in id order on commit
    pages: BTreeMap<Pgid, Page>,

    root: RootBuckets,
    root_dirty: bool,

    stats: TxStats,
    commit_handlers: Vec<CommitHandler<'db>>,
    closed: bool,
}

impl<'db> Tx<'db> {
    /// Bind a transaction to `meta` and load its root directory
    pub(crate) fn begin(
        db: &'db DB,
        meta: Meta,
        writer: Option<MutexGuard<'db, ()>>,
    ) -> Result<Self> {
        let mut tx = Self {
            db,
            meta,
            writer,
            pages: BTreeMap::new(),
            root: RootBuckets::default(),
            root_dirty: false,
            stats: TxStats::default(),
            commit_handlers: Vec::new(),
            closed: false,
        };
        // on failure, dropping `tx` unregisters it
        if meta.root.root != 0 {
            let page = tx.read_page(meta.root.root)?;
            tx.root = RootBuckets::read(&page)?;
        }
        Ok(tx)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Snapshot txid; for a writer, the txid its commit will carry
    pub fn id(&self) -> Txid {
        self.meta.txid
    }

    pub fn db(&self) -> &'db DB {
        self.db
    }

    pub fn writable(&self) -> bool {
        self.writer.is_some()
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Bytes addressed by this snapshot
    pub fn size(&self) -> u64 {
        self.meta.pgid * self.db.page_size() as u64
    }

    pub fn stats(&self) -> TxStats {
        self.stats
    }

    /// Summary of page `id`, `None` past the high-water mark
    pub fn page(&self, id: Pgid) -> Result<Option<PageInfo>> {
        if id >= self.meta.pgid {
            return Ok(None);
        }
        let mut info = self.read_page(id)?.info();
        info.id = id;
        if self.db.freelist.lock().freed(id) {
            info.typ = "free".to_string();
        }
        Ok(Some(info))
    }

    // =========================================================================
    // Buckets
    // =========================================================================

    pub fn bucket(&self, name: &[u8]) -> Option<Bucket> {
        self.root.bucket(name)
    }

    /// Create an empty inline bucket
    pub fn create_bucket(&mut self, name: &[u8]) -> Result<Bucket> {
        self.ensure_writable()?;
        validate_name(name)?;
        if self.root.get(name).is_some() {
            return Err(BoltError::AlreadyExists);
        }
        Ok(self.insert_bucket(name))
    }

    pub fn create_bucket_if_not_exists(&mut self, name: &[u8]) -> Result<Bucket> {
        self.ensure_writable()?;
        validate_name(name)?;
        match self.root.get(name) {
            Some(RootEntry::Bucket(header)) => Ok(Bucket::new(name.to_vec(), *header)),
            Some(RootEntry::Value(_)) => Err(BoltError::NotBucket),
            None => Ok(self.insert_bucket(name)),
        }
    }

    /// Remove a bucket and free every page of its tree
    pub fn delete_bucket(&mut self, name: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let header = self.bucket_header(name)?;
        if header.root != 0 {
            self.free_tree(header.root)?;
        }
        self.root.remove(name);
        self.root_dirty = true;
        tracing::trace!(txid = self.meta.txid, root = header.root, "bucket deleted");
        Ok(())
    }

    /// Increment and return the bucket's sequence
    pub fn next_sequence(&mut self, name: &[u8]) -> Result<u64> {
        self.ensure_writable()?;
        let mut header = self.bucket_header(name)?;
        header.sequence += 1;
        self.root.insert(name.to_vec(), header);
        self.root_dirty = true;
        Ok(header.sequence)
    }

    /// Call `f` for every top-level bucket in name order, stopping at the
    /// first error
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &Bucket) -> Result<()>,
    {
        for bucket in self.root.buckets() {
            f(bucket.name(), &bucket)?;
        }
        Ok(())
    }

    fn insert_bucket(&mut self, name: &[u8]) -> Bucket {
        let header = BucketHeader::default();
        self.root.insert(name.to_vec(), header);
        self.root_dirty = true;
        Bucket::new(name.to_vec(), header)
    }

    fn bucket_header(&self, name: &[u8]) -> Result<BucketHeader> {
        match self.root.get(name) {
            Some(RootEntry::Bucket(header)) => Ok(*header),
            Some(RootEntry::Value(_)) => Err(BoltError::NotBucket),
            None => Err(BoltError::NotFound),
        }
    }

    /// Free `root` and every page below it, nested buckets included
    fn free_tree(&mut self, root: Pgid) -> Result<()> {
        let txid = self.meta.txid;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let page = self.read_page(id)?;
            let flags = page.flags();
            if flags.contains(PageFlags::BRANCH) {
                stack.extend(page.branch_elements()?.iter().map(|e| e.pgid));
            } else if flags.contains(PageFlags::LEAF) {
                for (i, elem) in page.leaf_elements()?.iter().enumerate() {
                    if elem.is_bucket() {
                        let nested = BucketHeader::decode(page.leaf_value(i)?)?;
                        if nested.root != 0 {
                            stack.push(nested.root);
                        }
                    }
                }
            }
            self.db.freelist.lock().free(txid, &page.header())?;
            self.pages.remove(&id);
        }
        Ok(())
    }

    // =========================================================================
    // Commit / Rollback
    // =========================================================================

    /// Register `f` to run after a successful commit
    pub fn on_commit(&mut self, f: impl FnOnce() + 'db) {
        self.commit_handlers.push(Box::new(f));
    }

    /// Write all changes and make them the current database state
    pub fn commit(mut self) -> Result<()> {
        if !self.writable() {
            return Err(BoltError::TxNotWritable);
        }

        if let Err(err) = self.commit_pages() {
            tracing::debug!(txid = self.meta.txid, error = %err, "commit failed, rolling back");
            self.rollback_pages();
            // the in-memory free list may disagree with disk; rebuild it
            // while the writer lock is still held
            self.db.reload_freelist();
            self.close();
            return Err(err);
        }

        tracing::debug!(
            txid = self.meta.txid,
            pgid = self.meta.pgid,
            freelist = self.meta.freelist,
            spill_time = ?self.stats.spill_time,
            write_time = ?self.stats.write_time,
            "tx committed"
        );

        let handlers = std::mem::take(&mut self.commit_handlers);
        self.close();
        for handler in handlers {
            handler();
        }
        Ok(())
    }

    /// Discard all changes. Never fails.
    pub fn rollback(mut self) {
        self.rollback_pages();
        self.close();
    }

    fn commit_pages(&mut self) -> Result<()> {
        let txid = self.meta.txid;
        let page_size = self.db.page_size();
        let opgid = self.meta.pgid;

        if self.root_dirty {
            self.spill_root()?;
        }

        if self.meta.freelist != PGID_NO_FREELIST {
            let header = self.read_page(self.meta.freelist)?.header();
            self.db.freelist.lock().free(txid, &header)?;
        }
        if self.db.config().no_freelist_sync {
            self.meta.freelist = PGID_NO_FREELIST;
        } else {
            self.commit_freelist()?;
        }

        if self.meta.pgid > opgid {
            self.db.grow(self.meta.pgid * page_size as u64)?;
        }

        self.write()?;
        self.write_meta()?;

        self.db.publish_meta(self.meta);
        Ok(())
    }

    /// Write the root directory to new pages and free the old ones
    fn spill_root(&mut self) -> Result<()> {
        let start = Instant::now();

        let count = self.root.page_count(self.db.page_size());
        let mut page = self.allocate(count);
        self.root.write(&mut page)?;

        let old = self.meta.root.root;
        if old != 0 {
            let header = self.read_page(old)?.header();
            self.db.freelist.lock().free(self.meta.txid, &header)?;
        }

        self.meta.root.root = page.id();
        self.pages.insert(page.id(), page);
        self.root_dirty = false;

        self.stats.spill += 1;
        self.stats.spill_time += start.elapsed();
        Ok(())
    }

    fn commit_freelist(&mut self) -> Result<()> {
        let size = self.db.freelist.lock().size();
        let mut page = self.allocate(size / self.db.page_size() + 1);
        self.db.freelist.lock().write(&mut page)?;
        self.meta.freelist = page.id();
        self.pages.insert(page.id(), page);
        Ok(())
    }

    /// Take `count` contiguous pages from the free list, or from the end of
    /// the file when no run is long enough
    fn allocate(&mut self, count: usize) -> Page {
        let txid = self.meta.txid;
        let page_size = self.db.page_size();

        let mut id = self.db.freelist.lock().allocate(txid, count);
        if id == 0 {
            id = self.meta.pgid;
            self.meta.pgid += count as Pgid;
        }
        tracing::trace!(txid, id, count, "page allocated");

        self.stats.page_count += count as i64;
        self.stats.page_alloc += (count * page_size) as i64;
        Page::new(id, page_size, count)
    }

    /// Flush dirty pages in id order
    fn write(&mut self) -> Result<()> {
        let start = Instant::now();
        let pages = std::mem::take(&mut self.pages);
        for page in pages.values() {
            self.db.write_page(page)?;
            self.stats.write += 1;
        }
        self.db.sync_data()?;
        self.stats.write_time += start.elapsed();
        Ok(())
    }

    fn write_meta(&mut self) -> Result<()> {
        let start = Instant::now();
        let mut page = Page::new(0, self.db.page_size(), 1);
        self.meta.write(&mut page)?;
        self.db.write_page(&page)?;
        self.db.sync_data()?;
        self.stats.write += 1;
        self.stats.write_time += start.elapsed();
        Ok(())
    }

    fn rollback_pages(&mut self) {
        if self.closed {
            return;
        }
        self.pages.clear();
        if self.writable() {
            self.db.freelist.lock().rollback(self.meta.txid);
            tracing::debug!(txid = self.meta.txid, "tx rolled back");
        }
    }

    /// Release the writer lock or unregister the reader
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.commit_handlers.clear();
        match self.writer.take() {
            Some(guard) => {
                drop(guard);
                self.db.close_rw(&self.stats);
            }
            None => self.db.remove_tx(self.meta.txid, &self.stats),
        }
    }

    // =========================================================================
    // Page Access
    // =========================================================================

    /// This transaction's copy of a page if it has one, otherwise the file's
    fn read_page(&self, id: Pgid) -> Result<Page> {
        match self.pages.get(&id) {
            Some(page) => Ok(page.clone()),
            None => self.db.read_page(id),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if !self.writable() {
            return Err(BoltError::TxNotWritable);
        }
        Ok(())
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.rollback_pages();
            self.close();
        }
    }
}

impl fmt::Debug for Tx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tx")
            .field("txid", &self.meta.txid)
            .field("writable", &self.writable())
            .field("dirty_pages", &self.pages.len())
            .finish()
    }
}
