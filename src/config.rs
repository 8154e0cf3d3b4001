//! Configuration for boltkv
//!
//! Options honored when a database file is opened. Parsing them from a file
//! or the environment is left to the embedding application; `Config` derives
//! serde so it can be loaded from whatever format that application uses.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::page::DEFAULT_PAGE_SIZE;

/// Main configuration for a boltkv database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Locking
    // -------------------------------------------------------------------------
    /// How long `begin_rw` waits for the writer lock.
    /// Zero waits indefinitely.
    pub timeout: Duration,

    // -------------------------------------------------------------------------
    // Durability
    // -------------------------------------------------------------------------
    /// Skip the fsync after growing the file
    pub no_grow_sync: bool,

    /// Don't persist the freelist page on commit.
    /// The free list is rebuilt by a full page scan on the next open.
    pub no_freelist_sync: bool,

    /// Skip every fsync (unsafe, for bulk loading and tests)
    pub no_sync: bool,

    // -------------------------------------------------------------------------
    // Storage Layout
    // -------------------------------------------------------------------------
    /// Allocation strategy for the free list
    pub freelist_type: FreeListType,

    /// Page size used when creating a new file.
    /// Existing files keep the page size recorded in their meta page.
    pub page_size: usize,

    /// Size the file is pre-grown to on creation (bytes, 0 = four pages)
    pub initial_mmap_size: usize,

    // -------------------------------------------------------------------------
    // Access Mode
    // -------------------------------------------------------------------------
    /// Open without write access; `begin_rw` fails
    pub read_only: bool,

    /// Lock data pages in memory
    pub mlock: bool,
}

/// Free list allocation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FreeListType {
    /// Sorted array of free page ids, first-fit linear scan
    #[default]
    Array,

    /// Span maps keyed by start, end and size
    HashMap,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            no_grow_sync: false,
            no_freelist_sync: false,
            no_sync: false,
            freelist_type: FreeListType::Array,
            page_size: DEFAULT_PAGE_SIZE,
            initial_mmap_size: 0,
            read_only: false,
            mlock: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the writer lock timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Skip fsync after growing the file
    pub fn no_grow_sync(mut self, value: bool) -> Self {
        self.config.no_grow_sync = value;
        self
    }

    /// Skip persisting the freelist page
    pub fn no_freelist_sync(mut self, value: bool) -> Self {
        self.config.no_freelist_sync = value;
        self
    }

    /// Skip every fsync
    pub fn no_sync(mut self, value: bool) -> Self {
        self.config.no_sync = value;
        self
    }

    /// Set the free list strategy
    pub fn freelist_type(mut self, typ: FreeListType) -> Self {
        self.config.freelist_type = typ;
        self
    }

    /// Set the page size for newly created files
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Set the initial file size for newly created files
    pub fn initial_mmap_size(mut self, size: usize) -> Self {
        self.config.initial_mmap_size = size;
        self
    }

    /// Open in read-only mode
    pub fn read_only(mut self, value: bool) -> Self {
        self.config.read_only = value;
        self
    }

    /// Request memory locking of data pages
    pub fn mlock(mut self, value: bool) -> Self {
        self.config.mlock = value;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
