//! # boltkv
//!
//! Storage core of an embedded, single-file, transactional key-value store:
//! - Fixed-size pages with a little-endian on-disk format
//! - Two checksummed meta pages, written alternately by each commit
//! - Copy-on-write commits with deferred page reclamation
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                            DB                               │
//! │        (writer lock, open readers, meta slots, stats)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ begin / begin_rw
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Transaction                            │
//! │      (meta snapshot, root buckets, dirty pages, stats)      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  FreeList   │          │    Meta     │
//!   │ (pending →  │          │ (txid % 2,  │
//!   │   release)  │          │  checksum)  │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          └───────────┬────────────┘
//!                      ▼
//!              ┌─────────────┐
//!              │    Page     │
//!              │  (codec)    │
//!              └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod page;
pub mod meta;
pub mod freelist;
pub mod tx;
pub mod db;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{BoltError, Result};
pub use config::{Config, FreeListType};
pub use db::{Stats, DB};
pub use freelist::FreeList;
pub use meta::Meta;
pub use page::{Page, PageInfo, Pgid, Txid};
pub use tx::{Bucket, Tx, TxStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of boltkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
