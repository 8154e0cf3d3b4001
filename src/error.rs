//! Error types for boltkv
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using BoltError
pub type Result<T> = std::result::Result<T, BoltError>;

/// Unified error type for boltkv operations
#[derive(Debug, Error)]
pub enum BoltError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Meta Errors
    // -------------------------------------------------------------------------
    /// Magic number mismatch, or a page that is not of the expected type
    #[error("invalid database")]
    Invalid,

    #[error("version mismatch")]
    VersionMismatch,

    #[error("checksum error")]
    Checksum,

    // -------------------------------------------------------------------------
    // Bucket Errors
    // -------------------------------------------------------------------------
    #[error("bucket not found")]
    NotFound,

    #[error("bucket already exists")]
    AlreadyExists,

    /// Bucket name is blank or longer than MAX_KEY_SIZE
    #[error("bucket name required")]
    InvalidName,

    #[error("incompatible value")]
    NotBucket,

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("timeout")]
    Timeout,

    #[error("tx not writable")]
    TxNotWritable,

    #[error("database is in read-only mode")]
    DatabaseReadOnly,

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Corrupted: {0}")]
    Corrupted(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
