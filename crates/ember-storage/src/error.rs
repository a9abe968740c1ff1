//! Error types for the storage layer.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB error.
    #[error("database error: {0}")]
    Database(#[from] rocksdb::Error),

    /// Value encoding or decoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Column family not found.
    #[error("column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Structure used before opening or after closing.
    #[error("store is not open")]
    NotOpen,

    /// Background initialization failed.
    #[error("initialization failed: {0}")]
    InitFailed(String),

    /// In-memory index out of step with the persisted data.
    #[error("data corruption detected: {0}")]
    Corruption(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
