//! Error types for the mailsender-storage crate.
//!
//! Storage errors are never fatal to the queue loop once it is running; they
//! are logged and the affected operation is skipped. They only abort startup,
//! when a backend cannot be opened at all.

use std::io;

use mailsender_common::JobId;
use thiserror::Error;

/// Top-level storage error type.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O operation failed (file read/write/rename).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// No letter with this ID exists.
    #[error("Letter not found: {0}")]
    NotFound(JobId),

    /// A letter with this ID was already created.
    #[error("Letter already exists: {0}")]
    AlreadyExists(JobId),

    /// Storage directory validation failed.
    #[error("Storage validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The store has been closed and accepts no further operations.
    #[error("Storage is closed")]
    Closed,

    /// Internal error (lock poisoning, capacity, injected failures).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// A record decoded cleanly but does not belong to the file it was read from.
    #[error("Corrupted record: {0}")]
    Corrupted(String),
}

/// Storage directory validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Storage path cannot contain '..' components: {0}")]
    ParentDir(String),

    #[error("Storage path must be absolute: {0}")]
    NotAbsolute(String),

    #[error("Storage path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: String, path: String },

    #[error("Storage path is not a directory: {0}")]
    NotDirectory(String),
}

/// Specialized `Result` type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

impl From<bincode::error::EncodeError> for StorageError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(e.into())
    }
}

impl From<bincode::error::DecodeError> for StorageError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(e.into())
    }
}
