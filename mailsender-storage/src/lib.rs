//! Persistence for queued letters.
//!
//! The [`Storage`] trait is the only way the rest of mailsender reads or
//! changes a letter's status. Backends are picked at startup through
//! [`StorageConfig`].

pub mod backends;
pub mod config;
pub mod error;
pub mod storage;

pub use backends::{FileStorage, MemoryStorage, TestStorage};
pub use config::StorageConfig;
pub use error::{Result, SerializationError, StorageError, ValidationError};
pub use storage::Storage;
