use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{FileStorage, MemoryStorage, Storage};

/// Configuration for the storage backend
///
/// # Examples
///
/// File-backed storage in RON config:
/// ```ron
/// MailSender (
///     storage: File(
///         path: "/var/lib/mailsender",
///     ),
/// )
/// ```
///
/// Memory-backed storage with a capacity limit:
/// ```ron
/// MailSender (
///     storage: Memory(
///         capacity: Some(1000),
///     ),
/// )
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub enum StorageConfig {
    /// Durable directory of records (production)
    File { path: PathBuf },
    /// Volatile storage (testing/development)
    Memory {
        /// Maximum number of letters to store (omit for unlimited)
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory { capacity: None }
    }
}

impl StorageConfig {
    /// Open the configured backend as a shared trait object
    ///
    /// # Errors
    /// Returns an error if a file store cannot be opened (invalid path,
    /// permissions, unreadable records)
    pub async fn into_storage(self) -> crate::Result<Arc<dyn Storage>> {
        let storage: Arc<dyn Storage> = match self {
            Self::File { path } => Arc::new(FileStorage::open(path).await?),
            Self::Memory { capacity } => Arc::new(
                capacity.map_or_else(MemoryStorage::new, MemoryStorage::with_capacity),
            ),
        };

        Ok(storage)
    }
}
