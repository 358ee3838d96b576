use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use mailsender_common::{JobId, Letter, Status, internal};
use tokio::{fs, sync::Mutex};

use crate::{SerializationError, Storage, StorageError, ValidationError};

const RECORD_EXTENSION: &str = ".bin";
const TEMP_PREFIX: &str = ".tmp_";

/// File-based storage implementation
///
/// Every letter is one bincode record named `{id}.bin` inside a directory.
/// Record names are ULIDs, so a directory listing sorted by name is creation
/// order and survives restarts unchanged.
///
/// An in-memory index of `id -> status` is rebuilt from the directory on
/// [`FileStorage::open`]. The index lives behind an async mutex that is held
/// for the whole of each operation, including its file I/O, so operations
/// are serialized and [`Storage::claim_one`] is atomic.
///
/// # Atomicity
/// Records are written to `.tmp_{id}.bin` and then renamed over the final
/// name, so a crash never leaves a half-written record behind. Stray
/// temporary files are removed on open.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    index: Arc<Mutex<BTreeMap<JobId, Status>>>,
    closed: Arc<AtomicBool>,
}

impl FileStorage {
    /// Validate a storage path
    ///
    /// Rejects paths containing `..`, relative paths and paths inside
    /// system directories.
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn validate_path(path: &Path) -> Result<(), ValidationError> {
        if path
            .components()
            .any(|component| component == Component::ParentDir)
        {
            return Err(ValidationError::ParentDir(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        let sensitive_prefixes = [
            "/etc",
            "/bin",
            "/sbin",
            "/usr/bin",
            "/usr/sbin",
            "/boot",
            "/sys",
            "/proc",
            "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::SystemDirectory {
                prefix: (*prefix).to_string(),
                path: path.display().to_string(),
            });
        }

        Ok(())
    }

    /// Open (or create) a file store rooted at `path`
    ///
    /// Creates the directory if needed, removes leftover temporary files and
    /// rebuilds the status index from the records on disk.
    ///
    /// # Errors
    /// - If the path fails validation or exists but is not a directory
    /// - If the directory cannot be created or read
    /// - If a record cannot be decoded
    pub async fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        Self::validate_path(&path)?;

        internal!("Opening file storage at {}", path.display());

        if !fs::try_exists(&path).await? {
            internal!("{} does not exist, creating...", path.display());
            fs::create_dir_all(&path).await?;
        } else if !fs::metadata(&path).await?.is_dir() {
            return Err(ValidationError::NotDirectory(path.display().to_string()).into());
        }

        let mut index = BTreeMap::new();
        let mut cleaned = 0;
        let mut entries = fs::read_dir(&path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.starts_with(TEMP_PREFIX) {
                fs::remove_file(entry.path()).await?;
                cleaned += 1;
                continue;
            }

            let Some(id) = id_from_filename(&filename) else {
                continue;
            };

            let letter = read_record(&entry.path()).await?;
            if letter.id != id {
                return Err(SerializationError::Corrupted(format!(
                    "{filename} holds letter {}",
                    letter.id
                ))
                .into());
            }

            index.insert(id, letter.status);
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned temporary files from {}",
                path.display()
            );
        }

        internal!(
            level = DEBUG,
            "Loaded {} letters from {}",
            index.len(),
            path.display()
        );

        Ok(Self {
            path,
            index: Arc::new(Mutex::new(index)),
            closed: Arc::default(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_path(&self, id: &JobId) -> PathBuf {
        self.path.join(format!("{id}{RECORD_EXTENSION}"))
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    async fn write_record(&self, letter: &Letter) -> crate::Result<()> {
        let encoded = bincode::serde::encode_to_vec(letter, bincode::config::standard())?;

        let final_path = self.record_path(&letter.id);
        let temp_path = self
            .path
            .join(format!("{TEMP_PREFIX}{}{RECORD_EXTENSION}", letter.id));

        fs::write(&temp_path, &encoded).await?;
        fs::rename(&temp_path, &final_path).await?;

        Ok(())
    }

    async fn set_status(&self, id: &JobId, status: Status) -> crate::Result<Letter> {
        let mut letter = read_record(&self.record_path(id)).await?;
        letter.status = status;
        self.write_record(&letter).await?;
        Ok(letter)
    }
}

/// Parse a record filename back into its letter ID
///
/// Only `{ulid}.bin` names are accepted; anything with path separators or
/// traversal patterns is ignored.
fn id_from_filename(filename: &str) -> Option<JobId> {
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return None;
    }

    filename.strip_suffix(RECORD_EXTENSION)?.parse().ok()
}

async fn read_record(path: &Path) -> crate::Result<Letter> {
    let content = fs::read(path).await?;
    let (letter, _) = bincode::serde::decode_from_slice(&content, bincode::config::standard())?;
    Ok(letter)
}

#[async_trait]
impl Storage for FileStorage {
    async fn create(&self, letter: &Letter) -> crate::Result<JobId> {
        self.ensure_open()?;

        let mut index = self.index.lock().await;
        if index.contains_key(&letter.id) {
            return Err(StorageError::AlreadyExists(letter.id));
        }

        self.write_record(letter).await?;
        index.insert(letter.id, letter.status);

        internal!(level = DEBUG, "Stored letter {}", letter.id);

        Ok(letter.id)
    }

    async fn read_one_by_status(&self, status: Status) -> crate::Result<Option<Letter>> {
        self.ensure_open()?;

        let index = self.index.lock().await;
        let Some(id) = index
            .iter()
            .find_map(|(id, current)| (*current == status).then_some(*id))
        else {
            return Ok(None);
        };

        read_record(&self.record_path(&id)).await.map(Some)
    }

    async fn update_status(&self, id: &JobId, status: Status) -> crate::Result<()> {
        self.ensure_open()?;

        let mut index = self.index.lock().await;
        let Some(current) = index.get_mut(id) else {
            return Err(StorageError::NotFound(*id));
        };

        self.set_status(id, status).await?;
        *current = status;

        Ok(())
    }

    async fn update_all_matching(&self, old: Status, new: Status) -> crate::Result<usize> {
        self.ensure_open()?;

        let mut index = self.index.lock().await;
        let matching: Vec<JobId> = index
            .iter()
            .filter_map(|(id, status)| (*status == old).then_some(*id))
            .collect();

        for id in &matching {
            self.set_status(id, new).await?;
            index.insert(*id, new);
        }

        Ok(matching.len())
    }

    async fn close(&self) -> crate::Result<()> {
        // Wait for any in-flight operation to finish before refusing new ones
        let _index = self.index.lock().await;
        self.closed.store(true, Ordering::Release);

        internal!("Closed file storage at {}", self.path.display());

        Ok(())
    }

    async fn get(&self, id: &JobId) -> crate::Result<Letter> {
        self.ensure_open()?;

        let index = self.index.lock().await;
        if !index.contains_key(id) {
            return Err(StorageError::NotFound(*id));
        }

        read_record(&self.record_path(id)).await
    }

    async fn list_by_status(&self, status: Status) -> crate::Result<Vec<Letter>> {
        self.ensure_open()?;

        let index = self.index.lock().await;
        let mut letters = Vec::new();
        for (id, _) in index.iter().filter(|(_, current)| **current == status) {
            letters.push(read_record(&self.record_path(id)).await?);
        }

        Ok(letters)
    }

    async fn claim_one(&self, from: Status, to: Status) -> crate::Result<Option<Letter>> {
        self.ensure_open()?;

        let mut index = self.index.lock().await;
        let Some(id) = index
            .iter()
            .find_map(|(id, status)| (*status == from).then_some(*id))
        else {
            return Ok(None);
        };

        let letter = self.set_status(&id, to).await?;
        index.insert(id, to);

        Ok(Some(letter))
    }
}
