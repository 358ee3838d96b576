use std::{
    collections::BTreeMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use mailsender_common::{JobId, Letter, Status};

use crate::{Storage, StorageError};

/// In-memory storage implementation
///
/// Letters live in a `BTreeMap` keyed by [`JobId`] behind an `RwLock`. Since
/// IDs are ULIDs, map order is creation order, which gives oldest-first reads
/// for free. Nothing survives a restart, so this backend is meant for tests
/// and development.
///
/// # Capacity Management
/// The store can be configured with a maximum number of letters. Once it is
/// reached `create` fails until letters are removed.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    pub(crate) letters: Arc<RwLock<BTreeMap<JobId, Letter>>>,
    closed: Arc<AtomicBool>,
    /// Maximum number of letters to store (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryStorage {
    /// Create a new empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            letters: Arc::default(),
            closed: Arc::default(),
            capacity: None,
        }
    }

    /// Create a new store that holds at most `capacity` letters
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    /// Get the current number of letters in the store
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.letters
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create(&self, letter: &Letter) -> crate::Result<JobId> {
        self.ensure_open()?;

        let mut letters = self.letters.write()?;

        if letters.contains_key(&letter.id) {
            return Err(StorageError::AlreadyExists(letter.id));
        }

        if let Some(cap) = self.capacity
            && letters.len() >= cap
        {
            return Err(StorageError::Internal(format!(
                "Memory storage capacity exceeded: {}/{cap} letters",
                letters.len()
            )));
        }

        letters.insert(letter.id, letter.clone());

        Ok(letter.id)
    }

    async fn read_one_by_status(&self, status: Status) -> crate::Result<Option<Letter>> {
        self.ensure_open()?;

        Ok(self
            .letters
            .read()?
            .values()
            .find(|letter| letter.status == status)
            .cloned())
    }

    async fn update_status(&self, id: &JobId, status: Status) -> crate::Result<()> {
        self.ensure_open()?;

        self.letters
            .write()?
            .get_mut(id)
            .map(|letter| letter.status = status)
            .ok_or(StorageError::NotFound(*id))
    }

    async fn update_all_matching(&self, old: Status, new: Status) -> crate::Result<usize> {
        self.ensure_open()?;

        let mut count = 0;
        for letter in self
            .letters
            .write()?
            .values_mut()
            .filter(|letter| letter.status == old)
        {
            letter.status = new;
            count += 1;
        }

        Ok(count)
    }

    async fn close(&self) -> crate::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> crate::Result<Letter> {
        self.ensure_open()?;

        self.letters
            .read()?
            .get(id)
            .cloned()
            .ok_or(StorageError::NotFound(*id))
    }

    async fn list_by_status(&self, status: Status) -> crate::Result<Vec<Letter>> {
        self.ensure_open()?;

        Ok(self
            .letters
            .read()?
            .values()
            .filter(|letter| letter.status == status)
            .cloned()
            .collect())
    }

    async fn claim_one(&self, from: Status, to: Status) -> crate::Result<Option<Letter>> {
        self.ensure_open()?;

        let mut letters = self.letters.write()?;
        Ok(letters
            .values_mut()
            .find(|letter| letter.status == from)
            .map(|letter| {
                letter.status = to;
                letter.clone()
            }))
    }
}
