use async_trait::async_trait;
use mailsender_common::{JobId, Letter, Status};

/// Persistent home of every letter and the single source of truth for its
/// status.
///
/// Implementations must serialize their own operations: two concurrent
/// [`Storage::claim_one`] calls never return the same letter, and reads by
/// status hand out the oldest matching letter first.
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Persist a new letter exactly as given.
    ///
    /// # Errors
    /// [`crate::StorageError::AlreadyExists`] if the ID is taken, or any
    /// backend failure.
    async fn create(&self, letter: &Letter) -> crate::Result<JobId>;

    /// Fetch the oldest letter currently in `status`, if any.
    ///
    /// # Errors
    /// Any backend failure.
    async fn read_one_by_status(&self, status: Status) -> crate::Result<Option<Letter>>;

    /// Set the status of a single letter.
    ///
    /// # Errors
    /// [`crate::StorageError::NotFound`] if no such letter exists, or any
    /// backend failure.
    async fn update_status(&self, id: &JobId, status: Status) -> crate::Result<()>;

    /// Move every letter in `old` to `new`, returning how many moved.
    ///
    /// # Errors
    /// Any backend failure.
    async fn update_all_matching(&self, old: Status, new: Status) -> crate::Result<usize>;

    /// Release the backend. Further operations fail with
    /// [`crate::StorageError::Closed`].
    ///
    /// # Errors
    /// Any failure while flushing the backend.
    async fn close(&self) -> crate::Result<()>;

    /// Fetch a letter by ID.
    ///
    /// # Errors
    /// [`crate::StorageError::NotFound`] if no such letter exists.
    async fn get(&self, id: &JobId) -> crate::Result<Letter>;

    /// Every letter in `status`, oldest first.
    ///
    /// # Errors
    /// Any backend failure.
    async fn list_by_status(&self, status: Status) -> crate::Result<Vec<Letter>>;

    /// Read the oldest letter in `from` and move it to `to`.
    ///
    /// The bundled backends do this under one lock. This provided version is
    /// only safe when a single caller claims from the store, which holds for
    /// the queue loop.
    ///
    /// # Errors
    /// Any backend failure.
    async fn claim_one(&self, from: Status, to: Status) -> crate::Result<Option<Letter>> {
        let Some(mut letter) = self.read_one_by_status(from).await? else {
            return Ok(None);
        };

        self.update_status(&letter.id, to).await?;
        letter.status = to;

        Ok(Some(letter))
    }
}
