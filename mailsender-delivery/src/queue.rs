//! The job queue
//!
//! The queue is the only component that changes a letter's status in
//! storage. It absorbs letters from the event bridge, claims awaiting
//! letters and hands them to the delivery pool, persists the outcome of
//! every delivery and forwards it back to the bridge.
//!
//! ## Polling
//!
//! A poll claims one letter. The loop polls on a bounded timer, and polls
//! again straight away while the previous poll found work or after a new
//! letter was stored. Dispatch to the pool runs on its own task so a full
//! pool intake never blocks the loop; at most `max_pending_dispatches` of
//! those tasks exist at a time.
//!
//! ## Graceful Shutdown
//!
//! When a shutdown signal is received:
//! 1. Wait for the delivery workers to exit (aborting them after
//!    `shutdown_timeout_secs`)
//! 2. Abort dispatches that never reached a worker
//! 3. Persist completions and new letters still sitting in the channels
//! 4. Return every `processing` letter to `awaiting`
//! 5. Signal completion and close storage

use std::{sync::Arc, time::Duration};

use mailsender_common::{Letter, Signal, Status, internal, tracing};
use mailsender_storage::Storage;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinSet,
    time::MissedTickBehavior,
};

use crate::WorkerPoolBarrier;

const RESET_ATTEMPTS: u32 = 5;
const RESET_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Upper bound between two polls when no work was found
    ///
    /// Default: 500 milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Dispatch tasks allowed to wait on the pool intake at once
    ///
    /// Default: 64
    #[serde(default = "default_max_pending_dispatches")]
    pub max_pending_dispatches: usize,

    /// How long shutdown waits for the delivery workers before aborting them
    ///
    /// Default: 30 seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Capacity of every channel between the bridge, the queue and the pool
    ///
    /// Default: 64
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_pending_dispatches: default_max_pending_dispatches(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_max_pending_dispatches() -> usize {
    64
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

const fn default_channel_capacity() -> usize {
    64
}

/// The four channel ends the queue owns
#[derive(Debug)]
pub struct QueueChannels {
    /// New letters from the event bridge
    pub intake: mpsc::Receiver<Letter>,
    /// Finished letters back to the event bridge
    pub outbound: mpsc::Sender<Letter>,
    /// Claimed letters to the delivery pool
    pub to_pool: mpsc::Sender<Letter>,
    /// Finished letters from the delivery pool
    pub from_pool: mpsc::Receiver<Letter>,
}

#[derive(Debug)]
pub struct Queue {
    storage: Arc<dyn Storage>,
    channels: QueueChannels,
    barrier: WorkerPoolBarrier,
    completed: oneshot::Sender<()>,
    config: QueueConfig,
}

impl Queue {
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        channels: QueueChannels,
        barrier: WorkerPoolBarrier,
        completed: oneshot::Sender<()>,
        config: QueueConfig,
    ) -> Self {
        Self {
            storage,
            channels,
            barrier,
            completed,
            config,
        }
    }

    /// Run until a shutdown signal arrives, then shut down gracefully
    ///
    /// `poll_status` is the status claimed by every poll, normally
    /// [`Status::Awaiting`].
    pub async fn run(self, mut shutdown: broadcast::Receiver<Signal>, poll_status: Status) {
        let Self {
            storage,
            channels,
            mut barrier,
            completed,
            config,
        } = self;
        let QueueChannels {
            mut intake,
            outbound,
            to_pool,
            mut from_pool,
        } = channels;
        let storage = storage.as_ref();

        internal!("Queue starting");

        // Heal letters left processing by a run that never reached its reset
        recover_interrupted(storage).await;

        let mut poll = tokio::time::interval(config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        let mut dispatches = JoinSet::new();
        let mut repoll = true;
        let mut intake_open = true;

        loop {
            while let Some(joined) = dispatches.try_join_next() {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    tracing::error!("Dispatch task panicked: {e}");
                }
            }
            let can_dispatch = dispatches.len() < config.max_pending_dispatches;

            tokio::select! {
                _ = shutdown.recv() => {
                    internal!("Queue received shutdown signal");
                    break;
                }
                letter = intake.recv(), if intake_open => match letter {
                    Some(letter) => repoll |= accept(storage, letter).await,
                    None => {
                        tracing::debug!("Event bridge closed the intake channel");
                        intake_open = false;
                    }
                },
                Some(letter) = from_pool.recv() => complete(storage, &outbound, letter).await,
                Some(joined) = dispatches.join_next(), if !can_dispatch => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        tracing::error!("Dispatch task panicked: {e}");
                    }
                }
                _ = poll.tick(), if can_dispatch => {
                    repoll = dispatch_one(storage, &to_pool, &mut dispatches, poll_status).await;
                }
                () = std::future::ready(()), if repoll && can_dispatch => {
                    repoll = dispatch_one(storage, &to_pool, &mut dispatches, poll_status).await;
                }
            }
        }

        if tokio::time::timeout(config.shutdown_timeout(), barrier.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = barrier.len(),
                "Delivery workers did not stop within {:?}, aborting them",
                config.shutdown_timeout()
            );
            barrier.abort();
            barrier.wait().await;
        }

        dispatches.abort_all();
        while dispatches.join_next().await.is_some() {}

        from_pool.close();
        while let Some(letter) = from_pool.recv().await {
            complete(storage, &outbound, letter).await;
        }

        intake.close();
        while let Some(letter) = intake.recv().await {
            accept(storage, letter).await;
        }

        if recover_interrupted(storage).await.is_none() {
            let stuck = storage
                .list_by_status(Status::Processing)
                .await
                .map_or(0, |letters| letters.len());
            tracing::error!(
                stuck,
                "Could not return interrupted letters to the queue, they will be recovered on the next start"
            );
        }

        if completed.send(()).is_err() {
            tracing::debug!("Nobody is waiting for the queue to finish");
        }

        if let Err(e) = storage.close().await {
            tracing::error!("Failed to close storage: {e}");
        }

        internal!("Queue shutdown complete");
    }
}

/// Return every `processing` letter to `awaiting`
///
/// Retried with exponential backoff. Returns the number of letters moved,
/// or `None` once every attempt failed. Running it with nothing to recover
/// is a successful no-op.
pub async fn recover_interrupted(storage: &dyn Storage) -> Option<usize> {
    let mut backoff = RESET_BACKOFF;

    for attempt in 1..=RESET_ATTEMPTS {
        match storage
            .update_all_matching(Status::Processing, Status::Awaiting)
            .await
        {
            Ok(0) => {
                tracing::debug!("No interrupted letters to recover");
                return Some(0);
            }
            Ok(count) => {
                tracing::info!(count, "Returned interrupted letters to the queue");
                return Some(count);
            }
            Err(e) => {
                tracing::warn!(attempt, "Failed to reset processing letters: {e}");
                if attempt < RESET_ATTEMPTS {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    None
}

/// Store a letter from the bridge as awaiting. Returns whether it was stored.
async fn accept(storage: &dyn Storage, mut letter: Letter) -> bool {
    letter.status = Status::Awaiting;

    match storage.create(&letter).await {
        Ok(id) => {
            tracing::debug!(letter_id = %id, token = %letter.token, "Letter queued");
            true
        }
        Err(e) => {
            tracing::error!(letter_id = %letter.id, "Failed to store letter: {e}");
            false
        }
    }
}

/// Persist the outcome of a delivery and forward it to the bridge
async fn complete(storage: &dyn Storage, outbound: &mpsc::Sender<Letter>, letter: Letter) {
    let id = letter.id;

    match storage.update_status(&id, letter.status).await {
        Ok(()) => tracing::debug!(letter_id = %id, status = %letter.status, "Outcome recorded"),
        Err(e) => tracing::error!(letter_id = %id, "Failed to record delivery outcome: {e}"),
    }

    if outbound.send(letter).await.is_err() {
        tracing::warn!(letter_id = %id, "Outbound channel closed, outcome not published");
    }
}

/// Claim one letter and hand it to the pool. Returns whether one was found.
async fn dispatch_one(
    storage: &dyn Storage,
    to_pool: &mpsc::Sender<Letter>,
    dispatches: &mut JoinSet<()>,
    poll_status: Status,
) -> bool {
    match storage.claim_one(poll_status, Status::Processing).await {
        Ok(Some(letter)) => {
            tracing::debug!(letter_id = %letter.id, "Dispatching letter");
            let to_pool = to_pool.clone();
            dispatches.spawn(async move {
                let id = letter.id;
                if to_pool.send(letter).await.is_err() {
                    tracing::warn!(letter_id = %id, "Delivery pool is gone, letter left for recovery");
                }
            });
            true
        }
        Ok(None) => false,
        Err(e) => {
            tracing::error!("Failed to claim a letter: {e}");
            false
        }
    }
}
