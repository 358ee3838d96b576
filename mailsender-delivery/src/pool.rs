//! Rate-limited delivery workers
//!
//! Every worker owns one [`Sender`] session for its whole life. It pulls a
//! letter from the shared intake, waits for a [`crate::Ticket`], sends, and
//! reports the letter (now `sent` or `error`) on the completion channel.
//! Workers never touch storage.

use std::sync::Arc;

use mailsender_common::{Letter, Signal, Status, internal, tracing};
use tokio::{
    sync::{
        Mutex, broadcast,
        mpsc::{self, error::TrySendError},
    },
    task::JoinSet,
};

use crate::{
    RateLimiter,
    error::{DeliveryError, SystemError},
    sender::{Connector, Sender},
};

/// A fixed set of delivery workers sharing one intake channel
pub struct WorkerPool {
    connector: Arc<dyn Connector>,
    limiter: Arc<RateLimiter>,
    intake: mpsc::Receiver<Letter>,
    completions: mpsc::Sender<Letter>,
    workers: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("limiter", &self.limiter)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        limiter: Arc<RateLimiter>,
        intake: mpsc::Receiver<Letter>,
        completions: mpsc::Sender<Letter>,
        workers: usize,
    ) -> Self {
        Self {
            connector,
            limiter,
            intake,
            completions,
            workers,
        }
    }

    /// Open one session per worker and start every worker that got one
    ///
    /// A worker whose session cannot be opened is not started and not
    /// replaced; the pool runs with whatever capacity remains. The returned
    /// barrier resolves once every started worker has exited.
    ///
    /// # Errors
    /// [`SystemError::NoSessions`] if not a single session could be opened.
    pub async fn run(
        self,
        shutdown: broadcast::Receiver<Signal>,
    ) -> Result<WorkerPoolBarrier, DeliveryError> {
        let mut connecting = JoinSet::new();
        for worker in 0..self.workers {
            let connector = Arc::clone(&self.connector);
            connecting.spawn(async move { (worker, connector.connect().await) });
        }

        let mut sessions = Vec::with_capacity(self.workers);
        let mut last_error = String::new();
        while let Some(joined) = connecting.join_next().await {
            match joined {
                Ok((worker, Ok(session))) => sessions.push((worker, session)),
                Ok((worker, Err(e))) => {
                    tracing::error!(worker, "Worker could not open a delivery session: {e}");
                    last_error = e.to_string();
                }
                Err(e) => {
                    tracing::error!("Session setup task failed: {e}");
                    last_error = e.to_string();
                }
            }
        }

        if sessions.is_empty() {
            return Err(SystemError::NoSessions {
                attempted: self.workers,
                last_error,
            }
            .into());
        }

        internal!(
            "Starting {} of {} delivery workers",
            sessions.len(),
            self.workers
        );

        let intake = Arc::new(Mutex::new(self.intake));
        let mut workers = JoinSet::new();

        for (id, sender) in sessions {
            let worker = Worker {
                id,
                sender,
                limiter: Arc::clone(&self.limiter),
                intake: Arc::clone(&intake),
                completions: self.completions.clone(),
            };
            workers.spawn(worker.run(shutdown.resubscribe()));
        }

        Ok(WorkerPoolBarrier { workers })
    }
}

struct Worker {
    id: usize,
    sender: Box<dyn Sender>,
    limiter: Arc<RateLimiter>,
    intake: Arc<Mutex<mpsc::Receiver<Letter>>>,
    completions: mpsc::Sender<Letter>,
}

impl Worker {
    async fn run(mut self, mut shutdown: broadcast::Receiver<Signal>) {
        let worker = self.id;
        tracing::debug!(worker, "Delivery worker started");

        loop {
            let mut letter = tokio::select! {
                _ = shutdown.recv() => return Self::cancelled(worker, None),
                letter = async { self.intake.lock().await.recv().await } => match letter {
                    Some(letter) => letter,
                    None => break,
                },
            };

            // Holding the letter but no ticket yet
            let ticket = tokio::select! {
                _ = shutdown.recv() => return Self::cancelled(worker, Some(&letter)),
                ticket = self.limiter.take() => ticket,
            };
            if ticket.is_none() {
                tracing::warn!(worker, "Rate limiter stopped minting");
                break;
            }

            let outcome = tokio::select! {
                _ = shutdown.recv() => return Self::cancelled(worker, Some(&letter)),
                outcome = self.sender.send(&letter) => outcome,
            };

            letter.status = match outcome {
                Ok(()) => {
                    tracing::info!(worker, letter_id = %letter.id, "Letter sent");
                    Status::Sent
                }
                Err(e) => {
                    tracing::warn!(worker, letter_id = %letter.id, "Delivery failed: {e}");
                    Status::Error
                }
            };

            // An outcome is always reported; shutdown only interrupts a wait on a full channel
            let id = letter.id;
            let reported = match self.completions.try_send(letter) {
                Ok(()) => Ok(()),
                Err(TrySendError::Closed(_)) => Err(()),
                Err(TrySendError::Full(letter)) => tokio::select! {
                    biased;
                    reported = self.completions.send(letter) => reported.map_err(|_| ()),
                    _ = shutdown.recv() => {
                        tracing::warn!(
                            worker,
                            letter_id = %id,
                            "Shutdown while the completion channel was full, letter left for recovery"
                        );
                        return;
                    }
                },
            };
            if reported.is_err() {
                tracing::warn!(worker, letter_id = %id, "Completion channel closed");
                break;
            }
        }

        self.sender.quit().await;
        tracing::debug!(worker, "Delivery worker stopped");
    }

    fn cancelled(worker: usize, letter: Option<&Letter>) {
        match letter {
            Some(letter) => tracing::debug!(
                worker,
                letter_id = %letter.id,
                "Worker cancelled, letter left for recovery"
            ),
            None => tracing::debug!(worker, "Worker cancelled while idle"),
        }
    }
}

/// Resolves once every delivery worker has exited
#[derive(Debug)]
pub struct WorkerPoolBarrier {
    workers: JoinSet<()>,
}

impl WorkerPoolBarrier {
    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self {
            workers: JoinSet::new(),
        }
    }

    /// Wait for every remaining worker to exit
    pub async fn wait(&mut self) {
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined
                && e.is_panic()
            {
                tracing::error!("Delivery worker panicked: {e}");
            }
        }
    }

    /// Stop every remaining worker at its next suspension point
    pub fn abort(&mut self) {
        self.workers.abort_all();
    }

    /// Number of workers that have not been collected yet
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
