use std::{net::SocketAddr, sync::Arc};

use mailsender_common::{Signal, Status, internal, tracing};
use mailsender_delivery::{
    DeliveryConfig, Queue, QueueChannels, QueueConfig, RateLimitConfig, RateLimiter,
    SmtpConnector, WorkerPool,
};
use mailsender_storage::StorageConfig;
use serde::Deserialize;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};

use crate::bridge::{IntakeConfig, IntakeServer, Notifier, NotifyConfig};

/// The whole service, as read from the configuration file
///
/// ```ron
/// MailSender (
///     storage: File(path: "/var/lib/mailsender"),
///     limiter: (period_secs: 5, max_per_period: 5),
///     delivery: (
///         workers: 4,
///         smtp: (host: "smtp.example.com", username: "bot@example.com", password: "..."),
///     ),
///     intake: (listen_address: "0.0.0.0:8000"),
///     notify: Stdout,
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct MailSender {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limiter: RateLimitConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// A started service
///
/// Every component is running. Call [`Running::wait_for_signal`] and then
/// [`Running::finish`], or use [`MailSender::run`] which does both.
pub struct Running {
    intake_addr: SocketAddr,
    shutdown: broadcast::Sender<Signal>,
    signals: broadcast::Receiver<Signal>,
    completed: oneshot::Receiver<()>,
    queue: JoinHandle<()>,
    limiter: JoinHandle<()>,
    intake: JoinHandle<crate::error::Result<()>>,
    notifier: JoinHandle<crate::error::Result<()>>,
}

impl MailSender {
    /// Run this service until it is told to stop, then shut down gracefully
    ///
    /// # Errors
    ///
    /// Returns an error if any component fails to start.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut running = self.start().await?;
        running.wait_for_signal().await?;
        running.finish().await
    }

    /// Open storage, bind the intake, connect the delivery sessions and start
    /// every loop
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, storage cannot be
    /// opened, the intake cannot bind, the notification sink cannot be opened
    /// or not a single delivery session can be established.
    pub async fn start(self) -> anyhow::Result<Running> {
        internal!("Controller starting");

        let limiter = Arc::new(RateLimiter::from_config(&self.limiter)?);
        let capacity = self.queue.channel_capacity.max(1);

        let (shutdown, signals) = broadcast::channel(16);
        let (inbound, intake) = mpsc::channel(capacity);
        let (outbound, published) = mpsc::channel(capacity);
        let (to_pool, pool_intake) = mpsc::channel(capacity);
        let (pool_done, from_pool) = mpsc::channel(capacity);

        let storage = self.storage.into_storage().await?;
        let intake_server = IntakeServer::bind(&self.intake, inbound, shutdown.clone()).await?;
        let intake_addr = intake_server.local_addr()?;
        let notifier = Notifier::open(&self.notify).await?;

        let limiter_task = {
            let limiter = Arc::clone(&limiter);
            let signal = shutdown.subscribe();
            tokio::spawn(async move { limiter.run(signal).await })
        };

        let connector = Arc::new(SmtpConnector::new(self.delivery.smtp));
        let pool = WorkerPool::new(
            connector,
            limiter,
            pool_intake,
            pool_done,
            self.delivery.workers,
        );

        let barrier = match pool.run(shutdown.subscribe()).await {
            Ok(barrier) => barrier,
            Err(e) => {
                let _ = shutdown.send(Signal::Shutdown);
                let _ = limiter_task.await;
                if let Err(e) = storage.close().await {
                    tracing::warn!("Failed to close storage: {e}");
                }
                return Err(e.into());
            }
        };

        let (done, completed) = oneshot::channel();
        let queue = Queue::new(
            storage,
            QueueChannels {
                intake,
                outbound,
                to_pool,
                from_pool,
            },
            barrier,
            done,
            self.queue,
        );

        let queue_task = tokio::spawn(queue.run(shutdown.subscribe(), Status::Awaiting));
        let notifier_task = tokio::spawn(notifier.run(published));
        let intake_task = tokio::spawn(intake_server.serve(shutdown.subscribe()));

        internal!(level = INFO, "mailsender running, intake on {intake_addr}");

        Ok(Running {
            intake_addr,
            shutdown,
            signals,
            completed,
            queue: queue_task,
            limiter: limiter_task,
            intake: intake_task,
            notifier: notifier_task,
        })
    }
}

impl Running {
    /// Where the intake is listening
    pub const fn intake_addr(&self) -> SocketAddr {
        self.intake_addr
    }

    /// Ask every component to stop
    pub fn shutdown(&self) {
        if self.shutdown.send(Signal::Shutdown).is_err() {
            tracing::debug!("Every component has already stopped");
        }
    }

    /// Wait for CTRL+C, SIGTERM or a shutdown requested by a component
    /// (such as the intake's halt endpoint), then broadcast the shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers cannot be installed.
    pub async fn wait_for_signal(&mut self) -> anyhow::Result<()> {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
            }
            _ = terminate.recv() => {
                internal!(level = INFO, "Terminate Signal received, shutting down");
            }
            _ = self.signals.recv() => {
                internal!(level = INFO, "Shutdown requested, shutting down");
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Wait for every component to stop
    ///
    /// A second CTRL+C abandons the wait.
    ///
    /// # Errors
    ///
    /// Returns an error if a component task panicked or the intake failed.
    pub async fn finish(self) -> anyhow::Result<()> {
        let Self {
            completed,
            queue,
            limiter,
            intake,
            notifier,
            ..
        } = self;

        tokio::select! {
            joined = queue => joined?,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Forced shutdown, letters still processing are recovered on the next start");
                return Ok(());
            }
        }

        if completed.await.is_err() {
            tracing::warn!("Queue stopped without signalling completion");
        }

        limiter.await?;
        intake.await??;

        // The queue owned the only outbound sender, so the notifier drains and stops
        if let Err(e) = notifier.await? {
            tracing::error!("Notifier failed while stopping: {e}");
        }

        internal!(level = INFO, "Shutdown complete");
        Ok(())
    }
}
