//! Ticket-based admission control for outbound sends
//!
//! The limiter mints one [`Ticket`] every `period / max_per_period` into a
//! bounded pool of capacity `max_per_period`. A worker must take a ticket
//! before each send, so sends can never run ahead of the mint rate for
//! longer than it takes to drain a full pool.
//!
//! # Example
//!
//! ```text
//! period: 5s, max_per_period: 5
//! - a ticket is minted every second
//! - at most 5 tickets wait in the pool
//! - when the pool is full the minting loop waits for a consumer
//! ```

use std::time::{Duration, Instant};

use mailsender_common::{Signal, internal};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, broadcast, mpsc},
    time::MissedTickBehavior,
};

use crate::error::LimiterError;

/// Configuration for the rate limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Length of the window, in seconds
    ///
    /// Default: 5
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Tickets minted per window
    ///
    /// Default: 5
    #[serde(default = "default_max_per_period")]
    pub max_per_period: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            max_per_period: default_max_per_period(),
        }
    }
}

const fn default_period_secs() -> u64 {
    5
}

const fn default_max_per_period() -> u32 {
    5
}

/// Permit to perform one send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    issued_at: Instant,
}

impl Ticket {
    fn now() -> Self {
        Self {
            issued_at: Instant::now(),
        }
    }

    #[must_use]
    pub const fn issued_at(&self) -> Instant {
        self.issued_at
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    capacity: usize,
    minted: mpsc::Sender<Ticket>,
    pool: Mutex<mpsc::Receiver<Ticket>>,
}

impl RateLimiter {
    /// Create a limiter minting `max_per_period` tickets every `period`
    ///
    /// # Errors
    /// If `period` is zero or `max_per_period` is zero
    pub fn new(period: Duration, max_per_period: u32) -> Result<Self, LimiterError> {
        if period.is_zero() {
            return Err(LimiterError::ZeroPeriod);
        }
        if max_per_period == 0 {
            return Err(LimiterError::ZeroMax);
        }

        let interval = period / max_per_period;
        if interval.is_zero() {
            return Err(LimiterError::ZeroPeriod);
        }

        let capacity = max_per_period as usize;
        let (minted, pool) = mpsc::channel(capacity);

        Ok(Self {
            interval,
            capacity,
            minted,
            pool: Mutex::new(pool),
        })
    }

    /// # Errors
    /// If the configuration has a zero period or zero max
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, LimiterError> {
        Self::new(Duration::from_secs(config.period_secs), config.max_per_period)
    }

    /// Time between two minted tickets
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Maximum number of unclaimed tickets
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mint tickets until a shutdown signal arrives
    ///
    /// The first ticket is minted one interval after start. If the pool is
    /// full the loop waits for a consumer; ticks missed meanwhile are not
    /// replayed.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!(
            "Rate limiter minting one ticket every {:?} (pool of {})",
            self.interval,
            self.capacity
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }

            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                permit = self.minted.reserve() => permit,
            };

            match permit {
                Ok(permit) => permit.send(Ticket::now()),
                Err(_) => break,
            }
        }

        internal!("Rate limiter stopped");
    }

    /// Wait for the next ticket
    ///
    /// Returns `None` only if the limiter can no longer mint.
    pub async fn take(&self) -> Option<Ticket> {
        self.pool.lock().await.recv().await
    }

    /// Take a ticket if one is immediately available
    pub fn try_take(&self) -> Option<Ticket> {
        self.pool.try_lock().ok()?.try_recv().ok()
    }
}
