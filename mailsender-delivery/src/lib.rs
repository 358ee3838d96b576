//! Rate-limited delivery of queued letters
//!
//! This crate provides:
//! - A ticket-minting [`RateLimiter`]
//! - A [`WorkerPool`] of long-lived sending sessions
//! - The [`Queue`] that owns every letter's status in storage
//! - An SMTP implementation of the [`Sender`] / [`Connector`] pair

mod error;
pub mod pool;
pub mod queue;
pub mod rate_limiter;
pub mod sender;
mod types;

pub use error::{DeliveryError, LimiterError, PermanentError, SystemError, TemporaryError};
pub use pool::{WorkerPool, WorkerPoolBarrier};
pub use queue::{Queue, QueueChannels, QueueConfig, recover_interrupted};
pub use rate_limiter::{RateLimitConfig, RateLimiter, Ticket};
pub use sender::{Connector, Sender, SmtpConnector, SmtpSender};
pub use types::{DeliveryConfig, SmtpConfig, SmtpTimeouts, TlsMode};
