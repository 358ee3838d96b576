//! Rate-limited mail dispatch service
//!
//! Letters arrive over HTTP, are persisted, dispatched oldest first to a pool
//! of SMTP workers throttled by a shared rate limiter, and every finished
//! letter is published as a JSON line.

pub mod bridge;
pub mod controller;
mod error;

pub use controller::{MailSender, Running};
pub use error::{BridgeError, Result};
