//! Outbound SMTP submission.
//!
//! A small client that holds one connection open to a submission server,
//! authenticates once and then runs any number of mail transactions over it.

pub mod client;

pub use client::{ClientError, MessageBuilder, Response, SmtpClient};
