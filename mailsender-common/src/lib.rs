//! Types shared by every part of the dispatch pipeline: the [`Letter`] that
//! travels between the event bridge, storage and the delivery workers, its
//! [`Status`], and the process-wide shutdown [`Signal`].

pub mod letter;
pub mod logging;
pub mod status;

pub use letter::{JobId, Letter};
pub use status::{ParseStatusError, Status};
pub use tracing;

/// Broadcast to every long-running loop when the process is asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
