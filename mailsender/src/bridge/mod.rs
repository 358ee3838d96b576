//! The event bridge: letters in over HTTP, finished letters out as JSON lines

pub mod intake;
pub mod notify;

pub use intake::{Accepted, IntakeConfig, IntakeServer, Submission};
pub use notify::{NotifyConfig, Notifier};
