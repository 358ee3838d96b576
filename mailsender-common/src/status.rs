use core::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued letter.
///
/// `Awaiting` letters are eligible for dispatch, `Processing` letters are
/// checked out to a delivery worker, and `Sent` / `Error` are terminal. The
/// only backwards transition is `Processing` to `Awaiting`, performed when
/// the queue recovers letters that a worker never reported back.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Awaiting,
    Processing,
    Sent,
    Error,
}

impl Status {
    pub const ALL: [Self; 4] = [Self::Awaiting, Self::Processing, Self::Sent, Self::Error];

    /// Checks if no further automatic transition can happen from this status
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Error)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Awaiting => "awaiting",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Error => "error",
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown letter status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}
