use std::{
    fmt,
    str::FromStr,
    sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};

use crate::Status;

/// Identifier for a queued letter
///
/// A ULID, so identifiers are unique without coordination and sort
/// lexicographically by creation time. Storage backends rely on that
/// ordering to hand out the oldest awaiting letter first.
///
/// IDs generated by one process are strictly increasing, even within the
/// same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId {
    id: ulid::Ulid,
}

impl JobId {
    /// Create a new letter ID from a ULID
    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new unique letter ID
    #[must_use]
    pub fn generate() -> Self {
        static GENERATOR: Mutex<ulid::Generator> = Mutex::new(ulid::Generator::new());

        let id = GENERATOR
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate()
            .unwrap_or_else(|_| ulid::Ulid::new());

        Self { id }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Milliseconds since the Unix epoch at which this ID was generated
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for JobId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self::new)
    }
}

impl Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A unit of outbound mail work
///
/// This is the value that crosses every boundary in the pipeline: it
/// arrives from the event bridge, is persisted by storage, is handed to a
/// delivery worker and is finally published back to the bridge with its
/// terminal status. `token` is the bridge's correlation key and is carried
/// through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Letter {
    pub id: JobId,
    pub addresses: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub status: Status,
}

impl Letter {
    /// Create a new awaiting letter with a freshly generated ID
    pub fn new<A, S>(addresses: A, subject: impl Into<String>, body: impl Into<String>) -> Self
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: JobId::generate(),
            addresses: addresses.into_iter().map(Into::into).collect(),
            subject: subject.into(),
            body: body.into(),
            token: String::new(),
            status: Status::Awaiting,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    #[must_use]
    pub const fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }
}
