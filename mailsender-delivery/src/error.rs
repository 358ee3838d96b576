//! Typed error handling for delivery operations.
//!
//! Delivery failures are split into:
//! - Permanent failures (5xx SMTP codes, rejected credentials)
//! - Temporary failures (4xx SMTP codes, network trouble)
//! - System errors (configuration and internal problems)
//!
//! The split is informational. A letter is attempted once and every failure
//! ends in the `error` status; the category is what gets logged.

use mailsender_smtp::ClientError;
use thiserror::Error;

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Failures that would not go away if the letter were sent again.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// Recipient address is invalid or rejected by the server.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Message was rejected by the server (e.g., policy violation, spam).
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    /// SMTP authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// TLS is required but not available or failed.
    #[error("TLS required: {0}")]
    TlsRequired(String),

    /// The letter has no recipients at all.
    #[error("Letter has no recipients")]
    NoRecipients,
}

/// Failures caused by the network or a busy server.
#[derive(Debug, Error)]
pub enum TemporaryError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Server busy: {0}")]
    ServerBusy(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Not a single delivery worker could open a session.
    #[error("No delivery session could be established ({attempted} attempted): {last_error}")]
    NoSessions {
        attempted: usize,
        last_error: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Rate limiter construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    #[error("Rate limiter period must be greater than zero")]
    ZeroPeriod,

    #[error("Rate limiter must allow at least one ticket per period")]
    ZeroMax,
}

impl From<LimiterError> for DeliveryError {
    fn from(error: LimiterError) -> Self {
        Self::System(SystemError::Configuration(error.to_string()))
    }
}

impl DeliveryError {
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

/// Convert from SMTP `ClientError` to `DeliveryError`.
///
/// - **4xx SMTP codes** → Temporary
/// - **5xx SMTP codes** → Permanent
/// - **Connection/I/O errors** → Temporary
/// - **TLS errors** → Temporary
/// - **Parse/builder errors** → System
impl From<ClientError> for DeliveryError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::SmtpError { code, message } if (400..500).contains(&code) => {
                Self::Temporary(TemporaryError::SmtpTemporary(format!("{code} {message}")))
            }

            ClientError::SmtpError { code, message } if (500..600).contains(&code) => {
                Self::Permanent(PermanentError::MessageRejected(format!("{code} {message}")))
            }

            ClientError::SmtpError { code, message }
            | ClientError::UnexpectedResponse { code, message } => Self::System(
                SystemError::Internal(format!("Unexpected SMTP response: {code} {message}")),
            ),

            ClientError::Io(e) => {
                Self::Temporary(TemporaryError::ConnectionFailed(format!("I/O error: {e}")))
            }

            ClientError::ConnectionClosed => Self::Temporary(TemporaryError::ConnectionFailed(
                "Connection closed unexpectedly".to_string(),
            )),

            ClientError::TlsError(e) => Self::Temporary(TemporaryError::TlsHandshakeFailed(e)),

            ClientError::ParseError(e) => {
                Self::System(SystemError::Internal(format!("SMTP parse error: {e}")))
            }

            ClientError::BuilderError(e) => {
                Self::System(SystemError::Internal(format!("Message build error: {e}")))
            }

            ClientError::Utf8Error(e) => {
                Self::System(SystemError::Internal(format!("UTF-8 error: {e}")))
            }
        }
    }
}
