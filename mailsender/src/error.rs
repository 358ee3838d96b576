use thiserror::Error;

/// Failures of the event bridge (HTTP intake and notification sink)
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to bind intake to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Intake server error: {0}")]
    Server(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
