//! HTTP intake for new letters
//!
//! - `POST /letters` takes a JSON array of letters and queues them, all
//!   stamped with one fresh correlation token
//! - `POST /halt` asks the whole service to shut down
//! - `GET /` answers so there is something to probe

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use mailsender_common::{Letter, Signal, incoming, internal, tracing};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc},
};
use tower_http::timeout::TimeoutLayer;

use crate::error::{BridgeError, Result};

const SAMPLE_BATCH: &str = r#"[{"subject":"Subject","body":"Message\n","addresses":["first@example.com","second@example.com"]}]"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeConfig {
    /// Default: 127.0.0.1:8000
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Upper bound on handling one request
    ///
    /// Default: 10 seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1:8000".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    10
}

/// One letter of a submitted batch
#[derive(Debug, Deserialize)]
pub struct Submission {
    #[serde(alias = "Addresses")]
    pub addresses: Vec<String>,
    #[serde(default, alias = "Subject")]
    pub subject: String,
    #[serde(default, alias = "Body")]
    pub body: String,
}

/// Reply to an accepted batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub token: String,
    pub accepted: usize,
}

#[derive(Debug, Clone)]
struct IntakeState {
    inbound: mpsc::Sender<Letter>,
    shutdown: broadcast::Sender<Signal>,
}

/// The bound, not yet serving, intake server
pub struct IntakeServer {
    listener: TcpListener,
    router: Router,
}

impl IntakeServer {
    /// Bind the listener
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the configured address fails.
    pub async fn bind(
        config: &IntakeConfig,
        inbound: mpsc::Sender<Letter>,
        shutdown: broadcast::Sender<Signal>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| BridgeError::Bind {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(address = %config.listen_address, "Intake bound");

        let router = router(
            IntakeState { inbound, shutdown },
            Duration::from_secs(config.request_timeout_secs),
        );

        Ok(Self { listener, router })
    }

    /// The address actually bound, useful when the configured port is 0
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until a shutdown signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> Result<()> {
        internal!("Intake server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                internal!("Intake server received shutdown signal");
            })
            .await
            .map_err(|e| BridgeError::Server(e.to_string()))?;

        internal!("Intake server stopped");
        Ok(())
    }
}

fn router(state: IntakeState, timeout: Duration) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/letters", post(submit))
        .route("/halt", post(halt))
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
}

async fn index() -> &'static str {
    "mailsender is running\n"
}

async fn halt(State(state): State<IntakeState>) -> &'static str {
    internal!(level = INFO, "Shutdown requested over HTTP");

    if state.shutdown.send(Signal::Shutdown).is_err() {
        tracing::debug!("Nothing left to shut down");
    }

    "Shutting down\n"
}

async fn submit(
    State(state): State<IntakeState>,
    payload: std::result::Result<Json<Vec<Submission>>, JsonRejection>,
) -> Response {
    let batch = match payload {
        Ok(Json(batch)) => batch,
        Err(rejection) => return bad_request(&rejection.body_text()),
    };

    if batch.is_empty() {
        return bad_request("The batch is empty");
    }
    if let Some(index) = batch.iter().position(|letter| letter.addresses.is_empty()) {
        return bad_request(&format!("Letter {index} has no recipients"));
    }

    let token = ulid::Ulid::new().to_string();
    let mut accepted = 0;

    for submission in batch {
        let letter = Letter::new(submission.addresses, submission.subject, submission.body)
            .with_token(token.as_str());
        let id = letter.id;

        if state.inbound.send(letter).await.is_err() {
            tracing::warn!(token = %token, accepted, "Intake closed part way through a batch");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Shutting down, accepted {accepted} letters of batch {token}\n"),
            )
                .into_response();
        }

        incoming!("Accepted letter {id}");
        accepted += 1;
    }

    tracing::info!(token = %token, accepted, "Accepted batch");

    (StatusCode::ACCEPTED, Json(Accepted { token, accepted })).into_response()
}

fn bad_request(detail: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        format!(
            "Expected a JSON array of letters, each with an array of addresses.\nSample: {SAMPLE_BATCH}\n{detail}\n"
        ),
    )
        .into_response()
}
