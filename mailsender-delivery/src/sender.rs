//! Delivery sessions
//!
//! A [`Connector`] opens sessions; each delivery worker asks it for exactly
//! one [`Sender`] at startup and keeps it for its whole life.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use mailsender_common::{Letter, tracing};
use mailsender_smtp::{ClientError, MessageBuilder, Response, SmtpClient};

use crate::{
    SmtpConfig, TlsMode,
    error::{DeliveryError, PermanentError, TemporaryError},
};

/// A long-lived session able to deliver letters one at a time
#[async_trait]
pub trait Sender: Send {
    /// Deliver one letter.
    ///
    /// # Errors
    /// Any failure. The caller does not retry.
    async fn send(&mut self, letter: &Letter) -> Result<(), DeliveryError>;

    /// End the session politely.
    async fn quit(&mut self) {}
}

/// Opens new [`Sender`] sessions
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish and authenticate a session.
    ///
    /// # Errors
    /// If the session cannot be established.
    async fn connect(&self) -> Result<Box<dyn Sender>, DeliveryError>;
}

/// Opens authenticated SMTP submission sessions
#[derive(Debug, Clone)]
pub struct SmtpConnector {
    config: SmtpConfig,
}

impl SmtpConnector {
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SmtpConnector {
    async fn connect(&self) -> Result<Box<dyn Sender>, DeliveryError> {
        let client = open_session(&self.config).await?;

        Ok(Box::new(SmtpSender {
            config: self.config.clone(),
            client: Some(client),
        }))
    }
}

/// One SMTP session, reused for every letter a worker sends
///
/// After a failed transaction the session is reset with RSET. If the
/// connection itself is lost it is dropped and re-opened on the next send.
#[derive(Debug)]
pub struct SmtpSender {
    config: SmtpConfig,
    client: Option<SmtpClient>,
}

impl SmtpSender {
    async fn transaction(
        config: &SmtpConfig,
        client: &mut SmtpClient,
        letter: &Letter,
    ) -> Result<(), DeliveryError> {
        if letter.addresses.is_empty() {
            return Err(PermanentError::NoRecipients.into());
        }

        let timeouts = &config.timeouts;
        let sender = config.sender();

        let message = MessageBuilder::new()
            .from(sender)
            .to_multiple(&letter.addresses)
            .subject(letter.subject.as_str())
            .message_id(format!("{}@{}", letter.id, config.helo))
            .body(letter.body.as_str())
            .build()?;

        let mail = with_timeout("MAIL FROM", timeouts.command(), client.mail_from(sender)).await?;
        if !mail.is_success() {
            return Err(rejection("MAIL FROM", &mail));
        }

        for address in &letter.addresses {
            let rcpt = with_timeout("RCPT TO", timeouts.command(), client.rcpt_to(address)).await?;
            if !rcpt.is_success() {
                let message = format!("Server rejected RCPT TO {address}: {}", rcpt.message());
                return Err(if rcpt.is_permanent_error() {
                    PermanentError::InvalidRecipient(message).into()
                } else {
                    TemporaryError::SmtpTemporary(message).into()
                });
            }
        }

        let data = with_timeout("DATA", timeouts.data(), client.data()).await?;
        if !data.is_intermediate() {
            return Err(rejection("DATA", &data));
        }

        let accepted =
            with_timeout("message data", timeouts.data(), client.send_data(&message)).await?;
        if !accepted.is_success() {
            return Err(rejection("message", &accepted));
        }

        Ok(())
    }

    /// Bring the session back to a clean state after a failed transaction.
    ///
    /// Returns `false` if the session is unusable and should be dropped.
    async fn reset(config: &SmtpConfig, client: &mut SmtpClient) -> bool {
        matches!(
            with_timeout("RSET", config.timeouts.command(), client.rset()).await,
            Ok(response) if response.is_success()
        )
    }
}

#[async_trait]
impl Sender for SmtpSender {
    async fn send(&mut self, letter: &Letter) -> Result<(), DeliveryError> {
        let mut client = match self.client.take() {
            Some(client) => client,
            None => {
                tracing::debug!(server = %self.config.address(), "Re-opening SMTP session");
                open_session(&self.config).await?
            }
        };

        let result = Self::transaction(&self.config, &mut client, letter).await;

        match &result {
            Err(error)
                if is_connection_lost(error) || !Self::reset(&self.config, &mut client).await =>
            {
                tracing::debug!(
                    server = %self.config.address(),
                    "Dropping SMTP session after failure: {error}"
                );
            }
            _ => self.client = Some(client),
        }

        result
    }

    async fn quit(&mut self) {
        if let Some(mut client) = self.client.take()
            && let Err(e) = tokio::time::timeout(self.config.timeouts.quit(), client.quit()).await
        {
            tracing::warn!(server = %self.config.address(), "QUIT timed out: {e}");
        }
    }
}

/// Connect, read the greeting, negotiate TLS and authenticate
async fn open_session(config: &SmtpConfig) -> Result<SmtpClient, DeliveryError> {
    let address = config.address();
    let timeout = config.timeouts.connect();

    if config.accept_invalid_certs && config.tls != TlsMode::None {
        tracing::warn!(
            server = %address,
            "SECURITY WARNING: TLS certificate validation is disabled for this connection"
        );
    }

    let connect = async {
        match config.tls {
            TlsMode::Implicit => {
                SmtpClient::connect_tls(&address, config.host.clone(), config.accept_invalid_certs)
                    .await
            }
            TlsMode::StartTls | TlsMode::None => {
                SmtpClient::connect(&address, config.host.clone())
                    .await
                    .map(|client| client.accept_invalid_certs(config.accept_invalid_certs))
            }
        }
    };

    let mut client = with_timeout("connect", timeout, connect)
        .await
        .map_err(|e| {
            TemporaryError::ConnectionFailed(format!("Failed to connect to {address}: {e}"))
        })?;

    let greeting = with_timeout("greeting", timeout, client.read_greeting()).await?;
    if !greeting.is_success() {
        return Err(TemporaryError::ServerBusy(format!(
            "Server rejected connection: {}",
            greeting.message()
        ))
        .into());
    }

    let mut ehlo = with_timeout("EHLO", timeout, client.ehlo(&config.helo))
        .await?
        .ensure(200..300)?;

    if config.tls == TlsMode::StartTls {
        if !ehlo.has_extension("STARTTLS") {
            return Err(PermanentError::TlsRequired(format!(
                "{address} does not advertise STARTTLS"
            ))
            .into());
        }

        let response = with_timeout("STARTTLS", timeout, client.starttls())
            .await
            .map_err(|e| PermanentError::TlsRequired(format!("STARTTLS failed: {e}")))?;
        if !response.is_success() {
            return Err(PermanentError::TlsRequired(format!(
                "Server rejected STARTTLS: {}",
                response.message()
            ))
            .into());
        }

        ehlo = with_timeout("EHLO", timeout, client.ehlo(&config.helo))
            .await?
            .ensure(200..300)?;
    }

    if !config.username.is_empty() {
        if !ehlo.has_extension("AUTH") {
            tracing::warn!(server = %address, "Server does not advertise AUTH, trying anyway");
        }

        with_timeout(
            "AUTH",
            timeout,
            client.auth_plain(&config.username, &config.password),
        )
        .await
        .map_err(|e| PermanentError::AuthenticationFailed(e.to_string()))?;
    }

    tracing::debug!(server = %address, tls = client.is_tls(), "SMTP session established");

    Ok(client)
}

async fn with_timeout<T>(
    operation: &str,
    duration: Duration,
    future: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, DeliveryError> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TemporaryError::Timeout(format!("{operation} timed out after {duration:?}")))?
        .map_err(DeliveryError::from)
}

fn rejection(stage: &str, response: &Response) -> DeliveryError {
    let message = format!("Server rejected {stage}: {}", response.message());
    if response.is_permanent_error() {
        PermanentError::MessageRejected(message).into()
    } else {
        TemporaryError::SmtpTemporary(message).into()
    }
}

const fn is_connection_lost(error: &DeliveryError) -> bool {
    matches!(
        error,
        DeliveryError::Temporary(
            TemporaryError::ConnectionFailed(_)
                | TemporaryError::Timeout(_)
                | TemporaryError::TlsHandshakeFailed(_)
        )
    )
}
