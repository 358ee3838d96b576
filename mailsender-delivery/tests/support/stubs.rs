//! In-process senders with scripted behaviour
#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use mailsender_common::{JobId, Letter};
use mailsender_delivery::{Connector, DeliveryError, PermanentError, Sender, TemporaryError};

#[derive(Debug, Default)]
struct Script {
    /// Letters with this subject fail
    fail: Option<String>,
    /// Letters with this subject never finish sending
    hang: Option<String>,
    /// Every letter that reached `send`, in order
    attempts: Mutex<Vec<JobId>>,
}

/// Hands out [`StubSender`]s that follow a shared script
#[derive(Debug, Default)]
pub struct StubConnector {
    script: Arc<Script>,
    refuse: usize,
    connects: AtomicUsize,
}

impl StubConnector {
    /// Every letter is sent successfully
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Letters titled `subject` fail with a permanent error
    pub fn failing_on(subject: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(Script {
                fail: Some(subject.to_string()),
                ..Script::default()
            }),
            ..Self::default()
        })
    }

    /// Sending a letter titled `subject` never completes
    pub fn hanging_on(subject: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(Script {
                hang: Some(subject.to_string()),
                ..Script::default()
            }),
            ..Self::default()
        })
    }

    /// The first `count` connection attempts fail
    pub fn refusing(count: usize) -> Arc<Self> {
        Arc::new(Self {
            refuse: count,
            ..Self::default()
        })
    }

    pub fn attempts(&self) -> Vec<JobId> {
        self.script
            .attempts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Connector for StubConnector {
    async fn connect(&self) -> Result<Box<dyn Sender>, DeliveryError> {
        if self.connects.fetch_add(1, Ordering::SeqCst) < self.refuse {
            return Err(TemporaryError::ConnectionFailed("stub refused".into()).into());
        }

        Ok(Box::new(StubSender {
            script: Arc::clone(&self.script),
        }))
    }
}

pub struct StubSender {
    script: Arc<Script>,
}

#[async_trait]
impl Sender for StubSender {
    async fn send(&mut self, letter: &Letter) -> Result<(), DeliveryError> {
        self.script
            .attempts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(letter.id);

        if self.script.hang.as_deref() == Some(letter.subject.as_str()) {
            std::future::pending::<()>().await;
        }

        if self.script.fail.as_deref() == Some(letter.subject.as_str()) {
            return Err(PermanentError::MessageRejected("stub rejected".into()).into());
        }

        Ok(())
    }
}
