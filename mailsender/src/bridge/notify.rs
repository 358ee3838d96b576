//! Publishes finished letters as JSON lines

use std::path::PathBuf;

use mailsender_common::{Letter, internal, outgoing, tracing};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::OpenOptions,
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

use crate::error::Result;

/// Where finished letters are published
///
/// ```ron
/// notify: File(path: "/var/log/mailsender/completed.jsonl"),
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyConfig {
    #[default]
    Stdout,
    /// Append-only file, created if missing
    File { path: PathBuf },
}

pub struct Notifier {
    sink: Box<dyn AsyncWrite + Send + Unpin>,
}

impl Notifier {
    /// Open the configured sink
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for appending.
    pub async fn open(config: &NotifyConfig) -> Result<Self> {
        let sink: Box<dyn AsyncWrite + Send + Unpin> = match config {
            NotifyConfig::Stdout => Box::new(tokio::io::stdout()),
            NotifyConfig::File { path } => Box::new(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?,
            ),
        };

        Ok(Self { sink })
    }

    /// Publish every letter received until the channel closes
    ///
    /// A letter that cannot be written is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub async fn run(mut self, mut outbound: mpsc::Receiver<Letter>) -> Result<()> {
        internal!("Notifier starting");

        while let Some(letter) = outbound.recv().await {
            if let Err(e) = self.publish(&letter).await {
                tracing::error!(letter_id = %letter.id, "Failed to publish letter: {e}");
            }
        }

        self.sink.flush().await?;
        internal!("Notifier stopped");

        Ok(())
    }

    async fn publish(&mut self, letter: &Letter) -> Result<()> {
        let mut line = serde_json::to_vec(letter)?;
        line.push(b'\n');

        self.sink.write_all(&line).await?;
        self.sink.flush().await?;

        outgoing!("Published {} as {}", letter.id, letter.status);
        Ok(())
    }
}
