use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delivery worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers, each with its own session
    ///
    /// Default: 4
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub smtp: SmtpConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            smtp: SmtpConfig::default(),
        }
    }
}

const fn default_workers() -> usize {
    4
}

/// How the submission connection is secured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsMode {
    /// TLS from the first byte (SMTPS)
    #[default]
    Implicit,
    /// Plain connection upgraded with STARTTLS; fails if the server does not offer it
    StartTls,
    /// No encryption (local relays and tests)
    None,
}

/// Submission server the delivery workers send through
#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Default: 465
    #[serde(default = "default_port")]
    pub port: u16,

    /// Leave empty to skip authentication
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Envelope sender and From header; falls back to `username`
    #[serde(default)]
    pub from: Option<String>,

    #[serde(default)]
    pub tls: TlsMode,

    /// Accept any server certificate. Testing only.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Name announced in EHLO and used in generated Message-IDs
    #[serde(default = "default_helo")]
    pub helo: String,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .field("tls", &self.tls)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("helo", &self.helo)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            from: None,
            tls: TlsMode::default(),
            accept_invalid_certs: false,
            helo: default_helo(),
            timeouts: SmtpTimeouts::default(),
        }
    }
}

impl SmtpConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The sender address used for MAIL FROM and the From header
    #[must_use]
    pub fn sender(&self) -> &str {
        self.from.as_deref().unwrap_or(&self.username)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

const fn default_port() -> u16 {
    465
}

fn default_helo() -> String {
    "localhost".to_string()
}

/// SMTP operation timeouts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SmtpTimeouts {
    /// Timeout for connection establishment, greeting, TLS and authentication
    ///
    /// Default: 30 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Timeout for each envelope command (MAIL FROM, RCPT TO, RSET)
    ///
    /// Default: 30 seconds
    #[serde(default = "default_command_timeout")]
    pub command_secs: u64,

    /// Timeout for DATA command and message transmission
    ///
    /// Default: 120 seconds
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// Timeout for QUIT command
    ///
    /// Default: 10 seconds
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            command_secs: default_command_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

impl SmtpTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_command_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}
