//! Mock SMTP submission server for delivery tests
//!
//! The server can:
//! - Require AUTH PLAIN credentials
//! - Reject chosen recipients with a chosen reply
//! - Drop the first connection after a number of commands
//! - Record every command it receives, per connection
//!
//! # Example
//!
//! ```rust,no_run
//! use support::mock_server::MockSmtpServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MockSmtpServer::builder()
//!     .with_credentials("user", "pass")
//!     .with_rejected_recipient("nobody@example.com", 550, "User unknown")
//!     .build()
//!     .await?;
//!
//! // Point an SmtpConfig at server.port()
//! server.shutdown();
//! # Ok(())
//! # }
//! ```
#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// SMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    /// Decoded `user:password` pair
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content (after DATA), without the terminating dot
    MessageContent(String),
    Rset,
    Quit,
    StartTls,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    capabilities: Vec<String>,
    credentials: Option<(String, String)>,
    rejected_recipients: HashMap<String, Reply>,
    data_end: Reply,
    drop_first_connection_after: Option<usize>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            capabilities: vec![
                "mock.test".to_string(),
                "AUTH PLAIN".to_string(),
                "SIZE 10000".to_string(),
            ],
            credentials: None,
            rejected_recipients: HashMap::new(),
            data_end: Reply::new(250, "OK: Message accepted"),
            drop_first_connection_after: None,
        }
    }
}

/// Mock SMTP server for testing
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands_received: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every command received, over all connections, in arrival order
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands_received.read().await.clone()
    }

    /// Number of connections accepted so far
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
        drop_after: Option<usize>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut received = 0;

        writer.write_all(b"220 Mock SMTP Server\r\n").await?;
        writer.flush().await?;

        loop {
            if drop_after.is_some_and(|limit| received >= limit) {
                return Ok(());
            }

            let mut line = String::new();
            match timeout(Duration::from_secs(10), reader.read_line(&mut line)).await {
                Ok(Ok(0)) | Err(_) => return Ok(()),
                Ok(read) => read?,
            };
            received += 1;

            let line = line.trim_end().to_string();
            let (verb, argument) = line.split_once(' ').unwrap_or((line.as_str(), ""));

            let (command, reply) = match verb.to_uppercase().as_str() {
                "EHLO" => {
                    let mut ehlo = String::new();
                    let last = config.capabilities.len() - 1;
                    for (i, capability) in config.capabilities.iter().enumerate() {
                        let separator = if i == last { ' ' } else { '-' };
                        ehlo.push_str(&format!("250{separator}{capability}\r\n"));
                    }
                    (SmtpCommand::Ehlo(argument.to_string()), ehlo.into_bytes())
                }
                "AUTH" => {
                    let token = argument.strip_prefix("PLAIN ").unwrap_or_default();
                    let decoded = decode_plain(token);
                    let accepted = config.credentials.as_ref().is_none_or(|(user, pass)| {
                        decoded == format!("{user}:{pass}")
                    });
                    let reply = if accepted {
                        Reply::new(235, "Authentication successful")
                    } else {
                        Reply::new(535, "Authentication credentials invalid")
                    };
                    (SmtpCommand::Auth(decoded), reply.to_bytes())
                }
                "MAIL" => (
                    SmtpCommand::MailFrom(argument.to_string()),
                    Reply::new(250, "OK").to_bytes(),
                ),
                "RCPT" => {
                    let address = argument
                        .trim_start_matches("TO:")
                        .trim_matches(['<', '>'])
                        .to_string();
                    let reply = config
                        .rejected_recipients
                        .get(&address)
                        .cloned()
                        .unwrap_or_else(|| Reply::new(250, "OK"));
                    (SmtpCommand::RcptTo(address), reply.to_bytes())
                }
                "DATA" => {
                    commands.write().await.push(SmtpCommand::Data);
                    writer
                        .write_all(b"354 Start mail input; end with <CRLF>.<CRLF>\r\n")
                        .await?;
                    writer.flush().await?;

                    let mut content = String::new();
                    loop {
                        let mut data_line = String::new();
                        if reader.read_line(&mut data_line).await? == 0 {
                            return Ok(());
                        }
                        if data_line.trim_end() == "." {
                            break;
                        }
                        content.push_str(&data_line);
                    }

                    (
                        SmtpCommand::MessageContent(content),
                        config.data_end.to_bytes(),
                    )
                }
                "RSET" => (SmtpCommand::Rset, Reply::new(250, "OK").to_bytes()),
                "STARTTLS" => (
                    SmtpCommand::StartTls,
                    Reply::new(502, "Command not implemented").to_bytes(),
                ),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(b"221 Bye\r\n").await?;
                    writer.flush().await?;
                    return Ok(());
                }
                _ => (
                    SmtpCommand::Other(line.clone()),
                    Reply::new(500, "Unknown command").to_bytes(),
                ),
            };

            commands.write().await.push(command);
            writer.write_all(&reply).await?;
            writer.flush().await?;
        }
    }
}

/// Decode an AUTH PLAIN token into `user:password`
fn decode_plain(token: &str) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let mut bytes = Vec::new();
    let mut buffer = 0u32;
    let mut bits = 0;
    for c in token.bytes().take_while(|c| *c != b'=') {
        let Some(value) = ALPHABET.iter().position(|a| *a == c) else {
            return String::new();
        };
        buffer = (buffer << 6) | u32::try_from(value).unwrap_or_default();
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            bytes.push(u8::try_from((buffer >> bits) & 0xff).unwrap_or_default());
        }
    }

    String::from_utf8_lossy(&bytes)
        .trim_start_matches('\0')
        .replacen('\0', ":", 1)
}

/// Builder for configuring a `MockSmtpServer`
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    /// Replace the EHLO capability lines (the first is the greeting line)
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.config.capabilities = capabilities.iter().map(ToString::to_string).collect();
        self
    }

    /// Only accept AUTH PLAIN with these credentials
    #[must_use]
    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.config.credentials = Some((user.to_string(), password.to_string()));
        self
    }

    /// Answer RCPT TO for `address` with the given reply
    #[must_use]
    pub fn with_rejected_recipient(
        mut self,
        address: &str,
        code: u16,
        message: impl Into<String>,
    ) -> Self {
        self.config
            .rejected_recipients
            .insert(address.to_string(), Reply::new(code, message));
        self
    }

    /// Set the reply sent after the message content
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end = Reply::new(code, message);
        self
    }

    /// Close the first connection silently once it has received `count` commands
    #[must_use]
    pub const fn with_first_connection_dropped_after(mut self, count: usize) -> Self {
        self.config.drop_first_connection_after = Some(count);
        self
    }

    /// Build and start the mock SMTP server
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to a port
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        {
            let commands = Arc::clone(&commands);
            let connections = Arc::clone(&connections);
            let shutdown = Arc::clone(&shutdown);

            tokio::spawn(async move {
                while !shutdown.load(Ordering::Relaxed) {
                    // Accept with a timeout so the shutdown flag is checked
                    let Ok(Ok((stream, _))) =
                        timeout(Duration::from_millis(100), listener.accept()).await
                    else {
                        continue;
                    };

                    let index = connections.fetch_add(1, Ordering::SeqCst);
                    let drop_after = config.drop_first_connection_after.filter(|_| index == 0);
                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&commands);

                    tokio::spawn(async move {
                        if let Err(e) =
                            MockSmtpServer::handle_client(stream, config, commands, drop_after)
                                .await
                        {
                            eprintln!("Mock server client error: {e}");
                        }
                    });
                }
            });
        }

        Ok(MockSmtpServer {
            addr,
            commands_received: commands,
            connections,
            shutdown,
        })
    }
}
