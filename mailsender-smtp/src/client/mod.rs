//! SMTP client used by the delivery workers.
//!
//! Supports:
//!
//! - Plain TCP, implicit TLS and STARTTLS connections
//! - AUTH PLAIN
//! - Reusing one session for many transactions (RSET between them)
//! - HTML message formatting with dot-stuffing on submission
//!
//! # Examples
//!
//! ```no_run
//! use mailsender_smtp::{MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("localhost:2525", "localhost".to_string()).await?;
//! client.read_greeting().await?;
//! client.ehlo("client.example.com").await?;
//! client.auth_plain("user", "secret").await?;
//!
//! let message = MessageBuilder::new()
//!     .from("user@example.com")
//!     .to("recipient@example.com")
//!     .subject("Hello")
//!     .body("<p>Hello World</p>")
//!     .build()?;
//!
//! client.mail_from("user@example.com").await?;
//! client.rcpt_to("recipient@example.com").await?;
//! client.data().await?;
//! client.send_data(&message).await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod message;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use message::{MessageBuilder, base64_encode, dot_stuff};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
