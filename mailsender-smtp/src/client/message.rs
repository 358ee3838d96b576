//! Message formatting for outbound letters.

use std::io::Write;

use chrono::{DateTime, Utc};

use super::error::{ClientError, Result};

/// Builder for an HTML message ready to be sent after `DATA`.
///
/// # Examples
///
/// ```
/// use mailsender_smtp::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("sender@example.com")
///     .to("recipient@example.com")
///     .subject("Hello")
///     .body("<p>This is the message body</p>")
///     .build()
///     .unwrap();
///
/// assert!(message.contains("Content-Type: text/html; charset=utf-8\r\n"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    message_id: Option<String>,
    date: Option<DateTime<Utc>>,
    body: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, email: impl Into<String>) -> Self {
        self.from = Some(email.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    /// Adds multiple recipients to the To header.
    #[must_use]
    pub fn to_multiple(mut self, emails: &[impl AsRef<str>]) -> Self {
        self.to
            .extend(emails.iter().map(|email| email.as_ref().to_string()));
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the Message-ID header, without angle brackets.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Overrides the Date header, which defaults to the time of `build`.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the HTML body.
    #[must_use]
    pub fn body(mut self, content: impl Into<String>) -> Self {
        self.body = Some(content.into());
        self
    }

    /// Builds the final message with CRLF line endings.
    ///
    /// The result is not dot-stuffed; [`super::SmtpClient::send_data`] does
    /// that on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no sender or no recipient.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .ok_or_else(|| ClientError::BuilderError("Missing From address".to_string()))?;

        if self.to.is_empty() {
            return Err(ClientError::BuilderError(
                "At least one recipient is required".to_string(),
            ));
        }

        let mut message = Vec::with_capacity(1024);

        write!(&mut message, "From: {from}\r\n")?;
        write!(&mut message, "To: {}\r\n", self.to.join(", "))?;

        if let Some(subject) = &self.subject {
            write!(&mut message, "Subject: {}\r\n", encode_header(subject))?;
        }

        let date = self.date.unwrap_or_else(Utc::now);
        write!(&mut message, "Date: {}\r\n", date.to_rfc2822())?;

        if let Some(id) = &self.message_id {
            write!(&mut message, "Message-ID: <{id}>\r\n")?;
        }

        write!(&mut message, "MIME-Version: 1.0\r\n")?;
        write!(&mut message, "Content-Type: text/html; charset=utf-8\r\n")?;

        // Blank line between headers and body
        write!(&mut message, "\r\n")?;

        if let Some(body) = &self.body {
            write!(&mut message, "{}", normalize_line_endings(body))?;
        }

        String::from_utf8(message).map_err(|e| ClientError::Utf8Error(e.utf8_error()))
    }
}

/// RFC 2047 encoded-word for header values that are not plain ASCII.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", base64_encode(value.as_bytes()))
    }
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

/// Escape lines starting with `.` so they cannot terminate `DATA` early.
#[must_use]
pub fn dot_stuff(data: &str) -> String {
    let mut stuffed = String::with_capacity(data.len() + 16);

    for (i, line) in data.split("\r\n").enumerate() {
        if i > 0 {
            stuffed.push_str("\r\n");
        }
        if line.starts_with('.') {
            stuffed.push('.');
        }
        stuffed.push_str(line);
    }

    stuffed
}

/// Standard base64 with padding and no line wrapping.
#[must_use]
pub fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let mut result = String::with_capacity(data.len().div_ceil(3) * 4);

    for chunk in data.chunks(3) {
        let mut buf = [0u8; 3];
        buf[..chunk.len()].copy_from_slice(chunk);

        let indices = [
            buf[0] >> 2,
            ((buf[0] & 0x03) << 4) | (buf[1] >> 4),
            ((buf[1] & 0x0F) << 2) | (buf[2] >> 6),
            buf[2] & 0x3F,
        ];

        for (i, index) in indices.into_iter().enumerate() {
            if i <= chunk.len() {
                result.push(char::from(ALPHABET[usize::from(index)]));
            } else {
                result.push('=');
            }
        }
    }

    result
}
