//! Transport abstraction traits for Tandem.
//!
//! A [`Transport`] opens a connection to a URL and hands back its two
//! halves: a [`TransportSink`] for outbound payloads and a
//! [`TransportStream`] for inbound ones. The reconnecting socket owns the
//! sink and pumps the stream from a separate task.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the far end vanished without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// An opaque message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Bytes),
}

impl Payload {
    /// Size used for backlog accounting: characters for text, bytes for
    /// binary.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Payload::Text(text) => text.chars().count(),
            Payload::Binary(data) => data.len(),
        }
    }

    /// Get the payload as text, if it is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Binary(_) => None,
        }
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Binary(b)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(v))
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(text) => write!(f, "{}", text),
            Payload::Binary(data) => write!(f, "<{} bytes>", data.len()),
        }
    }
}

/// Something read from an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A message from the far end.
    Message(Payload),
    /// The far end closed the connection.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection timed out.
    #[error("Connection timed out")]
    Timeout,

    /// The URL cannot be used by this transport.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to establish the connection.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Incoming message exceeded the configured maximum.
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A transport that can open client connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `url`, offering the given subprotocols.
    async fn open(
        &self,
        url: &str,
        protocols: &[String],
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), TransportError>;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;
}

/// Outbound half of an open connection.
#[async_trait]
pub trait TransportSink: Send {
    /// Send a payload.
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Inbound half of an open connection.
#[async_trait]
pub trait TransportStream: Send {
    /// Receive the next message or the close notification.
    ///
    /// After `Incoming::Closed` or an error the stream is finished.
    async fn recv(&mut self) -> Result<Incoming, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_size() {
        assert_eq!(Payload::from("héllo").size(), 5);
        assert_eq!(Payload::from(vec![0u8; 12]).size(), 12);
    }

    #[test]
    fn test_payload_display() {
        assert_eq!(Payload::from("hi").to_string(), "hi");
        assert_eq!(Payload::from(vec![1u8, 2, 3]).to_string(), "<3 bytes>");
    }
}
