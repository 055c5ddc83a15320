//! WebSocket transport implementation.
//!
//! Client connections over tokio-tungstenite. `wss://` URLs are served with
//! rustls and the webpki root store.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::HeaderValue,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use crate::traits::{
    Incoming, Payload, Transport, TransportError, TransportSink, TransportStream, ABNORMAL_CLOSURE,
};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

/// WebSocket client transport.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &self,
        url: &str,
        protocols: &[String],
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        if !protocols.is_empty() {
            let value = HeaderValue::from_str(&protocols.join(", "))
                .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", value);
        }

        let (ws_stream, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        debug!(url = %url, status = %response.status(), "WebSocket handshake completed");

        let (sink, stream) = ws_stream.split();
        Ok((
            Box::new(WebSocketSink { sink, open: true }),
            Box::new(WebSocketSource {
                stream,
                max_message_size: self.config.max_message_size,
            }),
        ))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Outbound half of a WebSocket connection.
pub struct WebSocketSink {
    sink: SplitSink<Stream, Message>,
    open: bool,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match payload {
            Payload::Text(text) => Message::Text(text.clone()),
            Payload::Binary(data) => Message::Binary(data.to_vec()),
        };

        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.open, false) {
            return Ok(()); // Already closed
        }

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };

        match self.sink.send(Message::Close(Some(frame))).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {}
            Err(e) => return Err(TransportError::Other(format!("Failed to close: {}", e))),
        }

        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {}", e))),
        }
    }
}

/// Inbound half of a WebSocket connection.
pub struct WebSocketSource {
    stream: SplitStream<Stream>,
    max_message_size: usize,
}

#[async_trait]
impl TransportStream for WebSocketSource {
    async fn recv(&mut self) -> Result<Incoming, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > self.max_message_size {
                        warn!(
                            "Message too large: {} bytes (max: {})",
                            text.len(),
                            self.max_message_size
                        );
                        return Err(TransportError::MessageTooLarge(text.len()));
                    }
                    return Ok(Incoming::Message(Payload::Text(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > self.max_message_size {
                        warn!(
                            "Message too large: {} bytes (max: {})",
                            data.len(),
                            self.max_message_size
                        );
                        return Err(TransportError::MessageTooLarge(data.len()));
                    }
                    return Ok(Incoming::Message(Payload::Binary(Bytes::from(data))));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are queued by tungstenite and flushed with the next write
                }
                Some(Ok(Message::Frame(_))) => {
                    // Raw frame, ignore
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Received close frame");
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((ABNORMAL_CLOSURE, String::new()));
                    return Ok(Incoming::Closed { code, reason });
                }
                Some(Err(WsError::ConnectionClosed)) | None => {
                    debug!("WebSocket stream ended");
                    return Ok(Incoming::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    });
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }
}
