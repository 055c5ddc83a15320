//! # tandem-transport
//!
//! Reconnecting client connections for Tandem.
//!
//! This crate keeps one logical connection to a multiplayer server alive:
//!
//! - **Transport** - Pluggable connection opener (WebSocket by default)
//! - **ReconnectingSocket** - Backoff, timeouts, outbound queue and listeners
//! - **Timer** - Cancellable deferred continuations, real or manual
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tandem_transport::{EventKind, Listener, ReconnectConfig, ReconnectingSocket};
//!
//! let socket = ReconnectingSocket::connect(
//!     "ws://localhost:8080/ws/doc-1/token",
//!     vec![],
//!     ReconnectConfig::default(),
//! )?;
//!
//! socket.add_event_listener(
//!     EventKind::Message,
//!     Listener::callback(|event| println!("{:?}", event)),
//! );
//! socket.send(r#"{"type":"setCursor","x":1,"y":2}"#);
//! ```

pub mod config;
pub mod event;
pub mod queue;
pub mod socket;
pub mod timer;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use config::ReconnectConfig;
pub use event::{CloseEvent, ErrorEvent, Event, EventHandler, EventKind, Listener, TIMEOUT_MESSAGE};
pub use queue::MessageQueue;
pub use socket::{ReadyState, ReconnectingSocket, SocketError, UrlProvider};
pub use timer::{ManualTimer, Timer, TimerHandle, TokioTimer};
pub use traits::{
    Incoming, Payload, Transport, TransportError, TransportSink, TransportStream,
    ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
