//! # Session
//!
//! A [`Session`] is the explicitly owned handle to one multiplayer
//! connection: it holds the store, the socket and the dispatcher, and wires
//! socket events into dispatches.
//!
//! ```text
//!   open    ──▶ setConnectionStatus(true)
//!   close   ──▶ setConnectionStatus(false)
//!   message ──▶ decode ──▶ dispatch ──▶ hooks
//!   error   ──▶ log
//! ```
//!
//! Listeners hold only a weak reference to the dispatcher, so dropping the
//! session releases the socket.

use std::sync::{Arc, Weak};
use tandem_core::{CollabState, Store};
use tandem_protocol::{DocumentId, UserId};
use tandem_transport::{
    Event, EventKind, Listener, ReconnectConfig, ReconnectingSocket, SocketError, Transport,
    UrlProvider, NORMAL_CLOSURE,
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::dispatcher::{Callbacks, Dispatcher, WireFormat};
use crate::metrics;

/// Build the multiplayer endpoint URL for a document.
#[must_use]
pub fn connection_url(base_url: &str, document_id: &str, access_token: &str) -> String {
    format!(
        "{}/ws/{}/{}",
        base_url.trim_end_matches('/'),
        document_id,
        access_token
    )
}

/// Everything needed to start a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Where to connect.
    pub url: UrlProvider,
    /// Subprotocols offered during the handshake.
    pub protocols: Vec<String>,
    /// Reconnection policy.
    pub reconnect: ReconnectConfig,
    /// Document the session acts on.
    pub document_id: DocumentId,
    /// Local user.
    pub user_id: UserId,
    /// Outbound encoding.
    pub format: WireFormat,
    /// Inbound hooks.
    pub callbacks: Callbacks,
}

impl SessionOptions {
    /// Create options with default policy, JSON encoding and no hooks.
    #[must_use]
    pub fn new(
        url: impl Into<UrlProvider>,
        document_id: impl Into<DocumentId>,
        user_id: impl Into<UserId>,
    ) -> Self {
        Self {
            url: url.into(),
            protocols: Vec::new(),
            reconnect: ReconnectConfig::default(),
            document_id: document_id.into(),
            user_id: user_id.into(),
            format: WireFormat::default(),
            callbacks: Callbacks::default(),
        }
    }

    /// Set the reconnection policy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the offered subprotocols.
    #[must_use]
    pub fn with_protocols(mut self, protocols: Vec<String>) -> Self {
        self.protocols = protocols;
        self
    }

    /// Set the outbound encoding.
    #[must_use]
    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the inbound hooks.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}

/// One live multiplayer session.
#[derive(Debug)]
pub struct Session {
    dispatcher: Arc<Dispatcher>,
}

impl Session {
    /// Start a session over WebSocket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be constructed.
    pub fn connect(options: SessionOptions, store: Store) -> Result<Self, SocketError> {
        let transport = Arc::new(tandem_transport::WebSocketTransport::default());
        Self::with_transport(options, store, transport)
    }

    /// Start a session over the given transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be constructed.
    pub fn with_transport(
        options: SessionOptions,
        store: Store,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, SocketError> {
        let socket = ReconnectingSocket::new(
            options.url,
            options.protocols,
            options.reconnect,
            transport,
        )?;

        let dispatcher = Arc::new(
            Dispatcher::new(
                Arc::new(store),
                socket.clone(),
                options.document_id,
                options.user_id,
            )
            .with_format(options.format)
            .with_callbacks(options.callbacks),
        );

        wire(&socket, Arc::downgrade(&dispatcher));
        info!(document = %dispatcher.document_id(), "Session started");

        Ok(Self { dispatcher })
    }

    /// Get the dispatcher, for outbound helpers.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Get the socket.
    #[must_use]
    pub fn socket(&self) -> &ReconnectingSocket {
        self.dispatcher.socket()
    }

    /// Get the current state snapshot.
    #[must_use]
    pub fn state(&self) -> Arc<CollabState> {
        self.dispatcher.store().state()
    }

    /// Subscribe to state snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<CollabState>> {
        self.dispatcher.store().subscribe()
    }

    /// Close the connection and stop reconnecting.
    pub fn close(&self) {
        self.socket().close(NORMAL_CLOSURE, "");
    }

    /// Reconnect with a fresh retry budget.
    pub fn reconnect(&self) {
        self.socket().reconnect(NORMAL_CLOSURE, "");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn wire(socket: &ReconnectingSocket, dispatcher: Weak<Dispatcher>) {
    let d = dispatcher.clone();
    socket.add_event_listener(
        EventKind::Open,
        Listener::callback(move |_| {
            if let Some(dispatcher) = d.upgrade() {
                metrics::record_open();
                metrics::set_retry_count(dispatcher.socket().retry_count());
                dispatcher.dispatch(tandem_protocol::Action::connection_status(true));
            }
        }),
    );

    let d = dispatcher.clone();
    socket.add_event_listener(
        EventKind::Close,
        Listener::callback(move |event| {
            if let (Some(dispatcher), Event::Close(close)) = (d.upgrade(), event) {
                info!(code = close.code, reason = %close.reason, "Connection closed");
                metrics::record_close();
                dispatcher.dispatch(tandem_protocol::Action::connection_status(false));
            }
        }),
    );

    let d = dispatcher.clone();
    socket.add_event_listener(
        EventKind::Error,
        Listener::callback(move |event| {
            if let (Some(dispatcher), Event::Error(error)) = (d.upgrade(), event) {
                warn!(
                    error = %error.message,
                    retry_count = dispatcher.socket().retry_count(),
                    "Connection error"
                );
                metrics::record_error(if error.is_timeout() { "timeout" } else { "connection" });
            }
        }),
    );

    socket.add_event_listener(
        EventKind::Message,
        Listener::callback(move |event| {
            if let (Some(dispatcher), Event::Message(payload)) = (dispatcher.upgrade(), event) {
                // Failures are logged by the dispatcher.
                let _ = dispatcher.handle_payload(payload);
                metrics::set_buffered_amount(dispatcher.socket().buffered_amount());
            }
        }),
    );
}
