//! # Reconnecting socket
//!
//! A [`ReconnectingSocket`] keeps a logical connection alive across
//! transport failures. The handle is cheap to clone; every operation is a
//! command sent to a driver task that owns the whole state machine, so
//! listeners, timers and transport callbacks never race each other.
//!
//! ```text
//!   handle ──commands──▶ ┌──────────┐ ◀──internal── timers, open task,
//!                        │  driver  │               stream reader
//!   status ◀──atomics─── └──────────┘ ──events───▶ listeners
//! ```
//!
//! Every connection attempt gets a fresh generation number. Internal events
//! carry the generation they belong to, and anything from an older
//! generation is discarded, so a stale transport can never reach the
//! listeners.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ReconnectConfig;
use crate::event::{CloseEvent, ErrorEvent, Event, EventKind, Listener, Listeners};
use crate::queue::MessageQueue;
use crate::timer::{Timer, TimerHandle, TokioTimer};
use crate::traits::{
    Incoming, Payload, Transport, TransportError, TransportSink, TransportStream, NORMAL_CLOSURE,
};

/// Trace a state machine step when the socket runs with `debug` enabled.
macro_rules! diag {
    ($driver:expr, $($arg:tt)+) => {
        if $driver.config.debug {
            debug!(target: "tandem_transport::socket", $($arg)+);
        }
    };
}

/// Errors raised when constructing a socket.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The socket was created outside a tokio runtime.
    #[error("No tokio runtime available")]
    NoRuntime,

    /// The URL is not a ws:// or wss:// URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The reconnection policy is unusable.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

/// Connection state, as reported by [`ReconnectingSocket::ready_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    /// An attempt is in progress or about to start.
    Connecting = 0,
    /// A connection is open.
    Open = 1,
    /// The open connection is shutting down.
    Closing = 2,
    /// No connection.
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Where the socket gets its URL from.
#[derive(Clone)]
pub enum UrlProvider {
    /// A fixed URL.
    Static(String),
    /// Resolved again before every attempt.
    Deferred(Arc<dyn Fn() -> BoxFuture<'static, Result<String, TransportError>> + Send + Sync>),
}

impl UrlProvider {
    /// Resolve the URL with an async function before every attempt.
    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, TransportError>> + Send + 'static,
    {
        UrlProvider::Deferred(Arc::new(move || Box::pin(f())))
    }
}

impl std::fmt::Debug for UrlProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrlProvider::Static(url) => f.debug_tuple("Static").field(url).finish(),
            UrlProvider::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

impl From<String> for UrlProvider {
    fn from(url: String) -> Self {
        UrlProvider::Static(url)
    }
}

impl From<&str> for UrlProvider {
    fn from(url: &str) -> Self {
        UrlProvider::Static(url.to_string())
    }
}

fn check_scheme(url: &str) -> Result<(), SocketError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(SocketError::InvalidUrl(url.to_string()))
    }
}

/// State shared between the handle and the driver.
#[derive(Debug)]
struct Status {
    ready_state: AtomicU8,
    retry_count: AtomicI64,
    buffered_amount: AtomicUsize,
    url: Mutex<String>,
}

impl Status {
    fn set_ready_state(&self, state: ReadyState) {
        self.ready_state.store(state as u8, Ordering::SeqCst);
    }
}

enum Command {
    Send(Payload),
    Close { code: u16, reason: String },
    Reconnect { code: u16, reason: String },
    AddListener(EventKind, Listener),
    RemoveListener(EventKind, Listener),
}

enum Internal {
    BackoffElapsed {
        generation: u64,
    },
    UrlResolved {
        generation: u64,
        url: Result<String, TransportError>,
    },
    Opened {
        generation: u64,
        sink: Box<dyn TransportSink>,
        stream: Box<dyn TransportStream>,
    },
    OpenFailed {
        generation: u64,
        error: TransportError,
    },
    ConnectTimeout {
        generation: u64,
    },
    UptimeReached {
        generation: u64,
    },
    Received {
        generation: u64,
        payload: Payload,
    },
    RemoteClosed {
        generation: u64,
        code: u16,
        reason: String,
    },
    StreamFailed {
        generation: u64,
        error: TransportError,
    },
}

enum Link {
    Idle,
    Opening(JoinHandle<()>),
    Open {
        sink: Box<dyn TransportSink>,
        reader: JoinHandle<()>,
    },
}

/// A connection that reconnects on its own.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct ReconnectingSocket {
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<Status>,
}

impl ReconnectingSocket {
    /// Create a socket over the default WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if called outside a tokio runtime, if a static URL
    /// is not a ws:// or wss:// URL, or if the config is invalid.
    #[cfg(feature = "websocket")]
    pub fn connect(
        url: impl Into<UrlProvider>,
        protocols: Vec<String>,
        config: ReconnectConfig,
    ) -> Result<Self, SocketError> {
        Self::new(
            url,
            protocols,
            config,
            Arc::new(crate::websocket::WebSocketTransport::default()),
        )
    }

    /// Create a socket over the given transport.
    ///
    /// # Errors
    ///
    /// Same as [`ReconnectingSocket::connect`].
    pub fn new(
        url: impl Into<UrlProvider>,
        protocols: Vec<String>,
        config: ReconnectConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, SocketError> {
        Self::with_timer(url, protocols, config, transport, Arc::new(TokioTimer))
    }

    /// Create a socket with an explicit timer.
    ///
    /// # Errors
    ///
    /// Same as [`ReconnectingSocket::connect`].
    pub fn with_timer(
        url: impl Into<UrlProvider>,
        protocols: Vec<String>,
        config: ReconnectConfig,
        transport: Arc<dyn Transport>,
        timer: Arc<dyn Timer>,
    ) -> Result<Self, SocketError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SocketError::NoRuntime)?;
        config.validate()?;

        let url = url.into();
        let initial_url = match &url {
            UrlProvider::Static(url) => {
                check_scheme(url)?;
                url.clone()
            }
            UrlProvider::Deferred(_) => String::new(),
        };

        let initial_state = if config.start_closed {
            ReadyState::Closed
        } else {
            ReadyState::Connecting
        };

        let status = Arc::new(Status {
            ready_state: AtomicU8::new(initial_state as u8),
            retry_count: AtomicI64::new(-1),
            buffered_amount: AtomicUsize::new(0),
            url: Mutex::new(initial_url),
        });

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            queue: MessageQueue::new(config.max_enqueued_messages),
            should_reconnect: !config.start_closed,
            config,
            url,
            protocols,
            transport,
            timer,
            status: status.clone(),
            listeners: Listeners::default(),
            retry_count: -1,
            close_requested: false,
            connect_lock: false,
            generation: 0,
            link: Link::Idle,
            backoff_timer: None,
            connect_timer: None,
            uptime_timer: None,
            internal_tx,
        };

        runtime.spawn(driver.run(command_rx, internal_rx));

        Ok(Self {
            commands: command_tx,
            status,
        })
    }

    /// Send a payload, or queue it until the next connection opens.
    pub fn send(&self, payload: impl Into<Payload>) {
        self.command(Command::Send(payload.into()));
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Closing an already closed socket does nothing.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        self.command(Command::Close {
            code,
            reason: reason.into(),
        });
    }

    /// Close any current connection and start over with a fresh retry
    /// budget.
    pub fn reconnect(&self, code: u16, reason: impl Into<String>) {
        self.command(Command::Reconnect {
            code,
            reason: reason.into(),
        });
    }

    /// Register a listener.
    pub fn add_event_listener(&self, kind: EventKind, listener: Listener) {
        self.command(Command::AddListener(kind, listener));
    }

    /// Unregister a listener previously passed to `add_event_listener`.
    pub fn remove_event_listener(&self, kind: EventKind, listener: &Listener) {
        self.command(Command::RemoveListener(kind, listener.clone()));
    }

    /// Current connection state.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.status.ready_state.load(Ordering::SeqCst))
    }

    /// Number of retries since the last stable connection, never negative.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        let count = self.status.retry_count.load(Ordering::SeqCst).max(0);
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Total size of the queued outbound payloads.
    #[must_use]
    pub fn buffered_amount(&self) -> usize {
        self.status.buffered_amount.load(Ordering::SeqCst)
    }

    /// URL of the latest attempt.
    #[must_use]
    pub fn url(&self) -> String {
        self.status
            .url
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Socket driver is gone, dropping command");
        }
    }
}

impl std::fmt::Debug for ReconnectingSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingSocket")
            .field("ready_state", &self.ready_state())
            .field("retry_count", &self.retry_count())
            .field("url", &self.url())
            .finish()
    }
}

struct Driver {
    config: ReconnectConfig,
    url: UrlProvider,
    protocols: Vec<String>,
    transport: Arc<dyn Transport>,
    timer: Arc<dyn Timer>,
    status: Arc<Status>,
    queue: MessageQueue,
    listeners: Listeners,
    retry_count: i64,
    should_reconnect: bool,
    close_requested: bool,
    connect_lock: bool,
    generation: u64,
    link: Link,
    backoff_timer: Option<TimerHandle>,
    connect_timer: Option<TimerHandle>,
    uptime_timer: Option<TimerHandle>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        if self.config.start_closed {
            diag!(self, "Starting closed");
        } else {
            self.connect();
        }

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            self.shutdown().await;
                            break;
                        }
                    }
                }

                Some(event) = internal.recv() => {
                    self.handle_internal(event).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send(payload) => self.send(payload).await,
            Command::Close { code, reason } => self.close(code, &reason).await,
            Command::Reconnect { code, reason } => self.reconnect(code, &reason).await,
            Command::AddListener(kind, listener) => self.listeners.add(kind, listener),
            Command::RemoveListener(kind, listener) => {
                self.listeners.remove(kind, &listener);
            }
        }
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::BackoffElapsed { generation } if generation == self.generation => {
                self.backoff_timer = None;
                self.resolve_url(generation).await;
            }
            Internal::UrlResolved { generation, url } if generation == self.generation => {
                match url {
                    Ok(url) => self.open(url, generation).await,
                    Err(e) => {
                        self.connect_lock = false;
                        self.handle_error(ErrorEvent::new(e.to_string())).await;
                    }
                }
            }
            Internal::Opened {
                generation,
                sink,
                stream,
            } => {
                if generation == self.generation && matches!(self.link, Link::Opening(_)) {
                    self.handle_open(sink, stream, generation).await;
                } else {
                    diag!(self, generation, "Discarding stale connection");
                    tokio::spawn(async move {
                        let mut sink = sink;
                        let _ = sink.close(NORMAL_CLOSURE, "").await;
                    });
                }
            }
            Internal::OpenFailed { generation, error } if self.is_opening(generation) => {
                self.handle_error(ErrorEvent::new(error.to_string())).await;
            }
            Internal::ConnectTimeout { generation } if self.is_opening(generation) => {
                diag!(self, "Connection attempt timed out");
                self.connect_timer = None;
                self.handle_error(ErrorEvent::timeout()).await;
            }
            Internal::UptimeReached { generation } if self.is_open(generation) => {
                diag!(self, "Connection accepted as stable");
                self.uptime_timer = None;
                self.set_retry_count(0);
            }
            Internal::Received {
                generation,
                payload,
            } if self.is_open(generation) => {
                diag!(self, size = payload.size(), "Message received");
                self.listeners.emit(&Event::Message(payload));
            }
            Internal::RemoteClosed {
                generation,
                code,
                reason,
            } if self.is_open(generation) => {
                self.link = Link::Idle;
                self.status.set_ready_state(ReadyState::Closed);
                self.handle_close(CloseEvent {
                    code,
                    reason,
                    was_clean: code == NORMAL_CLOSURE,
                });
            }
            Internal::StreamFailed { generation, error } if self.is_open(generation) => {
                self.handle_error(ErrorEvent::new(error.to_string())).await;
            }
            _ => {
                // Belongs to an abandoned attempt.
            }
        }
    }

    fn is_opening(&self, generation: u64) -> bool {
        generation == self.generation && matches!(self.link, Link::Opening(_))
    }

    fn is_open(&self, generation: u64) -> bool {
        generation == self.generation && matches!(self.link, Link::Open { .. })
    }

    fn set_retry_count(&mut self, count: i64) {
        self.retry_count = count;
        self.status.retry_count.store(count, Ordering::SeqCst);
    }

    fn update_buffered_amount(&self) {
        self.status
            .buffered_amount
            .store(self.queue.buffered_amount(), Ordering::SeqCst);
    }

    fn schedule(&self, delay: Duration, event: Internal) -> TimerHandle {
        let tx = self.internal_tx.clone();
        self.timer.schedule(
            delay,
            Box::new(move || {
                let _ = tx.send(event);
            }),
        )
    }

    fn clear_timeouts(&mut self) {
        if let Some(timer) = self.connect_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = self.uptime_timer.take() {
            timer.cancel();
        }
    }

    /// Start a new attempt after the backoff delay.
    fn connect(&mut self) {
        if self.connect_lock || !self.should_reconnect {
            return;
        }
        self.connect_lock = true;

        if let Some(max_retries) = self.config.max_retries {
            if self.retry_count >= i64::from(max_retries) {
                diag!(self, max_retries, "Max retries reached");
                self.connect_lock = false;
                return;
            }
        }

        self.set_retry_count(self.retry_count + 1);
        self.generation += 1;

        let delay = self.config.reconnect_delay(self.retry_count);
        diag!(
            self,
            retry_count = self.retry_count,
            delay_ms = delay.as_millis() as u64,
            "Scheduling connection attempt"
        );

        let generation = self.generation;
        self.backoff_timer = Some(self.schedule(delay, Internal::BackoffElapsed { generation }));
    }

    async fn resolve_url(&mut self, generation: u64) {
        match &self.url {
            UrlProvider::Static(url) => {
                let url = url.clone();
                self.open(url, generation).await;
            }
            UrlProvider::Deferred(provider) => {
                let resolving = provider();
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let url = resolving.await;
                    let _ = tx.send(Internal::UrlResolved { generation, url });
                });
            }
        }
    }

    async fn open(&mut self, url: String, generation: u64) {
        if self.close_requested {
            diag!(self, "Closed while waiting, abandoning attempt");
            self.connect_lock = false;
            return;
        }

        if let Err(e) = check_scheme(&url) {
            self.connect_lock = false;
            self.handle_error(ErrorEvent::new(e.to_string())).await;
            return;
        }

        diag!(self, url = %url, generation, "Opening connection");
        *self.status.url.lock().unwrap_or_else(|e| e.into_inner()) = url.clone();
        self.status.set_ready_state(ReadyState::Connecting);

        let transport = self.transport.clone();
        let protocols = self.protocols.clone();
        let tx = self.internal_tx.clone();
        let task = tokio::spawn(async move {
            let event = match transport.open(&url, &protocols).await {
                Ok((sink, stream)) => Internal::Opened {
                    generation,
                    sink,
                    stream,
                },
                Err(error) => Internal::OpenFailed { generation, error },
            };
            let _ = tx.send(event);
        });

        self.link = Link::Opening(task);
        self.connect_lock = false;
        self.connect_timer = Some(self.schedule(
            self.config.connection_timeout(),
            Internal::ConnectTimeout { generation },
        ));
    }

    async fn handle_open(
        &mut self,
        sink: Box<dyn TransportSink>,
        stream: Box<dyn TransportStream>,
        generation: u64,
    ) {
        diag!(self, generation, "Connection open");
        if let Some(timer) = self.connect_timer.take() {
            timer.cancel();
        }
        self.uptime_timer =
            Some(self.schedule(self.config.min_uptime(), Internal::UptimeReached { generation }));

        let reader = tokio::spawn(pump(stream, generation, self.internal_tx.clone()));
        self.link = Link::Open { sink, reader };
        self.status.set_ready_state(ReadyState::Open);

        let mut pending = self.queue.drain().into_iter();
        while let Some(payload) = pending.next() {
            let Link::Open { sink, .. } = &mut self.link else {
                break;
            };
            if let Err(e) = sink.send(&payload).await {
                let mut unsent = vec![payload];
                unsent.extend(pending);
                self.queue.requeue_front(unsent);
                self.update_buffered_amount();
                self.handle_error(ErrorEvent::new(e.to_string())).await;
                return;
            }
        }
        self.update_buffered_amount();

        self.listeners.emit(&Event::Open);
    }

    async fn send(&mut self, payload: Payload) {
        if let Link::Open { sink, .. } = &mut self.link {
            diag!(self, size = payload.size(), "Sending");
            if let Err(e) = sink.send(&payload).await {
                self.queue.requeue_front(vec![payload]);
                self.update_buffered_amount();
                self.handle_error(ErrorEvent::new(e.to_string())).await;
            }
            return;
        }

        if self.queue.enqueue(payload) {
            diag!(self, queued = self.queue.len(), "Queued until connected");
        } else {
            diag!(self, "Queue full, dropping message");
        }
        self.update_buffered_amount();
    }

    async fn close(&mut self, code: u16, reason: &str) {
        self.close_requested = true;
        self.should_reconnect = false;
        self.clear_timeouts();

        if let Some(timer) = self.backoff_timer.take() {
            diag!(self, "Cancelling pending attempt");
            timer.cancel();
            self.connect_lock = false;
        }

        if matches!(self.link, Link::Idle) {
            diag!(self, "Close requested with no connection");
            self.status.set_ready_state(ReadyState::Closed);
            return;
        }

        self.disconnect(code, reason).await;
    }

    async fn reconnect(&mut self, code: u16, reason: &str) {
        self.should_reconnect = true;
        self.close_requested = false;
        self.set_retry_count(-1);

        self.disconnect(code, reason).await;
        self.connect();
    }

    /// Tear down the current link and report it closed.
    async fn disconnect(&mut self, code: u16, reason: &str) {
        self.clear_timeouts();

        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Idle => return,
            Link::Opening(task) => task.abort(),
            Link::Open { mut sink, reader } => {
                reader.abort();
                self.status.set_ready_state(ReadyState::Closing);
                if let Err(e) = sink.close(code, reason).await {
                    diag!(self, error = %e, "Error while closing");
                }
            }
        }

        self.status.set_ready_state(ReadyState::Closed);
        self.handle_close(CloseEvent {
            code,
            reason: reason.to_string(),
            was_clean: true,
        });
    }

    fn handle_close(&mut self, event: CloseEvent) {
        diag!(self, code = event.code, reason = %event.reason, "Connection closed");
        self.clear_timeouts();

        if self.should_reconnect {
            self.connect();
        }

        self.listeners.emit(&Event::Close(event));
    }

    async fn handle_error(&mut self, event: ErrorEvent) {
        diag!(self, message = %event.message, "Connection error");

        let reason = if event.is_timeout() { "timeout" } else { "" };
        self.disconnect(NORMAL_CLOSURE, reason).await;

        self.listeners.emit(&Event::Error(event));
        self.connect();
    }

    async fn shutdown(&mut self) {
        diag!(self, "All handles dropped, shutting down");
        self.close(NORMAL_CLOSURE, "").await;
    }
}

/// Forward everything read from `stream` to the driver.
async fn pump(
    mut stream: Box<dyn TransportStream>,
    generation: u64,
    tx: mpsc::UnboundedSender<Internal>,
) {
    loop {
        let event = match stream.recv().await {
            Ok(Incoming::Message(payload)) => Internal::Received {
                generation,
                payload,
            },
            Ok(Incoming::Closed { code, reason }) => {
                let _ = tx.send(Internal::RemoteClosed {
                    generation,
                    code,
                    reason,
                });
                break;
            }
            Err(error) => {
                let _ = tx.send(Internal::StreamFailed { generation, error });
                break;
            }
        };

        if tx.send(event).is_err() {
            break;
        }
    }
}
