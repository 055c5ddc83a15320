//! Socket events and listener registration.

use std::fmt;
use std::sync::Arc;

use crate::traits::Payload;

/// Error message reported when an attempt exceeds the connection timeout.
pub const TIMEOUT_MESSAGE: &str = "TIMEOUT";

/// The four event channels a socket emits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A connection opened.
    Open,
    /// A connection closed.
    Close,
    /// A message arrived.
    Message,
    /// A connection attempt or an open connection failed.
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Open => "open",
            EventKind::Close => "close",
            EventKind::Message => "message",
            EventKind::Error => "error",
        };
        f.write_str(name)
    }
}

/// Details of a closed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Close code.
    pub code: u16,
    /// Close reason.
    pub reason: String,
    /// Whether the close handshake completed.
    pub was_clean: bool,
}

/// Details of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    /// Human-readable description.
    pub message: String,
}

impl ErrorEvent {
    /// Create an error event.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error reported for an attempt that timed out.
    #[must_use]
    pub fn timeout() -> Self {
        Self::new(TIMEOUT_MESSAGE)
    }

    /// Whether this is the timeout error.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.message == TIMEOUT_MESSAGE
    }
}

/// An event delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A connection opened.
    Open,
    /// A connection closed.
    Close(CloseEvent),
    /// A message arrived.
    Message(Payload),
    /// Something failed.
    Error(ErrorEvent),
}

impl Event {
    /// The channel this event is emitted on.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Open => EventKind::Open,
            Event::Close(_) => EventKind::Close,
            Event::Message(_) => EventKind::Message,
            Event::Error(_) => EventKind::Error,
        }
    }
}

/// An object that handles socket events.
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    fn handle_event(&self, event: &Event);
}

/// A registered listener: a plain callback or a handler object.
///
/// Listeners are compared by identity, so keep a clone of the value you
/// registered to remove it later.
#[derive(Clone)]
pub enum Listener {
    /// A callback.
    Callback(Arc<dyn Fn(&Event) + Send + Sync>),
    /// A handler object.
    Handler(Arc<dyn EventHandler>),
}

impl Listener {
    /// Wrap a callback.
    pub fn callback(f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        Listener::Callback(Arc::new(f))
    }

    /// Wrap a handler object.
    pub fn handler(handler: Arc<dyn EventHandler>) -> Self {
        Listener::Handler(handler)
    }

    /// Deliver an event.
    pub fn call(&self, event: &Event) {
        match self {
            Listener::Callback(f) => f(event),
            Listener::Handler(h) => h.handle_event(event),
        }
    }

    fn is_same(&self, other: &Listener) -> bool {
        match (self, other) {
            (Listener::Callback(a), Listener::Callback(b)) => {
                Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
            }
            (Listener::Handler(a), Listener::Handler(b)) => {
                Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Callback(_) => f.write_str("Listener::Callback"),
            Listener::Handler(_) => f.write_str("Listener::Handler"),
        }
    }
}

/// Listener lists, one per event kind, in registration order.
#[derive(Debug, Default)]
pub(crate) struct Listeners {
    open: Vec<Listener>,
    close: Vec<Listener>,
    message: Vec<Listener>,
    error: Vec<Listener>,
}

impl Listeners {
    fn list_mut(&mut self, kind: EventKind) -> &mut Vec<Listener> {
        match kind {
            EventKind::Open => &mut self.open,
            EventKind::Close => &mut self.close,
            EventKind::Message => &mut self.message,
            EventKind::Error => &mut self.error,
        }
    }

    fn list(&self, kind: EventKind) -> &[Listener] {
        match kind {
            EventKind::Open => &self.open,
            EventKind::Close => &self.close,
            EventKind::Message => &self.message,
            EventKind::Error => &self.error,
        }
    }

    pub(crate) fn add(&mut self, kind: EventKind, listener: Listener) {
        self.list_mut(kind).push(listener);
    }

    /// Remove every registration of `listener` on `kind`.
    pub(crate) fn remove(&mut self, kind: EventKind, listener: &Listener) -> bool {
        let list = self.list_mut(kind);
        let before = list.len();
        list.retain(|l| !l.is_same(listener));
        list.len() != before
    }

    pub(crate) fn emit(&self, event: &Event) {
        for listener in self.list(event.kind()) {
            listener.call(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl EventHandler for Counter {
        fn handle_event(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_emit_only_matching_kind() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut listeners = Listeners::default();
        listeners.add(EventKind::Open, Listener::handler(counter.clone()));

        listeners.emit(&Event::Open);
        listeners.emit(&Event::Error(ErrorEvent::new("boom")));

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_by_identity() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let listener = Listener::callback(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let other = Listener::callback(|_| {});

        let mut listeners = Listeners::default();
        listeners.add(EventKind::Message, listener.clone());
        listeners.add(EventKind::Message, other);

        assert!(!listeners.remove(EventKind::Open, &listener));
        assert!(listeners.remove(EventKind::Message, &listener));

        listeners.emit(&Event::Message(Payload::from("x")));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(listeners.message.len(), 1);
    }

    #[test]
    fn test_timeout_error() {
        assert!(ErrorEvent::timeout().is_timeout());
        assert!(!ErrorEvent::new("refused").is_timeout());
    }
}
