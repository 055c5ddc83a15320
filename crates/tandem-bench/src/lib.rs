//! Fixtures shared by the Tandem benchmarks.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tandem_core::{reduce, CollabState};
use tandem_protocol::{Action, Document, Node, PropertyBag, User, UserPresence};
use tandem_transport::{
    Incoming, Payload, Transport, TransportError, TransportSink, TransportStream,
};
use tokio::sync::Notify;

/// Document ID used by every fixture.
pub const DOCUMENT_ID: &str = "bench-doc";

/// A property bag of roughly `fields` top-level entries, some nested.
#[must_use]
pub fn properties(fields: usize) -> PropertyBag {
    let mut bag = PropertyBag::new();
    for i in 0..fields {
        let value = if i % 3 == 0 {
            json!({"x": i, "y": i * 2, "style": {"color": "red", "opacity": 0.5}})
        } else {
            json!(format!("value-{}", i))
        };
        bag.insert(format!("field{}", i), value);
    }
    bag
}

/// A flat tree: one root frame with `children` leaf nodes.
#[must_use]
pub fn document_state(children: usize) -> CollabState {
    let root_id = "root".to_string();
    let child_ids: Vec<String> = (0..children).map(|i| format!("node-{}", i)).collect();

    let mut state = reduce(
        CollabState::default(),
        Action::set_document(Document::new(DOCUMENT_ID, "Bench").with_root(root_id.clone())),
    );
    state = reduce(
        state,
        Action::set_node(
            Node::new(root_id.clone(), DOCUMENT_ID)
                .with_kind("frame")
                .with_children(child_ids.iter().cloned()),
        ),
    );
    for id in child_ids {
        state = reduce(
            state,
            Action::set_node(
                Node::new(id, DOCUMENT_ID)
                    .with_parent(root_id.clone())
                    .with_properties(properties(8)),
            ),
        );
    }
    state
}

/// A representative mix of inbound actions.
#[must_use]
pub fn action_mix() -> Vec<Action> {
    vec![
        Action::set_node(Node::new("node-new", DOCUMENT_ID).with_parent("root")),
        Action::set_node_properties("node-1", properties(4)),
        Action::set_user_presence(
            DOCUMENT_ID,
            "u1",
            UserPresence::new(User::new("u1", "Ada")),
        ),
        Action::set_cursor(DOCUMENT_ID, "u1", tandem_protocol::Cursor::new(10.0, 20.0)),
        Action::delete_node("node-2"),
    ]
}

/// Transport whose sink only counts what it is given.
#[derive(Debug, Default)]
pub struct CountingTransport {
    sent: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl CountingTransport {
    /// Create a transport.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of payloads written so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Acquire)
    }

    /// Wait until at least `count` payloads have been written.
    pub async fn wait_for(&self, count: u64) {
        while self.sent() < count {
            let notified = self.notify.notified();
            if self.sent() >= count {
                break;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn open(
        &self,
        _url: &str,
        _protocols: &[String],
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), TransportError> {
        Ok((
            Box::new(CountingSink {
                sent: self.sent.clone(),
                notify: self.notify.clone(),
            }),
            Box::new(SilentStream),
        ))
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

struct CountingSink {
    sent: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

#[async_trait]
impl TransportSink for CountingSink {
    async fn send(&mut self, _payload: &Payload) -> Result<(), TransportError> {
        self.sent.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn close(&mut self, _code: u16, _reason: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

struct SilentStream;

#[async_trait]
impl TransportStream for SilentStream {
    async fn recv(&mut self) -> Result<Incoming, TransportError> {
        std::future::pending().await
    }
}
