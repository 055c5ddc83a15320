//! Session wiring against an in-memory transport.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tandem_client::{Callbacks, Session, SessionOptions, WireFormat};
use tandem_core::{MemoryStorage, Storage, Store};
use tandem_protocol::{codec, Action, Cursor, Document, Node};
use tandem_transport::{
    Incoming, Payload, ReconnectConfig, Transport, TransportError, TransportSink,
    TransportStream, ABNORMAL_CLOSURE,
};
use tokio::sync::mpsc;

/// Accepts every connection; the test plays the server side.
#[derive(Default)]
struct LoopbackTransport {
    sent: Arc<Mutex<Vec<Payload>>>,
    remotes: Mutex<Vec<mpsc::UnboundedSender<Incoming>>>,
}

impl LoopbackTransport {
    fn deliver(&self, incoming: Incoming) {
        let remotes = self.remotes.lock().unwrap();
        remotes.last().unwrap().send(incoming).unwrap();
    }

    fn drop_connection(&self) {
        self.remotes.lock().unwrap().clear();
    }

    fn connections(&self) -> usize {
        self.remotes.lock().unwrap().len()
    }

    fn sent(&self) -> Vec<Payload> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(
        &self,
        _url: &str,
        _protocols: &[String],
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.remotes.lock().unwrap().push(tx);
        Ok((
            Box::new(LoopbackSink {
                sent: self.sent.clone(),
            }),
            Box::new(LoopbackStream { rx }),
        ))
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

struct LoopbackSink {
    sent: Arc<Mutex<Vec<Payload>>>,
}

#[async_trait]
impl TransportSink for LoopbackSink {
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn close(&mut self, _code: u16, _reason: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

struct LoopbackStream {
    rx: mpsc::UnboundedReceiver<Incoming>,
}

#[async_trait]
impl TransportStream for LoopbackStream {
    async fn recv(&mut self) -> Result<Incoming, TransportError> {
        Ok(self.rx.recv().await.unwrap_or(Incoming::Closed {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        }))
    }
}

fn options() -> SessionOptions {
    SessionOptions::new("ws://loopback.test/ws/d1/token", "d1", "u1").with_reconnect(
        ReconnectConfig::default()
            .with_min_reconnection_delay(Duration::from_millis(1000))
            .with_min_uptime(Duration::from_millis(5000)),
    )
}

fn start(options: SessionOptions, store: Store) -> (Session, Arc<LoopbackTransport>) {
    let transport = Arc::new(LoopbackTransport::default());
    let session = Session::with_transport(options, store, transport.clone()).unwrap();
    (session, transport)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_connection_status_follows_socket() {
    let (session, transport) = start(options(), Store::new());
    assert!(!session.state().connected);

    settle().await;
    assert!(session.state().connected);

    transport.drop_connection();
    settle().await;
    assert!(!session.state().connected);

    // Back after the first backoff step.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(transport.connections(), 1);
    assert!(session.state().connected);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_json_and_msgpack() {
    let (session, transport) = start(options(), Store::new());
    settle().await;

    transport.deliver(Incoming::Message(Payload::from(
        json!({"type": "setDocument", "document": {"id": "d1", "name": "Plan"}}).to_string(),
    )));
    let node = Action::set_node(Node::new("n1", "d1").with_name("Frame"));
    transport.deliver(Incoming::Message(Payload::Binary(
        codec::encode_binary(&node).unwrap(),
    )));
    settle().await;

    let state = session.state();
    assert_eq!(state.document("d1").unwrap().name, "Plan");
    assert_eq!(state.node("n1").unwrap().name, "Frame");
}

#[tokio::test(start_paused = true)]
async fn test_bad_message_keeps_session_alive() {
    let (session, transport) = start(options(), Store::new());
    settle().await;

    transport.deliver(Incoming::Message(Payload::from("not json")));
    transport.deliver(Incoming::Message(Payload::from(
        json!({"type": "setNode", "node": {"id": "n1", "document_id": "d1"}}).to_string(),
    )));
    settle().await;

    assert!(session.state().node("n1").is_some());
    assert!(session.state().connected);
}

#[tokio::test(start_paused = true)]
async fn test_hooks_see_inbound_actions_only() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let options = options().with_callbacks(Callbacks::new().on_set_node_properties(
        move |id, _| log.lock().unwrap().push(id.to_string()),
    ));
    let (session, transport) = start(options, Store::new());
    settle().await;

    let properties = json!({"color": "red"}).as_object().unwrap().clone();
    session
        .dispatcher()
        .set_node_properties("local", properties.clone())
        .unwrap();
    transport.deliver(Incoming::Message(Payload::from(
        codec::encode_text(&Action::set_node_properties("remote", properties)).unwrap(),
    )));
    settle().await;

    assert_eq!(*seen.lock().unwrap(), vec!["remote"]);
}

#[tokio::test(start_paused = true)]
async fn test_outbound_helpers_use_wire_format() {
    let (session, transport) = start(options().with_format(WireFormat::MessagePack), Store::new());

    // Queued until the connection opens, then flushed in order.
    session
        .dispatcher()
        .create_node(Node::new("n1", "d1"))
        .unwrap();
    session
        .dispatcher()
        .set_cursor(Cursor::new(3.0, 4.0))
        .unwrap();
    settle().await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    let kinds: Vec<String> = sent
        .iter()
        .map(|payload| match payload {
            Payload::Binary(data) => codec::decode_binary(data).unwrap().discriminator,
            Payload::Text(_) => panic!("expected a binary frame"),
        })
        .collect();
    assert_eq!(kinds, vec!["createNode", "setCursor"]);

    // Send-only helpers leave the local state alone.
    assert!(session.state().node("n1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_document_update_uses_server_discriminator() {
    let (session, transport) = start(options(), Store::new());
    settle().await;

    session
        .dispatcher()
        .update_document(Document::new("d1", "Renamed"))
        .unwrap();
    settle().await;

    let sent = transport.sent();
    let text = sent[0].as_text().unwrap();
    let value: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(value["type"], "updateDcoument");
    assert_eq!(value["document"]["name"], "Renamed");
}

#[tokio::test(start_paused = true)]
async fn test_state_is_persisted() {
    let storage = Arc::new(MemoryStorage::new());
    let (session, transport) = start(options(), Store::with_storage(storage.clone()));
    settle().await;

    transport.deliver(Incoming::Message(Payload::from(
        json!({"type": "setNode", "node": {"id": "n1", "document_id": "d1"}}).to_string(),
    )));
    settle().await;
    session.dispatcher().store().flush().await;
    drop(session);

    let restored = Store::with_storage(storage.clone() as Arc<dyn Storage>);
    assert!(restored.state().node("n1").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_drop_closes_socket() {
    let (session, transport) = start(options(), Store::new());
    settle().await;
    let socket = session.socket().clone();

    drop(session);
    settle().await;

    assert_eq!(socket.ready_state(), tandem_transport::ReadyState::Closed);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.connections(), 1);
}
