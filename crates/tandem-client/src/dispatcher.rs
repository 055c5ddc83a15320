//! Action dispatcher.
//!
//! Turns inbound payloads into actions applied to the [`Store`], and turns
//! outbound intents into well-formed actions sent over the socket.
//!
//! Text payloads carry JSON, binary payloads carry MessagePack. Inbound
//! payloads are accepted in either form regardless of the outbound format.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tandem_core::{CollabState, Store};
use tandem_protocol::{
    codec, Action, Cursor, Document, DocumentId, Node, NodeId, PropertyBag, ProtocolError, UserId,
};
use tandem_transport::{Payload, ReadyState, ReconnectingSocket};
use tracing::{debug, warn};

use crate::metrics;

/// Encoding used for outbound payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// JSON text frames.
    #[default]
    Json,
    /// MessagePack binary frames.
    #[serde(rename = "msgpack")]
    MessagePack,
}

type DocumentHook = Arc<dyn Fn(&Document) + Send + Sync>;
type NodeHook = Arc<dyn Fn(&Node) + Send + Sync>;
type NodeIdHook = Arc<dyn Fn(&str) + Send + Sync>;
type PropertiesHook = Arc<dyn Fn(&str, &PropertyBag) + Send + Sync>;

/// Hooks fired after an inbound action has been applied.
#[derive(Clone, Default)]
pub struct Callbacks {
    on_document_loaded: Option<DocumentHook>,
    on_set_node: Option<NodeHook>,
    on_delete_node: Option<NodeIdHook>,
    on_set_node_properties: Option<PropertiesHook>,
}

impl Callbacks {
    /// Create an empty set of hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the document of every inbound `setDocument`.
    #[must_use]
    pub fn on_document_loaded(mut self, f: impl Fn(&Document) + Send + Sync + 'static) -> Self {
        self.on_document_loaded = Some(Arc::new(f));
        self
    }

    /// Called with the node of every inbound `setNode`.
    #[must_use]
    pub fn on_set_node(mut self, f: impl Fn(&Node) + Send + Sync + 'static) -> Self {
        self.on_set_node = Some(Arc::new(f));
        self
    }

    /// Called with the node ID of every inbound `deleteNode`.
    #[must_use]
    pub fn on_delete_node(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_delete_node = Some(Arc::new(f));
        self
    }

    /// Called with the node ID and partial properties of every inbound
    /// `setNodeProperties`.
    #[must_use]
    pub fn on_set_node_properties(
        mut self,
        f: impl Fn(&str, &PropertyBag) + Send + Sync + 'static,
    ) -> Self {
        self.on_set_node_properties = Some(Arc::new(f));
        self
    }

    fn wants(&self, action: &Action) -> bool {
        match action {
            Action::SetDocument { .. } => self.on_document_loaded.is_some(),
            Action::SetNode { .. } => self.on_set_node.is_some(),
            Action::DeleteNode { .. } => self.on_delete_node.is_some(),
            Action::SetNodeProperties { .. } => self.on_set_node_properties.is_some(),
            _ => false,
        }
    }

    fn fire(&self, action: &Action) {
        match action {
            Action::SetDocument { document, .. } => {
                if let Some(f) = &self.on_document_loaded {
                    f(document);
                }
            }
            Action::SetNode { node } => {
                if let Some(f) = &self.on_set_node {
                    f(node);
                }
            }
            Action::DeleteNode { node_id } => {
                if let Some(f) = &self.on_delete_node {
                    f(node_id);
                }
            }
            Action::SetNodeProperties {
                node_id,
                properties,
            } => {
                if let Some(f) = &self.on_set_node_properties {
                    f(node_id, properties);
                }
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_document_loaded", &self.on_document_loaded.is_some())
            .field("on_set_node", &self.on_set_node.is_some())
            .field("on_delete_node", &self.on_delete_node.is_some())
            .field("on_set_node_properties", &self.on_set_node_properties.is_some())
            .finish()
    }
}

/// Bridges a socket and a store for one document and user.
pub struct Dispatcher {
    store: Arc<Store>,
    socket: ReconnectingSocket,
    callbacks: Callbacks,
    format: WireFormat,
    document_id: DocumentId,
    user_id: UserId,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        socket: ReconnectingSocket,
        document_id: impl Into<DocumentId>,
        user_id: impl Into<UserId>,
    ) -> Self {
        Self {
            store,
            socket,
            callbacks: Callbacks::default(),
            format: WireFormat::default(),
            document_id: document_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Set the inbound hooks.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Set the outbound encoding.
    #[must_use]
    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    /// Get the store.
    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Get the socket.
    #[must_use]
    pub fn socket(&self) -> &ReconnectingSocket {
        &self.socket
    }

    /// Get the document this dispatcher acts on.
    #[must_use]
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Get the local user.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Apply an action locally.
    pub fn dispatch(&self, action: Action) -> Arc<CollabState> {
        metrics::record_action(action.kind().as_str());
        self.store.dispatch(action)
    }

    /// Decode an inbound payload, apply it and fire the matching hook.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid action envelope; the
    /// state is left untouched in that case.
    pub fn handle_payload(&self, payload: &Payload) -> Result<(), ProtocolError> {
        metrics::record_message(payload.size(), "received");

        let decoded = match payload {
            Payload::Text(text) => codec::decode_text(text),
            Payload::Binary(data) => codec::decode_binary(data),
        };

        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable message");
                metrics::record_error("decode");
                return Err(e);
            }
        };

        if matches!(decoded.action, Action::Unknown) {
            debug!(discriminator = %decoded.discriminator, "Received unrecognized action");
        } else {
            debug!(action = %decoded.action.kind(), "Received action");
        }

        let action = decoded.action;
        let notify = self.callbacks.wants(&action).then(|| action.clone());
        self.dispatch(action);

        if let Some(action) = notify {
            self.callbacks.fire(&action);
        }
        Ok(())
    }

    /// Encode an action and hand it to the socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be encoded.
    pub fn send_action(&self, action: &Action) -> Result<(), ProtocolError> {
        let payload = match self.format {
            WireFormat::Json => Payload::Text(codec::encode_text(action)?),
            WireFormat::MessagePack => Payload::Binary(codec::encode_binary(action)?),
        };

        let outcome = if self.socket.ready_state() == ReadyState::Open {
            "sent"
        } else {
            "queued"
        };
        metrics::record_message(payload.size(), outcome);
        debug!(action = %action.kind(), outcome, "Sending action");

        self.socket.send(payload);
        Ok(())
    }

    /// Send a document update.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be encoded.
    pub fn update_document(&self, document: Document) -> Result<(), ProtocolError> {
        self.send_action(&Action::update_document(document))
    }

    /// Send a node creation.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be encoded.
    pub fn create_node(&self, node: Node) -> Result<(), ProtocolError> {
        self.send_action(&Action::create_node(node))
    }

    /// Send a node update.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be encoded.
    pub fn update_node(&self, node: Node) -> Result<(), ProtocolError> {
        self.send_action(&Action::update_node(node))
    }

    /// Send a node deletion.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be encoded.
    pub fn delete_node(&self, node_id: impl Into<NodeId>) -> Result<(), ProtocolError> {
        self.send_action(&Action::delete_node(node_id))
    }

    /// Send the local user's cursor position.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be encoded.
    pub fn set_cursor(&self, cursor: Cursor) -> Result<(), ProtocolError> {
        self.send_action(&Action::set_cursor(
            self.document_id.clone(),
            self.user_id.clone(),
            cursor,
        ))
    }

    /// Merge node properties locally, then send them.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be encoded. The local state is
    /// updated regardless.
    pub fn set_node_properties(
        &self,
        node_id: impl Into<NodeId>,
        properties: PropertyBag,
    ) -> Result<(), ProtocolError> {
        let action = Action::set_node_properties(node_id, properties);
        self.dispatch(action.clone());
        self.send_action(&action)
    }

    /// Merge the local user's presence properties locally, then send them.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be encoded. The local state is
    /// updated regardless.
    pub fn set_user_presence_properties(
        &self,
        properties: PropertyBag,
    ) -> Result<(), ProtocolError> {
        let action = Action::set_user_presence_properties(
            self.document_id.clone(),
            self.user_id.clone(),
            properties,
        );
        self.dispatch(action.clone());
        self.send_action(&action)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("document_id", &self.document_id)
            .field("user_id", &self.user_id)
            .field("format", &self.format)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tandem_transport::ReconnectConfig;

    fn dispatcher() -> Dispatcher {
        let config = ReconnectConfig::default().with_start_closed(true);
        let socket = ReconnectingSocket::connect("ws://localhost:1/ws/d1/t", vec![], config).unwrap();
        Dispatcher::new(Arc::new(Store::new()), socket, "d1", "u1")
    }

    fn props(value: serde_json::Value) -> PropertyBag {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_text_payload_is_applied() {
        let dispatcher = dispatcher();
        let payload = Payload::from(
            json!({"type": "setDocument", "document": {"id": "d1", "name": "Plan"}}).to_string(),
        );

        dispatcher.handle_payload(&payload).unwrap();

        let state = dispatcher.store().state();
        assert_eq!(state.document("d1").unwrap().name, "Plan");
    }

    #[tokio::test]
    async fn test_binary_payload_is_applied() {
        let dispatcher = dispatcher();
        let action = Action::create_node(Node::new("n1", "d1"));
        let payload = Payload::Binary(codec::encode_binary(&action).unwrap());

        dispatcher.handle_payload(&payload).unwrap();

        assert!(dispatcher.store().state().node("n1").is_some());
    }

    #[tokio::test]
    async fn test_malformed_payload_leaves_state() {
        let dispatcher = dispatcher();
        let before = dispatcher.store().state();

        assert!(dispatcher.handle_payload(&Payload::from("{oops")).is_err());
        assert!(dispatcher
            .handle_payload(&Payload::from(r#"{"node_id": "n1"}"#))
            .is_err());

        assert_eq!(*dispatcher.store().state(), *before);
    }

    #[tokio::test]
    async fn test_unknown_action_is_tolerated() {
        let dispatcher = dispatcher();
        let before = dispatcher.store().state();

        dispatcher
            .handle_payload(&Payload::from(r#"{"type": "shuffleEverything"}"#))
            .unwrap();

        assert_eq!(*dispatcher.store().state(), *before);
    }

    #[tokio::test]
    async fn test_hooks_fire_after_dispatch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (seen.clone(), seen.clone(), seen.clone());
        let callbacks = Callbacks::new()
            .on_set_node(move |node| a.lock().unwrap().push(format!("set:{}", node.id)))
            .on_set_node_properties(move |id, props| {
                b.lock().unwrap().push(format!("props:{}:{}", id, props.len()))
            })
            .on_delete_node(move |id| c.lock().unwrap().push(format!("delete:{}", id)));
        let dispatcher = dispatcher().with_callbacks(callbacks);

        for message in [
            json!({"type": "setNode", "node": {"id": "n1", "document_id": "d1"}}),
            json!({"type": "setNodeProperties", "node_id": "n1", "properties": {"color": "red"}}),
            json!({"type": "deleteNode", "node_id": "n1"}),
        ] {
            dispatcher
                .handle_payload(&Payload::from(message.to_string()))
                .unwrap();
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["set:n1", "props:n1:1", "delete:n1"]
        );
        assert!(dispatcher.store().state().node("n1").is_none());
    }

    #[tokio::test]
    async fn test_local_helpers_apply_immediately() {
        let dispatcher = dispatcher();
        dispatcher.dispatch(Action::create_node(Node::new("n1", "d1")));

        dispatcher
            .set_node_properties("n1", props(json!({"style": {"color": "red"}})))
            .unwrap();
        dispatcher
            .set_user_presence_properties(props(json!({"status": "busy"})))
            .unwrap();

        let state = dispatcher.store().state();
        assert_eq!(
            state.node("n1").unwrap().properties["style"]["color"],
            json!("red")
        );
        let presence = state.user_presence("d1", "u1").unwrap();
        assert_eq!(presence.user.id, "u1");
        assert_eq!(presence.user.properties["status"], json!("busy"));
    }

    #[tokio::test]
    async fn test_send_only_helpers_leave_state() {
        let dispatcher = dispatcher();

        dispatcher.create_node(Node::new("n1", "d1")).unwrap();
        dispatcher.delete_node("n2").unwrap();
        dispatcher.set_cursor(Cursor::new(1.0, 2.0)).unwrap();

        assert!(dispatcher.store().state().nodes.is_empty());

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(dispatcher.socket().buffered_amount() > 0);
    }

    #[test]
    fn test_wire_format_names() {
        let format: WireFormat = serde_json::from_str(r#""msgpack""#).unwrap();
        assert_eq!(format, WireFormat::MessagePack);
        assert_eq!(serde_json::to_string(&WireFormat::Json).unwrap(), r#""json""#);
    }
}
