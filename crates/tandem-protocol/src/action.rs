//! Actions exchanged over a multiplayer session.
//!
//! Every message on the wire is an [`Action`]: a record with a `type`
//! discriminator and kind-specific fields. The same values are fed to the
//! state reducer, whether they arrived from the server or were produced
//! locally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::types::{
    Cursor, Document, DocumentId, DocumentPresence, Node, NodeId, PropertyBag, UserId,
    UserPresence,
};

/// Action kind identifiers, as they appear in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    SetConnectionStatus,
    SetDocument,
    UpdateDocument,
    CreateNode,
    SetNode,
    UpdateNode,
    DeleteNode,
    SetNodeProperties,
    SetDocumentPresence,
    SetUserPresence,
    SetUserPresenceProperties,
    RemoveUserPresence,
    SetCursor,
    Unknown,
}

impl ActionKind {
    /// The wire discriminator for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SetConnectionStatus => "setConnectionStatus",
            ActionKind::SetDocument => "setDocument",
            ActionKind::UpdateDocument => "updateDcoument",
            ActionKind::CreateNode => "createNode",
            ActionKind::SetNode => "setNode",
            ActionKind::UpdateNode => "updateNode",
            ActionKind::DeleteNode => "deleteNode",
            ActionKind::SetNodeProperties => "setNodeProperties",
            ActionKind::SetDocumentPresence => "setDocumentPresence",
            ActionKind::SetUserPresence => "setUserPresence",
            ActionKind::SetUserPresenceProperties => "setUserPresenceProperties",
            ActionKind::RemoveUserPresence => "removeUserPresence",
            ActionKind::SetCursor => "setCursor",
            ActionKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state transition request.
///
/// Discriminators the client does not know decode to [`Action::Unknown`]
/// instead of failing, so a newer server cannot break an older client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    /// Connection status changed.
    #[serde(rename = "setConnectionStatus")]
    SetConnectionStatus {
        /// Whether the transport is open.
        payload: bool,
    },

    /// A document was loaded, optionally with its initial nodes.
    #[serde(rename = "setDocument")]
    SetDocument {
        /// The document.
        document: Document,
        /// Initial node set, keyed by node ID.
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        nodes: HashMap<NodeId, Node>,
    },

    /// Document name or timestamp changed.
    ///
    /// The collaboration server spells this discriminator `updateDcoument`;
    /// the corrected spelling is accepted on input.
    #[serde(rename = "updateDcoument", alias = "updateDocument")]
    UpdateDocument {
        /// The document carrying the new field values.
        document: Document,
    },

    /// A node was created.
    #[serde(rename = "createNode")]
    CreateNode {
        /// The node.
        node: Node,
    },

    /// A node was replaced.
    #[serde(rename = "setNode")]
    SetNode {
        /// The node.
        node: Node,
    },

    /// Node name, type, parent or children changed.
    #[serde(rename = "updateNode")]
    UpdateNode {
        /// The node carrying the new field values.
        node: Node,
    },

    /// A node was deleted.
    #[serde(rename = "deleteNode")]
    DeleteNode {
        /// The deleted node.
        node_id: NodeId,
    },

    /// Partial property update for a node.
    #[serde(rename = "setNodeProperties")]
    SetNodeProperties {
        /// Target node.
        node_id: NodeId,
        /// Properties to merge.
        properties: PropertyBag,
    },

    /// Full presence snapshot for a document.
    #[serde(rename = "setDocumentPresence")]
    SetDocumentPresence {
        /// Target document.
        document_id: DocumentId,
        /// Presence of every user in the document.
        presence: DocumentPresence,
    },

    /// One user's presence in a document.
    #[serde(rename = "setUserPresence")]
    SetUserPresence {
        /// Target document.
        document_id: DocumentId,
        /// Target user.
        user_id: UserId,
        /// The presence entry.
        presence: UserPresence,
    },

    /// Partial property update for one user's presence.
    #[serde(rename = "setUserPresenceProperties")]
    SetUserPresenceProperties {
        /// Target document.
        #[serde(default)]
        document_id: DocumentId,
        /// Target user.
        #[serde(default)]
        user_id: UserId,
        /// Properties to merge into the user's property bag.
        properties: PropertyBag,
    },

    /// A user left a document.
    #[serde(rename = "removeUserPresence")]
    RemoveUserPresence {
        /// Target document.
        document_id: DocumentId,
        /// Departing user.
        user_id: UserId,
    },

    /// A user moved their cursor.
    #[serde(rename = "setCursor")]
    SetCursor {
        /// Target document.
        document_id: DocumentId,
        /// Target user.
        user_id: UserId,
        /// New cursor position.
        cursor: Cursor,
    },

    /// Any discriminator this client does not recognize.
    #[serde(other, rename = "unknown")]
    Unknown,
}

impl Action {
    /// Get the kind of this action.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::SetConnectionStatus { .. } => ActionKind::SetConnectionStatus,
            Action::SetDocument { .. } => ActionKind::SetDocument,
            Action::UpdateDocument { .. } => ActionKind::UpdateDocument,
            Action::CreateNode { .. } => ActionKind::CreateNode,
            Action::SetNode { .. } => ActionKind::SetNode,
            Action::UpdateNode { .. } => ActionKind::UpdateNode,
            Action::DeleteNode { .. } => ActionKind::DeleteNode,
            Action::SetNodeProperties { .. } => ActionKind::SetNodeProperties,
            Action::SetDocumentPresence { .. } => ActionKind::SetDocumentPresence,
            Action::SetUserPresence { .. } => ActionKind::SetUserPresence,
            Action::SetUserPresenceProperties { .. } => ActionKind::SetUserPresenceProperties,
            Action::RemoveUserPresence { .. } => ActionKind::RemoveUserPresence,
            Action::SetCursor { .. } => ActionKind::SetCursor,
            Action::Unknown => ActionKind::Unknown,
        }
    }

    /// Create a SetConnectionStatus action.
    #[must_use]
    pub fn connection_status(connected: bool) -> Self {
        Action::SetConnectionStatus { payload: connected }
    }

    /// Create a SetDocument action without an initial node set.
    #[must_use]
    pub fn set_document(document: Document) -> Self {
        Action::SetDocument {
            document,
            nodes: HashMap::new(),
        }
    }

    /// Create an UpdateDocument action.
    #[must_use]
    pub fn update_document(document: Document) -> Self {
        Action::UpdateDocument { document }
    }

    /// Create a CreateNode action.
    #[must_use]
    pub fn create_node(node: Node) -> Self {
        Action::CreateNode { node }
    }

    /// Create a SetNode action.
    #[must_use]
    pub fn set_node(node: Node) -> Self {
        Action::SetNode { node }
    }

    /// Create an UpdateNode action.
    #[must_use]
    pub fn update_node(node: Node) -> Self {
        Action::UpdateNode { node }
    }

    /// Create a DeleteNode action.
    #[must_use]
    pub fn delete_node(node_id: impl Into<NodeId>) -> Self {
        Action::DeleteNode {
            node_id: node_id.into(),
        }
    }

    /// Create a SetNodeProperties action.
    #[must_use]
    pub fn set_node_properties(node_id: impl Into<NodeId>, properties: PropertyBag) -> Self {
        Action::SetNodeProperties {
            node_id: node_id.into(),
            properties,
        }
    }

    /// Create a SetUserPresence action.
    #[must_use]
    pub fn set_user_presence(
        document_id: impl Into<DocumentId>,
        user_id: impl Into<UserId>,
        presence: UserPresence,
    ) -> Self {
        Action::SetUserPresence {
            document_id: document_id.into(),
            user_id: user_id.into(),
            presence,
        }
    }

    /// Create a SetUserPresenceProperties action.
    #[must_use]
    pub fn set_user_presence_properties(
        document_id: impl Into<DocumentId>,
        user_id: impl Into<UserId>,
        properties: PropertyBag,
    ) -> Self {
        Action::SetUserPresenceProperties {
            document_id: document_id.into(),
            user_id: user_id.into(),
            properties,
        }
    }

    /// Create a RemoveUserPresence action.
    #[must_use]
    pub fn remove_user_presence(
        document_id: impl Into<DocumentId>,
        user_id: impl Into<UserId>,
    ) -> Self {
        Action::RemoveUserPresence {
            document_id: document_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Create a SetCursor action.
    #[must_use]
    pub fn set_cursor(
        document_id: impl Into<DocumentId>,
        user_id: impl Into<UserId>,
        cursor: Cursor,
    ) -> Self {
        Action::SetCursor {
            document_id: document_id.into(),
            user_id: user_id.into(),
            cursor,
        }
    }

    /// The document this action is scoped to, if it names one.
    #[must_use]
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Action::SetDocument { document, .. } | Action::UpdateDocument { document } => {
                Some(&document.id)
            }
            Action::CreateNode { node } | Action::SetNode { node } | Action::UpdateNode { node } => {
                Some(&node.document_id)
            }
            Action::SetDocumentPresence { document_id, .. }
            | Action::SetUserPresence { document_id, .. }
            | Action::SetUserPresenceProperties { document_id, .. }
            | Action::RemoveUserPresence { document_id, .. }
            | Action::SetCursor { document_id, .. } => Some(document_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_kind() {
        assert_eq!(Action::delete_node("n1").kind(), ActionKind::DeleteNode);
        assert_eq!(
            Action::connection_status(true).kind().as_str(),
            "setConnectionStatus"
        );
    }

    #[test]
    fn test_discriminator_on_the_wire() {
        let action = Action::set_node_properties("n1", PropertyBag::new());
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "setNodeProperties");
        assert_eq!(value["node_id"], "n1");
    }

    #[test]
    fn test_unrecognized_discriminator_decodes_to_unknown() {
        let action: Action =
            serde_json::from_value(json!({"type": "setDocumentAttrs", "attrs": {}})).unwrap();
        assert_eq!(action, Action::Unknown);
    }

    #[test]
    fn test_update_document_uses_server_spelling() {
        let action = Action::update_document(Document::new("d1", "Renamed"));
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "updateDcoument");
        assert_eq!(action.kind().as_str(), "updateDcoument");

        for discriminator in ["updateDcoument", "updateDocument"] {
            let decoded: Action = serde_json::from_value(json!({
                "type": discriminator,
                "document": {"id": "d1", "name": "Renamed"}
            }))
            .unwrap();
            assert_eq!(decoded, action);
        }
    }

    #[test]
    fn test_set_document_without_nodes() {
        let action: Action = serde_json::from_value(json!({
            "type": "setDocument",
            "document": {"id": "d1", "name": "Doc"}
        }))
        .unwrap();

        match action {
            Action::SetDocument { document, nodes } => {
                assert_eq!(document.id, "d1");
                assert!(nodes.is_empty());
            }
            other => panic!("Expected SetDocument, got {:?}", other),
        }
    }

    #[test]
    fn test_document_id_scope() {
        assert_eq!(
            Action::remove_user_presence("d1", "u1").document_id(),
            Some("d1")
        );
        assert_eq!(Action::delete_node("n1").document_id(), None);
    }
}
