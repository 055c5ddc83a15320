//! Entity types shared between the client and the collaboration server.
//!
//! Fields are snake_case on the wire. The REST side of the server answers in
//! camelCase, so the timestamp and identifier fields also accept their
//! camelCase spelling on input.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of a document.
pub type DocumentId = String;

/// Identifier of a node inside a document.
pub type NodeId = String;

/// Identifier of a user.
pub type UserId = String;

/// An open, schemaless, nested key/value structure.
///
/// Values are [`serde_json::Value`], a closed variant over
/// `Null | Bool | Number | String | Array | Object`.
pub type PropertyBag = serde_json::Map<String, serde_json::Value>;

/// Presence of every user in one document, keyed by user ID.
pub type DocumentPresence = HashMap<UserId, UserPresence>;

/// A collaborative document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document ID.
    pub id: DocumentId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Root node of the document tree, if any.
    #[serde(default, alias = "rootId", skip_serializing_if = "Option::is_none")]
    pub root_id: Option<NodeId>,
    /// Creation timestamp as sent by the server.
    #[serde(default, alias = "createdAt")]
    pub created_at: String,
    /// Last update timestamp as sent by the server.
    #[serde(default, alias = "updatedAt")]
    pub updated_at: String,
}

impl Document {
    /// Create a document with the given ID and name.
    #[must_use]
    pub fn new(id: impl Into<DocumentId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the root node.
    #[must_use]
    pub fn with_root(mut self, root_id: impl Into<NodeId>) -> Self {
        self.root_id = Some(root_id.into());
        self
    }

    /// Set the update timestamp.
    #[must_use]
    pub fn with_updated_at(mut self, updated_at: impl Into<String>) -> Self {
        self.updated_at = updated_at.into();
        self
    }
}

/// A node in a document tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node ID.
    pub id: NodeId,
    /// Owning document.
    #[serde(default, alias = "documentId")]
    pub document_id: DocumentId,
    /// Parent node, `None` for a root.
    #[serde(default, alias = "parentId")]
    pub parent_id: Option<NodeId>,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Application-defined node type.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Free-form properties.
    #[serde(default)]
    pub properties: PropertyBag,
    /// Ordered child node IDs.
    #[serde(default)]
    pub children: Vec<NodeId>,
    /// Creation timestamp as sent by the server.
    #[serde(default, alias = "createdAt")]
    pub created_at: String,
    /// Last update timestamp as sent by the server.
    #[serde(default, alias = "updatedAt")]
    pub updated_at: String,
}

impl Node {
    /// Create a node belonging to a document.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, document_id: impl Into<DocumentId>) -> Self {
        Self {
            id: id.into(),
            document_id: document_id.into(),
            ..Default::default()
        }
    }

    /// Set the parent node.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<NodeId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the node type.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Set the properties.
    #[must_use]
    pub fn with_properties(mut self, properties: PropertyBag) -> Self {
        self.properties = properties;
        self
    }

    /// Set the children.
    #[must_use]
    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }
}

/// A user as seen by other participants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User ID.
    #[serde(default)]
    pub id: UserId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// First name.
    #[serde(default, alias = "firstName")]
    pub first_name: String,
    /// Last name.
    #[serde(default, alias = "lastName")]
    pub last_name: String,
    /// Email address.
    #[serde(default)]
    pub email: String,
    /// Free-form properties (status, color, selection, ...).
    #[serde(default)]
    pub properties: PropertyBag,
}

impl User {
    /// Create a user with the given ID and display name.
    #[must_use]
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Pointer position of a user inside a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// Horizontal position.
    #[serde(default)]
    pub x: f64,
    /// Vertical position.
    #[serde(default)]
    pub y: f64,
    /// Any additional fields the application attaches to the cursor.
    #[serde(flatten)]
    pub extra: PropertyBag,
}

impl Cursor {
    /// Create a cursor at the given position.
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            extra: PropertyBag::new(),
        }
    }
}

/// Presence of one user in one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPresence {
    /// The user.
    #[serde(default)]
    pub user: User,
    /// Live cursor, if the user has reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

impl UserPresence {
    /// Create a presence entry for a user.
    #[must_use]
    pub fn new(user: User) -> Self {
        Self { user, cursor: None }
    }

    /// Set the cursor.
    #[must_use]
    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_type_field_is_renamed() {
        let node = Node::new("n1", "d1").with_kind("frame");
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], "frame");
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn test_node_accepts_partial_and_camel_case_input() {
        let node: Node = serde_json::from_value(json!({
            "id": "n1",
            "documentId": "d1",
            "parentId": "root",
            "createdAt": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(node.document_id, "d1");
        assert_eq!(node.parent_id.as_deref(), Some("root"));
        assert_eq!(node.created_at, "2024-01-01T00:00:00Z");
        assert!(node.children.is_empty());
        assert!(node.properties.is_empty());
    }

    #[test]
    fn test_cursor_keeps_extra_fields() {
        let cursor: Cursor =
            serde_json::from_value(json!({"x": 1.5, "y": 2.0, "node_id": "n7"})).unwrap();
        assert_eq!(cursor.x, 1.5);
        assert_eq!(cursor.extra["node_id"], "n7");

        let back = serde_json::to_value(&cursor).unwrap();
        assert_eq!(back["node_id"], "n7");
    }

    #[test]
    fn test_user_presence_without_cursor() {
        let presence = UserPresence::new(User::new("u1", "Ada"));
        let value = serde_json::to_value(&presence).unwrap();
        assert!(value.get("cursor").is_none());
        assert_eq!(value["user"]["name"], "Ada");
    }
}
