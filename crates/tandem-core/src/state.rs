//! The collaborative state held by a session.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tandem_protocol::{Document, DocumentId, Node, NodeId, UserPresence};

use crate::presence::Presence;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Everything a session knows about the shared documents.
///
/// A value of this type is never edited while it is visible to readers:
/// the reducer consumes one value and produces the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollabState {
    /// Whether the transport is currently open.
    #[serde(default)]
    pub connected: bool,
    /// Known documents.
    #[serde(default)]
    pub documents: HashMap<DocumentId, Document>,
    /// Known nodes, across all documents.
    #[serde(default)]
    pub nodes: HashMap<NodeId, Node>,
    /// Presence per document.
    #[serde(default)]
    pub presence: HashMap<DocumentId, Presence>,
    /// When presence last changed, in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_presence_update_at: Option<u64>,
}

impl CollabState {
    /// Create an empty, disconnected state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a document.
    #[must_use]
    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    /// Get a node.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Get the child nodes of a node, in `children` order.
    ///
    /// IDs that do not resolve to a known node are skipped.
    #[must_use]
    pub fn children_of(&self, id: &str) -> Vec<&Node> {
        self.nodes
            .get(id)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|child| self.nodes.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get all nodes that belong to a document.
    #[must_use]
    pub fn nodes_in(&self, document_id: &str) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|node| node.document_id == document_id)
            .collect()
    }

    /// Get the presence tracker for a document.
    #[must_use]
    pub fn document_presence(&self, document_id: &str) -> Option<&Presence> {
        self.presence.get(document_id)
    }

    /// Get one user's presence in a document.
    #[must_use]
    pub fn user_presence(&self, document_id: &str, user_id: &str) -> Option<&UserPresence> {
        self.presence
            .get(document_id)
            .and_then(|presence| presence.get(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = CollabState::new();
        assert!(!state.connected);
        assert!(state.documents.is_empty());
        assert!(state.last_presence_update_at.is_none());
    }

    #[test]
    fn test_children_of_skips_dangling_ids() {
        let mut state = CollabState::new();
        state.nodes.insert(
            "root".into(),
            Node::new("root", "d1").with_children(["a", "missing"]),
        );
        state
            .nodes
            .insert("a".into(), Node::new("a", "d1").with_parent("root"));

        let children = state.children_of("root");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, "a");
        assert!(state.children_of("nope").is_empty());
    }

    #[test]
    fn test_state_survives_json() {
        let mut state = CollabState::new();
        state
            .documents
            .insert("d1".into(), Document::new("d1", "Plan"));
        state.last_presence_update_at = Some(42);

        let json = serde_json::to_string(&state).unwrap();
        let back: CollabState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_partial_snapshot_loads() {
        let state: CollabState = serde_json::from_str(r#"{"connected": true}"#).unwrap();
        assert!(state.connected);
        assert!(state.nodes.is_empty());
    }
}
