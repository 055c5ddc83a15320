//! The state reducer.
//!
//! [`reduce`] is a pure transition `(state, action) -> state'`. It takes the
//! previous state by value and returns the next one, so no caller can observe
//! a half-applied action and no snapshot handed out earlier is ever written
//! to.
//!
//! Actions that reference an entity which does not exist (a node that was
//! never loaded, a user with no presence entry) leave the state unchanged.
//! Unrecognized actions are logged and leave the state unchanged.

use tandem_protocol::{Action, Document, DocumentId, Node, NodeId, PropertyBag, UserId};
use tracing::{debug, trace, warn};

use crate::merge::merge_properties;
use crate::presence::Presence;
use crate::state::{now_millis, CollabState};

/// Apply an action, stamping presence changes with the current time.
#[must_use]
pub fn reduce(state: CollabState, action: Action) -> CollabState {
    reduce_at(state, action, now_millis())
}

/// Apply an action, stamping presence changes with `now` (milliseconds).
#[must_use]
pub fn reduce_at(mut state: CollabState, action: Action, now: u64) -> CollabState {
    trace!(action = %action.kind(), "Reducing action");

    match action {
        Action::SetConnectionStatus { payload } => {
            state.connected = payload;
        }

        Action::SetDocument { document, nodes } => {
            state.nodes.extend(nodes);
            state.documents.insert(document.id.clone(), document);
        }

        Action::UpdateDocument { document } => update_document(&mut state, document),

        Action::CreateNode { node } | Action::SetNode { node } => {
            state.nodes.insert(node.id.clone(), node);
        }

        Action::UpdateNode { node } => update_node(&mut state, node),

        Action::DeleteNode { node_id } => delete_node(&mut state, &node_id),

        Action::SetNodeProperties {
            node_id,
            properties,
        } => set_node_properties(&mut state, &node_id, properties),

        Action::SetDocumentPresence {
            document_id,
            presence,
        } => {
            state.presence.insert(document_id, Presence::from(presence));
            state.last_presence_update_at = Some(now);
        }

        Action::SetUserPresence {
            document_id,
            user_id,
            presence,
        } => {
            state
                .presence
                .entry(document_id)
                .or_default()
                .join(user_id, presence);
            state.last_presence_update_at = Some(now);
        }

        Action::SetUserPresenceProperties {
            document_id,
            user_id,
            properties,
        } => {
            state
                .presence
                .entry(document_id)
                .or_default()
                .merge_user_properties(&user_id, properties);
            state.last_presence_update_at = Some(now);
        }

        Action::RemoveUserPresence {
            document_id,
            user_id,
        } => remove_user_presence(&mut state, &document_id, &user_id, now),

        Action::SetCursor {
            document_id,
            user_id,
            cursor,
        } => {
            let moved = state
                .presence
                .get_mut(&document_id)
                .map(|presence| presence.set_cursor(&user_id, cursor))
                .unwrap_or(false);

            if moved {
                state.last_presence_update_at = Some(now);
            } else {
                trace!(document = %document_id, user = %user_id, "Cursor for absent user dropped");
            }
        }

        Action::Unknown => {
            warn!("Unhandled action type, state unchanged");
        }
    }

    state
}

fn update_document(state: &mut CollabState, document: Document) {
    match state.documents.get_mut(&document.id) {
        Some(existing) => {
            existing.name = document.name;
            existing.updated_at = document.updated_at;
        }
        None => debug!(document = %document.id, "UpdateDocument for unknown document ignored"),
    }
}

fn update_node(state: &mut CollabState, node: Node) {
    match state.nodes.get_mut(&node.id) {
        Some(existing) => {
            existing.name = node.name;
            existing.kind = node.kind;
            existing.parent_id = node.parent_id;
            existing.children = node.children;
        }
        None => debug!(node = %node.id, "UpdateNode for unknown node ignored"),
    }
}

fn delete_node(state: &mut CollabState, node_id: &NodeId) {
    let Some(node) = state.nodes.remove(node_id) else {
        debug!(node = %node_id, "DeleteNode for unknown node ignored");
        return;
    };

    if let Some(parent) = node
        .parent_id
        .as_ref()
        .and_then(|parent_id| state.nodes.get_mut(parent_id))
    {
        parent.children.retain(|child| child != node_id);
    }
}

fn set_node_properties(state: &mut CollabState, node_id: &NodeId, properties: PropertyBag) {
    match state.nodes.get_mut(node_id) {
        Some(node) => merge_properties(&mut node.properties, properties),
        None => debug!(node = %node_id, "SetNodeProperties for unknown node ignored"),
    }
}

fn remove_user_presence(
    state: &mut CollabState,
    document_id: &DocumentId,
    user_id: &UserId,
    now: u64,
) {
    let removed = state
        .presence
        .get_mut(document_id)
        .and_then(|presence| presence.leave(user_id))
        .is_some();

    if removed {
        state.last_presence_update_at = Some(now);
    }
}
