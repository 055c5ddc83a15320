//! # tandem-protocol
//!
//! Wire protocol definitions for Tandem multiplayer sessions.
//!
//! This crate defines the entity types shared with the collaboration server,
//! the [`Action`] tagged union exchanged in both directions, and the codec
//! that turns actions into transport payloads.
//!
//! ## Action kinds
//!
//! - `setConnectionStatus` - Local transport status
//! - `setDocument` / `updateDcoument` - Document lifecycle (the server's
//!   spelling; `updateDocument` is accepted too)
//! - `createNode` / `setNode` / `updateNode` / `deleteNode` - Node tree
//! - `setNodeProperties` - Partial, recursively merged property updates
//! - `setDocumentPresence` / `setUserPresence` / `setUserPresenceProperties` /
//!   `removeUserPresence` / `setCursor` - Presence
//!
//! ## Example
//!
//! ```rust
//! use tandem_protocol::{codec, Action};
//!
//! let action = Action::delete_node("n1");
//!
//! let text = codec::encode_text(&action).unwrap();
//! let decoded = codec::decode_text(&text).unwrap();
//! assert_eq!(decoded.action, action);
//! ```

pub mod action;
pub mod codec;
pub mod types;

pub use action::{Action, ActionKind};
pub use codec::{decode_binary, decode_text, encode_binary, encode_text, Decoded, ProtocolError};
pub use types::{
    Cursor, Document, DocumentId, DocumentPresence, Node, NodeId, PropertyBag, User, UserId,
    UserPresence,
};
