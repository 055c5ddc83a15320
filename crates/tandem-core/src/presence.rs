//! Presence tracking for a document.
//!
//! Presence records which users currently have a document open, who they
//! are, and where their cursor is. It is ephemeral: nothing here is part of
//! the persisted document content.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tandem_protocol::{Cursor, DocumentPresence, PropertyBag, User, UserId, UserPresence};
use tracing::debug;

use crate::merge::merge_properties;

/// Presence tracker for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Presence {
    /// Map of user ID to presence entry.
    members: HashMap<UserId, UserPresence>,
}

impl Presence {
    /// Create a new presence tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of present users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Check if a user is present.
    #[must_use]
    pub fn is_present(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    /// Get the presence entry for a user.
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&UserPresence> {
        self.members.get(user_id)
    }

    /// Insert or replace a user's presence entry.
    ///
    /// Returns `true` if this is a new member, `false` if replacing.
    pub fn join(&mut self, user_id: impl Into<UserId>, presence: UserPresence) -> bool {
        let user_id = user_id.into();
        let is_new = self.members.insert(user_id.clone(), presence).is_none();

        if is_new {
            debug!(user = %user_id, "Presence: user joined");
        }

        is_new
    }

    /// Remove a user.
    ///
    /// Returns the removed presence entry, if any.
    pub fn leave(&mut self, user_id: &str) -> Option<UserPresence> {
        let presence = self.members.remove(user_id);
        if presence.is_some() {
            debug!(user = %user_id, "Presence: user left");
        }
        presence
    }

    /// Move a present user's cursor.
    ///
    /// Returns `true` if the user exists and was updated. Cursor updates for
    /// users without an entry are dropped.
    pub fn set_cursor(&mut self, user_id: &str, cursor: Cursor) -> bool {
        if let Some(presence) = self.members.get_mut(user_id) {
            presence.cursor = Some(cursor);
            true
        } else {
            false
        }
    }

    /// Merge properties into a user's property bag.
    ///
    /// A user without an entry gets an empty one first, carrying only the
    /// user ID.
    pub fn merge_user_properties(&mut self, user_id: &str, properties: PropertyBag) {
        let presence = self
            .members
            .entry(user_id.to_string())
            .or_insert_with(|| UserPresence::new(User::new(user_id, "")));
        merge_properties(&mut presence.user.properties, properties);
    }

    /// Get all presence entries.
    #[must_use]
    pub fn members(&self) -> Vec<&UserPresence> {
        self.members.values().collect()
    }

    /// Get all user IDs.
    #[must_use]
    pub fn user_ids(&self) -> Vec<&str> {
        self.members.keys().map(|s| s.as_str()).collect()
    }

    /// Get the presence map as a serializable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> DocumentPresence {
        self.members.clone()
    }

    /// Check if presence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl From<DocumentPresence> for Presence {
    fn from(members: DocumentPresence) -> Self {
        Self { members }
    }
}
