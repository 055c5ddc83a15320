//! # tandem-core
//!
//! Collaborative state, reducer and presence tracking for Tandem.
//!
//! This crate provides the model a multiplayer session keeps in sync:
//!
//! - **State** - Documents, nodes and presence known to the session
//! - **Reducer** - Pure `(state, action) -> state'` transition
//! - **Merge** - Recursive, last-writer-wins property-bag merge
//! - **Presence** - Per-document, per-user presence and cursors
//! - **Store** - Owner of the live state, with subscriptions and persistence
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Action    │────▶│    Store    │────▶│   Reducer   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                       │         │              │
//!                       ▼         ▼              ▼
//!               ┌───────────┐ ┌─────────┐ ┌─────────────┐
//!               │Subscribers│ │ Storage │ │ Merge/Pres. │
//!               └───────────┘ └─────────┘ └─────────────┘
//! ```

pub mod merge;
pub mod persistence;
pub mod presence;
pub mod reducer;
pub mod state;
pub mod store;

pub use merge::{merge_properties, merged};
pub use persistence::{FileStorage, MemoryStorage, PersistenceError, Storage, DEFAULT_STORAGE_KEY};
pub use presence::Presence;
pub use reducer::{reduce, reduce_at};
pub use state::CollabState;
pub use store::Store;
