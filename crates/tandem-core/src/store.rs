//! The state host.
//!
//! A [`Store`] owns the live [`CollabState`] of one session and is the only
//! place actions are applied. Readers get immutable snapshots; every dispatch
//! publishes a fresh one to subscribers and to the persistence slot.
//!
//! Inside a tokio runtime the slot is written by a background task on the
//! blocking pool. It always writes the newest snapshot, so a burst of
//! dispatches costs one write. Outside a runtime the write happens inline.

use std::sync::{Arc, Mutex};
use tandem_protocol::Action;
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::persistence::{load_state, save_state, Storage};
use crate::reducer::reduce;
use crate::state::CollabState;

/// Owner of a session's collaborative state.
pub struct Store {
    state: watch::Sender<Arc<CollabState>>,
    storage: Option<Arc<dyn Storage>>,
    write_lock: Arc<Mutex<()>>,
    background: bool,
}

impl Store {
    /// Create a store with an empty state and no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(CollabState::default())
    }

    /// Create a store starting from the given state.
    #[must_use]
    pub fn with_state(state: CollabState) -> Self {
        let (tx, _) = watch::channel(Arc::new(state));
        Self {
            state: tx,
            storage: None,
            write_lock: Arc::default(),
            background: false,
        }
    }

    /// Create a store that restores from, and persists to, a storage slot.
    #[must_use]
    pub fn with_storage(storage: Arc<dyn Storage>) -> Self {
        let mut store = Self::with_state(load_state(storage.as_ref()));

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(persist_changes(
                store.state.subscribe(),
                storage.clone(),
                store.write_lock.clone(),
            ));
            store.background = true;
        }

        store.storage = Some(storage);
        store
    }

    /// Get the current state snapshot.
    #[must_use]
    pub fn state(&self) -> Arc<CollabState> {
        self.state.borrow().clone()
    }

    /// Subscribe to state snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<CollabState>> {
        self.state.subscribe()
    }

    /// Apply an action and publish the resulting state.
    ///
    /// Returns the new snapshot.
    pub fn dispatch(&self, action: Action) -> Arc<CollabState> {
        let kind = action.kind();
        let mut next = None;

        self.state.send_modify(|current| {
            let reduced = Arc::new(reduce((**current).clone(), action));
            *current = Arc::clone(&reduced);
            next = Some(reduced);
        });

        let next = next.unwrap_or_else(|| self.state());
        trace!(action = %kind, "Dispatched action");

        if let Some(storage) = &self.storage {
            if !self.background {
                write_latest(storage.as_ref(), &self.write_lock, &self.state.subscribe());
            }
        }

        next
    }

    /// Write the current snapshot to the slot and wait for it.
    pub async fn flush(&self) {
        let Some(storage) = self.storage.clone() else {
            return;
        };
        let lock = self.write_lock.clone();
        let state = self.state.subscribe();

        if let Err(e) =
            tokio::task::spawn_blocking(move || write_latest(storage.as_ref(), &lock, &state)).await
        {
            warn!(error = %e, "Persistence task failed");
        }
    }

    /// Drop the persisted snapshot, if this store persists.
    pub fn clear_storage(&self) {
        if let Some(storage) = &self.storage {
            let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = storage.clear() {
                warn!(error = %e, "Failed to clear persisted state");
            }
        }
    }
}

/// Persist every published snapshot until the store is dropped.
async fn persist_changes(
    mut state: watch::Receiver<Arc<CollabState>>,
    storage: Arc<dyn Storage>,
    lock: Arc<Mutex<()>>,
) {
    while state.changed().await.is_ok() {
        state.borrow_and_update();

        let (storage, lock, latest) = (storage.clone(), lock.clone(), state.clone());
        let written =
            tokio::task::spawn_blocking(move || write_latest(storage.as_ref(), &lock, &latest));
        if let Err(e) = written.await {
            warn!(error = %e, "Persistence task failed");
            break;
        }
    }
    trace!("Store dropped, persistence stopped");
}

/// Write whatever snapshot is newest when the lock is acquired.
fn write_latest(storage: &dyn Storage, lock: &Mutex<()>, state: &watch::Receiver<Arc<CollabState>>) {
    let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
    let snapshot = state.borrow().clone();
    if let Err(e) = save_state(storage, &snapshot) {
        warn!(error = %e, "Failed to persist state");
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStorage;
    use tandem_protocol::{Document, Node};

    #[test]
    fn test_dispatch_replaces_snapshot() {
        let store = Store::new();
        let before = store.state();

        let after = store.dispatch(Action::connection_status(true));

        assert!(!before.connected);
        assert!(after.connected);
        assert!(store.state().connected);
    }

    #[test]
    fn test_subscribers_see_updates() {
        let store = Store::new();
        let mut rx = store.subscribe();

        store.dispatch(Action::set_document(Document::new("d1", "Doc")));

        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().document("d1").is_some());
    }

    #[test]
    fn test_persists_after_every_dispatch() {
        let storage = Arc::new(MemoryStorage::new());
        let store = Store::with_storage(storage.clone());

        store.dispatch(Action::create_node(Node::new("n1", "d1")));

        let restored = Store::with_storage(storage.clone());
        assert!(restored.state().node("n1").is_some());

        restored.clear_storage();
        assert!(storage.read().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_background_persistence() {
        let storage = Arc::new(MemoryStorage::new());
        let store = Store::with_storage(storage.clone());

        for i in 0..100 {
            store.dispatch(Action::create_node(Node::new(format!("n{}", i), "d1")));
        }
        store.flush().await;

        let restored = Store::with_storage(storage.clone());
        assert_eq!(restored.state().nodes.len(), 100);
    }

    #[tokio::test]
    async fn test_background_writer_catches_up() {
        let storage = Arc::new(MemoryStorage::new());
        let store = Store::with_storage(storage.clone());

        store.dispatch(Action::connection_status(true));
        for _ in 0..100 {
            if storage.read().unwrap().is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert!(load_state(storage.as_ref()).connected);
    }

    #[test]
    fn test_unreadable_slot_starts_empty() {
        let storage = Arc::new(MemoryStorage::with_contents("garbage"));
        let store = Store::with_storage(storage);
        assert_eq!(*store.state(), CollabState::default());
    }
}
