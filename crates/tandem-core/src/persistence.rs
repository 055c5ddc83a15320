//! Snapshot persistence for the collaborative state.
//!
//! The whole state lives in a single named slot. It is loaded once when a
//! store is created and rewritten after every transition. A slot that cannot
//! be parsed is treated as empty.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::state::CollabState;

/// Default slot name.
pub const DEFAULT_STORAGE_KEY: &str = "zeus.multiplayer.storage";

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A single-slot key/value store.
pub trait Storage: Send + Sync {
    /// Read the slot, `None` if it has never been written.
    fn read(&self) -> Result<Option<String>, PersistenceError>;

    /// Replace the slot contents.
    fn write(&self, contents: &str) -> Result<(), PersistenceError>;

    /// Remove the slot.
    fn clear(&self) -> Result<(), PersistenceError>;
}

/// Load the persisted state, falling back to the default state.
#[must_use]
pub fn load_state(storage: &dyn Storage) -> CollabState {
    match storage.read() {
        Ok(Some(contents)) => match serde_json::from_str(&contents) {
            Ok(state) => {
                debug!("Restored persisted state");
                state
            }
            Err(e) => {
                warn!(error = %e, "Persisted state is unreadable, starting empty");
                CollabState::default()
            }
        },
        Ok(None) => CollabState::default(),
        Err(e) => {
            warn!(error = %e, "Failed to read persisted state, starting empty");
            CollabState::default()
        }
    }
}

/// Persist a state snapshot.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn save_state(storage: &dyn Storage, state: &CollabState) -> Result<(), PersistenceError> {
    let contents = serde_json::to_string(state)?;
    storage.write(&contents)
}

/// Slot backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Store the slot at an explicit path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store the slot `<key>.json` inside a directory.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>, key: &str) -> Self {
        Self::new(dir.as_ref().join(format!("{}.json", key)))
    }

    /// Get the slot path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn read(&self) -> Result<Option<String>, PersistenceError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, contents: &str) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Readers never observe a partially written slot.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory slot.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<String>>,
}

impl MemoryStorage {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot with initial contents.
    #[must_use]
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(contents.into())),
        }
    }
}

impl Storage for MemoryStorage {
    fn read(&self) -> Result<Option<String>, PersistenceError> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(slot.clone())
    }

    fn write(&self, contents: &str) -> Result<(), PersistenceError> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(contents.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
        Ok(())
    }
}
