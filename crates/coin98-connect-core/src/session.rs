//! Session persistence.
//!
//! A connected session is remembered as `{id, chain}` under a fixed record
//! name so a later process can resume it. Stores are best-effort: the client
//! logs storage failures and carries on.

use crate::{ConnectError, ConnectionIdentity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Name the session record is stored under.
pub const SESSION_RECORD_NAME: &str = "Coin98Connection";

/// The persisted form of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: ConnectionIdentity,
    pub chain: String,
}

/// Storage for the session record.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionRecord>, ConnectError>;
    fn save(&self, record: &SessionRecord) -> Result<(), ConnectError>;
    fn clear(&self) -> Result<(), ConnectError>;
}

/// Process-lifetime store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<SessionRecord>>, ConnectError> {
        self.record
            .lock()
            .map_err(|_| ConnectError::Storage("session store lock poisoned".into()))
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<SessionRecord>, ConnectError> {
        Ok(self.slot()?.clone())
    }

    fn save(&self, record: &SessionRecord) -> Result<(), ConnectError> {
        *self.slot()? = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ConnectError> {
        *self.slot()? = None;
        Ok(())
    }
}

/// JSON file store, one file per record name.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store the record as `<dir>/Coin98Connection.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(format!("{SESSION_RECORD_NAME}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<SessionRecord>, ConnectError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConnectError::Storage(e.to_string())),
        };
        match serde_json::from_str(&text) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "ignoring unreadable session record: {}",
                    e
                );
                Ok(None)
            }
        }
    }

    fn save(&self, record: &SessionRecord) -> Result<(), ConnectError> {
        let json = serde_json::to_string(record)?;
        std::fs::write(&self.path, json).map_err(|e| ConnectError::Storage(e.to_string()))
    }

    fn clear(&self) -> Result<(), ConnectError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConnectError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SessionRecord {
        SessionRecord {
            id: ConnectionIdentity::new("abc").unwrap(),
            chain: "solana".into(),
        }
    }

    #[test]
    fn record_shape() {
        let json = serde_json::to_string(&record()).unwrap();
        assert_eq!(json, r#"{"id":"abc","chain":"solana"}"#);
    }

    #[test]
    fn memory_store() {
        let store = MemorySessionStore::new();
        assert_eq!(store.load().unwrap(), None);
        store.save(&record()).unwrap();
        assert_eq!(store.load().unwrap(), Some(record()));
        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::in_dir(dir.path());
        assert!(store.path().ends_with("Coin98Connection.json"));
        assert_eq!(store.load().unwrap(), None);

        store.save(&record()).unwrap();
        assert_eq!(FileSessionStore::in_dir(dir.path()).load().unwrap(), Some(record()));

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn file_store_ignores_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::in_dir(dir.path());
        std::fs::write(store.path(), "not json").unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
