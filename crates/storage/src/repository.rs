use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::record_store::{RecordStore, StorageKeys};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("conflict")]
    Conflict,

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

const EVENT_CAPACITY: usize = 64;

//
// ─── SESSIONS & EVENTS ─────────────────────────────────────────────────────────
//

/// Identifies one handle onto a shared store, the way a browser tab does.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEventKind {
    Set,
    Removed,
}

/// Change notification broadcast to every session sharing a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub origin: SessionId,
    pub kind: StorageEventKind,
}

//
// ─── KEY-VALUE CONTRACT ────────────────────────────────────────────────────────
//

/// String key-value store with change notification.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Unconditionally overwrite a key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be stored.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Write `value` only if the key currently holds `expected` (`None` = absent).
    ///
    /// Returns `false` without writing when the current value differs.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be accessed.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StorageError>;

    /// Receive every write made through any session of this store.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;

    /// Session that writes through this handle are attributed to.
    fn origin(&self) -> SessionId;

    /// Another handle onto the same data with its own session id.
    fn new_session(&self) -> Arc<dyn KeyValueStore>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

/// Simple in-memory store for testing and prototyping.
#[derive(Clone)]
pub struct InMemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
    events: broadcast::Sender<StorageEvent>,
    origin: SessionId,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            events,
            origin: SessionId::new(),
        }
    }

    /// Same data and event channel, fresh session id.
    #[must_use]
    pub fn session(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            events: self.events.clone(),
            origin: SessionId::new(),
        }
    }

    fn notify(&self, key: &str, kind: StorageEventKind) {
        // No subscribers is fine.
        let _ = self.events.send(StorageEvent {
            key: key.to_owned(),
            origin: self.origin,
            kind,
        });
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        {
            let mut guard = self
                .entries
                .lock()
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            guard.insert(key.to_owned(), value.to_owned());
        }
        self.notify(key, StorageEventKind::Set);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let removed = {
            let mut guard = self
                .entries
                .lock()
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            guard.remove(key).is_some()
        };
        if removed {
            self.notify(key, StorageEventKind::Removed);
        }
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StorageError> {
        {
            let mut guard = self
                .entries
                .lock()
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            if guard.get(key).map(String::as_str) != expected {
                return Ok(false);
            }
            guard.insert(key.to_owned(), value.to_owned());
        }
        self.notify(key, StorageEventKind::Set);
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    fn origin(&self) -> SessionId {
        self.origin
    }

    fn new_session(&self) -> Arc<dyn KeyValueStore> {
        Arc::new(self.session())
    }
}

//
// ─── AGGREGATE ─────────────────────────────────────────────────────────────────
//

/// Wraps the key-value backend behind a trait object for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub kv: Arc<dyn KeyValueStore>,
}

impl Storage {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    /// A second handle onto the same data, as if opened from another tab.
    #[must_use]
    pub fn new_session(&self) -> Self {
        Self::new(self.kv.new_session())
    }

    #[must_use]
    pub fn records(&self, keys: StorageKeys) -> RecordStore {
        RecordStore::new(Arc::clone(&self.kv), keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn compare_and_set_checks_current_value() {
        let store = InMemoryStore::new();

        assert!(store.compare_and_set("k", None, "v1").await.unwrap());
        assert!(!store.compare_and_set("k", None, "v2").await.unwrap());
        assert!(!store.compare_and_set("k", Some("other"), "v2").await.unwrap());
        assert!(store.compare_and_set("k", Some("v1"), "v2").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn sessions_share_data_and_events() {
        let first = InMemoryStore::new();
        let second = first.session();
        assert_ne!(first.origin(), second.origin());

        let mut events = first.subscribe();
        second.set("k", "v").await.unwrap();

        assert_eq!(first.get("k").await.unwrap().as_deref(), Some("v"));
        let event = events.recv().await.unwrap();
        assert_eq!(event.key, "k");
        assert_eq!(event.origin, second.origin());
        assert_eq!(event.kind, StorageEventKind::Set);
    }

    #[tokio::test]
    async fn remove_of_missing_key_is_silent() {
        let store = InMemoryStore::new();
        let mut events = store.subscribe();
        store.remove("missing").await.unwrap();
        store.set("k", "v").await.unwrap();
        store.remove("k").await.unwrap();

        assert_eq!(events.recv().await.unwrap().kind, StorageEventKind::Set);
        assert_eq!(events.recv().await.unwrap().kind, StorageEventKind::Removed);
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[test]
    fn store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<InMemoryStore>();
    }
}
