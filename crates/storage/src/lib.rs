#![forbid(unsafe_code)]

pub mod record_store;
pub mod repository;
pub mod sqlite;

pub use record_store::{RecordState, RecordStore, StorageKeys};
pub use repository::{
    InMemoryStore, KeyValueStore, SessionId, Storage, StorageError, StorageEvent,
    StorageEventKind,
};
