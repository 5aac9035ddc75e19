use chrono::{DateTime, Utc};
use std::sync::Arc;
use study_core::model::ProgressRecord;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::repository::{KeyValueStore, SessionId, StorageError, StorageEvent};

const MAX_UPDATE_ATTEMPTS: usize = 5;

/// The three keys the progress record lives under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub primary: String,
    pub backup: String,
    pub last_sync: String,
}

impl StorageKeys {
    #[must_use]
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            primary: prefix.to_owned(),
            backup: format!("{prefix}_backup"),
            last_sync: format!("{prefix}_last_sync"),
        }
    }
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self::with_prefix("study_progress")
    }
}

/// What the primary key currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    Missing,
    Corrupt { raw: String, reason: String },
    Present(ProgressRecord),
}

fn parse(raw: &str) -> RecordState {
    match serde_json::from_str::<ProgressRecord>(raw) {
        Ok(record) => RecordState::Present(record),
        Err(err) => RecordState::Corrupt {
            raw: raw.to_owned(),
            reason: err.to_string(),
        },
    }
}

fn serialize(record: &ProgressRecord) -> Result<String, StorageError> {
    serde_json::to_string(record).map_err(|err| StorageError::Serialization(err.to_string()))
}

/// Typed access to the progress record, its backup and the last-sync stamp.
///
/// Every service goes through this type. Writes to the primary key are
/// compare-and-set against the exact text that was read, so an update racing
/// with another session is re-applied on top of the newer record instead of
/// clobbering it.
#[derive(Clone)]
pub struct RecordStore {
    kv: Arc<dyn KeyValueStore>,
    keys: StorageKeys,
}

impl RecordStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, keys: StorageKeys) -> Self {
        Self { kv, keys }
    }

    #[must_use]
    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    #[must_use]
    pub fn origin(&self) -> SessionId {
        self.kv.origin()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.kv.subscribe()
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn load(&self) -> Result<RecordState, StorageError> {
        Ok(match self.kv.get(&self.keys.primary).await? {
            None => RecordState::Missing,
            Some(raw) => parse(&raw),
        })
    }

    /// Read the record, creating and persisting the default skeleton if none exists.
    ///
    /// A corrupt record yields an unsaved skeleton; repairing it is the integrity
    /// check's job.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be accessed.
    pub async fn load_or_create(&self, now: DateTime<Utc>) -> Result<ProgressRecord, StorageError> {
        match self.load().await? {
            RecordState::Present(record) => Ok(record),
            RecordState::Corrupt { reason, .. } => {
                warn!(key = %self.keys.primary, %reason, "progress record is corrupt; using defaults");
                Ok(ProgressRecord::new(now))
            }
            RecordState::Missing => {
                let record = ProgressRecord::new(now);
                let raw = serialize(&record)?;
                if self.kv.compare_and_set(&self.keys.primary, None, &raw).await? {
                    debug!(key = %self.keys.primary, "created progress record");
                    return Ok(record);
                }
                // Another session created it first.
                match self.load().await? {
                    RecordState::Present(existing) => Ok(existing),
                    _ => Ok(record),
                }
            }
        }
    }

    /// Apply `mutate` to the current record and persist it.
    ///
    /// `version` is bumped and `last_updated` set to `now`. A missing record starts
    /// from the default skeleton.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corrupt` if the stored record cannot be parsed,
    /// `StorageError::Conflict` if concurrent writers keep winning, or backend errors.
    pub async fn update<F>(&self, now: DateTime<Utc>, mutate: F) -> Result<ProgressRecord, StorageError>
    where
        F: FnMut(&mut ProgressRecord) + Send,
    {
        self.write_loop(now, false, mutate).await
    }

    /// Replace the whole record, overwriting a corrupt one if necessary.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures or persistent conflicts.
    pub async fn replace(
        &self,
        now: DateTime<Utc>,
        record: ProgressRecord,
    ) -> Result<ProgressRecord, StorageError> {
        self.write_loop(now, true, |current| *current = record.clone())
            .await
    }

    async fn write_loop<F>(
        &self,
        now: DateTime<Utc>,
        overwrite_corrupt: bool,
        mut mutate: F,
    ) -> Result<ProgressRecord, StorageError>
    where
        F: FnMut(&mut ProgressRecord) + Send,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current = self.kv.get(&self.keys.primary).await?;
            let mut record = match current.as_deref().map(parse) {
                None => ProgressRecord::new(now),
                Some(RecordState::Present(record)) => record,
                Some(RecordState::Corrupt { reason, .. }) if !overwrite_corrupt => {
                    return Err(StorageError::Corrupt(reason));
                }
                Some(_) => ProgressRecord::new(now),
            };

            let base_version = record.version;
            mutate(&mut record);
            record.version = base_version.max(record.version) + 1;
            record.last_updated = now;

            let raw = serialize(&record)?;
            if self
                .kv
                .compare_and_set(&self.keys.primary, current.as_deref(), &raw)
                .await?
            {
                debug!(key = %self.keys.primary, version = record.version, "progress record saved");
                return Ok(record);
            }
            warn!(attempt, key = %self.keys.primary, "progress record changed concurrently; re-applying");
        }
        Err(StorageError::Conflict)
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn primary_raw(&self) -> Result<Option<String>, StorageError> {
        self.kv.get(&self.keys.primary).await
    }

    /// Overwrite the primary key verbatim.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be stored.
    pub async fn set_primary_raw(&self, raw: &str) -> Result<(), StorageError> {
        self.kv.set(&self.keys.primary, raw).await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    pub async fn remove_primary(&self) -> Result<(), StorageError> {
        self.kv.remove(&self.keys.primary).await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn backup_raw(&self) -> Result<Option<String>, StorageError> {
        self.kv.get(&self.keys.backup).await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be stored.
    pub async fn set_backup_raw(&self, raw: &str) -> Result<(), StorageError> {
        self.kv.set(&self.keys.backup, raw).await
    }

    /// Last successful backup time. An unparseable stamp reads as `None`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let raw = self.kv.get(&self.keys.last_sync).await?;
        Ok(raw.and_then(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|at| at.with_timezone(&Utc))
        }))
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be stored.
    pub async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.kv.set(&self.keys.last_sync, &at.to_rfc3339()).await
    }
}
