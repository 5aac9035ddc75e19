use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use storage::{RecordState, RecordStore};
use study_core::model::{ProgressRecord, RecordExport, export_file_name};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::files::write_json;
use crate::progress_tracker::ProgressTracker;
use crate::prompt::UserPrompt;
use crate::Clock;

const CLEAR_QUESTION: &str =
    "Delete all progress data? A backup copy is kept and can be restored later.";

/// Outcome of checking the primary record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// Nothing stored yet.
    Missing,
    Healthy,
    /// The record was corrupt and has been replaced by the backup.
    Restored,
    /// The record was corrupt and no usable backup exists.
    Unrecoverable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    NoBackup,
    /// A backup exists but does not parse.
    BackupUnusable,
    Declined,
}

/// What an import wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOutcome {
    pub topics: usize,
    pub notes: usize,
}

/// Handle to the periodic backup task. Shutting it down takes a final backup.
pub struct BackupTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl BackupTask {
    /// Stop the timer and wait for the final backup.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.handle.await {
            warn!(%err, "backup task did not shut down cleanly");
        }
    }
}

/// Backup, restore, import/export and change propagation for the progress record.
pub struct SyncService {
    clock: Clock,
    records: RecordStore,
}

impl SyncService {
    #[must_use]
    pub fn new(clock: Clock, records: RecordStore) -> Self {
        Self { clock, records }
    }

    /// Copy the primary record verbatim to the backup key and stamp last-sync.
    ///
    /// Returns the sync time, or `None` when there is nothing to back up. A
    /// primary that does not parse is never copied, so the last good backup
    /// survives.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the backend cannot be accessed.
    pub async fn create_backup(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        let Some(raw) = self.records.primary_raw().await? else {
            debug!("no progress record to back up");
            return Ok(None);
        };
        if let Err(err) = serde_json::from_str::<ProgressRecord>(&raw) {
            warn!(%err, "progress record is corrupt; keeping previous backup");
            return Ok(None);
        }
        let now = self.clock.now();
        self.records.set_backup_raw(&raw).await?;
        self.records.set_last_sync(now).await?;
        info!(at = %now.to_rfc3339(), "backup created");
        Ok(Some(now))
    }

    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the backend cannot be read.
    pub async fn last_sync(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        Ok(self.records.last_sync().await?)
    }

    /// Parse the primary record; if it is corrupt, restore it from the backup
    /// without asking.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the backend cannot be accessed.
    pub async fn check_data_integrity(&self) -> Result<IntegrityStatus, SyncError> {
        match self.records.load().await? {
            RecordState::Missing => Ok(IntegrityStatus::Missing),
            RecordState::Present(_) => Ok(IntegrityStatus::Healthy),
            RecordState::Corrupt { reason, .. } => {
                warn!(%reason, "progress record is corrupt; restoring from backup");
                match self.restore_from_backup_silent().await? {
                    RestoreOutcome::Restored => Ok(IntegrityStatus::Restored),
                    outcome => {
                        error!(?outcome, "progress record is corrupt and cannot be restored");
                        Ok(IntegrityStatus::Unrecoverable)
                    }
                }
            }
        }
    }

    /// Overwrite the primary record with the backup, with no user interaction.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the backend cannot be accessed.
    pub async fn restore_from_backup_silent(&self) -> Result<RestoreOutcome, SyncError> {
        let Some(raw) = self.records.backup_raw().await? else {
            return Ok(RestoreOutcome::NoBackup);
        };
        if let Err(err) = serde_json::from_str::<ProgressRecord>(&raw) {
            warn!(%err, "backup does not parse; leaving primary record untouched");
            return Ok(RestoreOutcome::BackupUnusable);
        }
        self.records.set_primary_raw(&raw).await?;
        info!("progress record restored from backup");
        Ok(RestoreOutcome::Restored)
    }

    /// User-initiated restore: asks first and reports the result.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the backend cannot be accessed.
    pub async fn restore_from_backup(
        &self,
        prompt: &dyn UserPrompt,
    ) -> Result<RestoreOutcome, SyncError> {
        if self.records.backup_raw().await?.is_none() {
            prompt.alert("No backup found.");
            return Ok(RestoreOutcome::NoBackup);
        }

        let question = match self.records.last_sync().await? {
            Some(at) => format!(
                "Restore progress from the backup taken at {}? Current progress will be replaced.",
                at.to_rfc3339()
            ),
            None => "Restore progress from the backup? Current progress will be replaced.".into(),
        };
        if !prompt.confirm(&question) {
            return Ok(RestoreOutcome::Declined);
        }

        let outcome = self.restore_from_backup_silent().await?;
        match outcome {
            RestoreOutcome::Restored => prompt.alert("Progress restored from backup."),
            RestoreOutcome::BackupUnusable => {
                prompt.alert("The backup is damaged and cannot be restored.");
            }
            RestoreOutcome::NoBackup | RestoreOutcome::Declined => {}
        }
        Ok(outcome)
    }

    /// Write the full record and last-sync stamp to a date-stamped file.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the record is corrupt, or I/O errors.
    pub async fn export_data(&self, dir: &Path) -> Result<PathBuf, SyncError> {
        let now = self.clock.now();
        let record = match self.records.load().await? {
            RecordState::Present(record) => record,
            RecordState::Missing => self.records.load_or_create(now).await?,
            RecordState::Corrupt { reason, .. } => {
                return Err(storage::StorageError::Corrupt(reason).into());
            }
        };
        let mut export = RecordExport::new(record, now);
        export.last_sync = self.records.last_sync().await?;

        let path = write_json(dir, &export_file_name("data", now), &export).await?;
        info!(path = %path.display(), "exported data");
        Ok(path)
    }

    /// Replace the record with the one in an exported file.
    ///
    /// The current record is backed up first. A failed import leaves that
    /// backup in place and the primary record untouched.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Import` if the file has no `data` field or does not
    /// parse, or I/O and storage errors.
    pub async fn import_data(&self, path: &Path) -> Result<ImportOutcome, SyncError> {
        self.create_backup().await?;

        let text = tokio::fs::read_to_string(path).await?;
        let export = RecordExport::parse(&text)?;
        let saved = self.records.replace(self.clock.now(), export.data).await?;

        let outcome = ImportOutcome {
            topics: saved.topics.len(),
            notes: saved.notes.len(),
        };
        info!(path = %path.display(), topics = outcome.topics, notes = outcome.notes, "imported data");
        Ok(outcome)
    }

    /// Delete the primary record after confirmation, keeping a final backup.
    ///
    /// Returns `false` if the user declined.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if the backend cannot be accessed.
    pub async fn clear_all_data(&self, prompt: &dyn UserPrompt) -> Result<bool, SyncError> {
        if !prompt.confirm(CLEAR_QUESTION) {
            return Ok(false);
        }
        self.create_backup().await?;
        self.records.remove_primary().await?;
        info!("progress data cleared");
        Ok(true)
    }

    /// Back up every `interval` until the returned task is shut down, then once more.
    #[must_use]
    pub fn spawn_periodic_backup(self: &Arc<Self>, interval: Duration) -> BackupTask {
        let (shutdown, mut stop) = oneshot::channel::<()>();
        let this = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = this.create_backup().await {
                            warn!(%err, "periodic backup failed");
                        }
                    }
                    _ = &mut stop => break,
                }
            }

            if let Err(err) = this.create_backup().await {
                warn!(%err, "final backup failed");
            }
        });

        BackupTask { shutdown, handle }
    }

    /// Reload `tracker` whenever another session writes the primary record.
    ///
    /// Runs until the store is dropped or the handle is aborted.
    #[must_use]
    pub fn watch_changes(&self, tracker: Arc<ProgressTracker>) -> JoinHandle<()> {
        let mut events = self.records.subscribe();
        let origin = self.records.origin();
        let key = self.records.keys().primary.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.key == key && event.origin != origin => {
                        debug!(origin = %event.origin, kind = ?event.kind, "progress changed in another session");
                        if let Err(err) = tracker.reload().await {
                            warn!(%err, "failed to reload progress");
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed change events; reloading");
                        if let Err(err) = tracker.reload().await {
                            warn!(%err, "failed to reload progress");
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
