use chrono::{DateTime, Utc};
use std::sync::Arc;

use storage::{RecordStore, Storage};
use study_core::model::PageScope;
use tracing::info;

use crate::config::TrackerConfig;
use crate::error::AppServicesError;
use crate::notes_service::NotesService;
use crate::progress_tracker::ProgressTracker;
use crate::sync_service::{IntegrityStatus, SyncService};
use crate::Clock;

/// Assembles the tracker services over one storage session.
///
/// All three services share the same record store; notes go through the
/// single [`NotesService`] the tracker also delegates to.
#[derive(Clone)]
pub struct AppServices {
    config: TrackerConfig,
    records: RecordStore,
    progress: Arc<ProgressTracker>,
    notes: Arc<NotesService>,
    sync: Arc<SyncService>,
}

impl AppServices {
    #[must_use]
    pub fn new(
        storage: &Storage,
        clock: Clock,
        config: TrackerConfig,
        page: Option<PageScope>,
    ) -> Self {
        let records = storage.records(config.keys.clone());
        let notes = Arc::new(NotesService::new(
            clock,
            records.clone(),
            config.notes_debounce,
        ));
        let progress = Arc::new(ProgressTracker::new(
            clock,
            records.clone(),
            Arc::clone(&notes),
            page,
        ));
        let sync = Arc::new(SyncService::new(clock, records.clone()));

        Self {
            config,
            records,
            progress,
            notes,
            sync,
        }
    }

    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: TrackerConfig,
        page: Option<PageScope>,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::new(&storage, clock, config, page))
    }

    /// Check the stored record, restoring it from backup if it is corrupt, then
    /// load it into the tracker.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage cannot be read.
    pub async fn bootstrap(&self) -> Result<IntegrityStatus, AppServicesError> {
        let status = self.sync.check_data_integrity().await?;
        let record = self.progress.load_progress().await?;
        info!(?status, topics = record.topics.len(), "progress loaded");
        Ok(status)
    }

    /// Exit-time work: write every pending note, then back up the record.
    ///
    /// Returns the backup time, or `None` when there was nothing usable to back up.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if a note or the backup cannot be written.
    pub async fn shutdown(&self) -> Result<Option<DateTime<Utc>>, AppServicesError> {
        let flushed = self.notes.flush_pending().await?;
        let backed_up = self.sync.create_backup().await?;
        info!(flushed, backed_up = backed_up.is_some(), "services shut down");
        Ok(backed_up)
    }

    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[must_use]
    pub fn records(&self) -> RecordStore {
        self.records.clone()
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn notes(&self) -> Arc<NotesService> {
        Arc::clone(&self.notes)
    }

    #[must_use]
    pub fn sync(&self) -> Arc<SyncService> {
        Arc::clone(&self.sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use study_core::time::fixed_now;

    #[tokio::test]
    async fn bootstrap_restores_corrupt_record() {
        let storage = Storage::in_memory();
        let services = AppServices::new(
            &storage,
            Clock::fixed(fixed_now()),
            TrackerConfig::default(),
            None,
        );
        services
            .progress()
            .toggle_topic_completion("part1-01".into(), true)
            .await
            .unwrap();
        services.sync().create_backup().await.unwrap();
        services.records().set_primary_raw("not json").await.unwrap();

        assert_eq!(services.bootstrap().await.unwrap(), IntegrityStatus::Restored);
        assert!(services.progress().record().is_completed(&"part1-01".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_notes_then_backs_up() {
        let storage = Storage::in_memory();
        let services = AppServices::new(
            &storage,
            Clock::fixed(fixed_now()),
            TrackerConfig::default(),
            None,
        );
        services.bootstrap().await.unwrap();
        services
            .progress()
            .toggle_topic_completion("part1-01".into(), true)
            .await
            .unwrap();
        services.notes().schedule_auto_save("part1-01".into(), "draft");
        assert!(services.records().backup_raw().await.unwrap().is_none());

        assert_eq!(services.shutdown().await.unwrap(), Some(fixed_now()));
        assert_eq!(services.notes().pending_count(), 0);

        let backup = services.records().backup_raw().await.unwrap();
        assert_eq!(backup, services.records().primary_raw().await.unwrap());
        let backup: study_core::model::ProgressRecord =
            serde_json::from_str(&backup.unwrap()).unwrap();
        assert!(backup.is_completed(&"part1-01".into()));
        assert_eq!(backup.note(&"part1-01".into()).unwrap().content, "draft");
    }

    #[tokio::test]
    async fn bootstrap_creates_record_on_first_run() {
        let storage = Storage::in_memory();
        let services = AppServices::new(
            &storage,
            Clock::fixed(fixed_now()),
            TrackerConfig::default(),
            None,
        );
        assert_eq!(services.bootstrap().await.unwrap(), IntegrityStatus::Missing);
        assert!(services.records().primary_raw().await.unwrap().is_some());
    }
}
