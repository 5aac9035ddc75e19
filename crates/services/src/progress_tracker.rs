use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use storage::{RecordState, RecordStore};
use study_core::model::{
    PageScope, ProgressRecord, RecordExport, TopicId, TopicNote, TopicProgress, export_file_name,
};
use study_core::stats::{self, ProgressRatio};
use tracing::{debug, info};

use crate::dashboard::Dashboard;
use crate::error::ProgressError;
use crate::files::write_json;
use crate::notes_service::NotesService;
use crate::prompt::UserPrompt;
use crate::Clock;

const RESET_QUESTION: &str =
    "Reset all progress? Completed topics and notes will be deleted and cannot be recovered.";

/// Result of toggling a topic: its new state and the refreshed dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicToggled {
    pub topic: TopicId,
    pub state: TopicProgress,
    pub dashboard: Dashboard,
}

/// Canonical owner of topic completion and every statistic derived from it.
///
/// Keeps an in-memory copy of the record for the statistics; every mutation
/// goes to storage first and the copy is refreshed from what was written.
pub struct ProgressTracker {
    clock: Clock,
    records: RecordStore,
    notes: Arc<NotesService>,
    page: Mutex<Option<PageScope>>,
    current: Mutex<ProgressRecord>,
}

impl ProgressTracker {
    /// `page` limits percentages to the rendered topics; `None` uses every topic
    /// in the record.
    #[must_use]
    pub fn new(
        clock: Clock,
        records: RecordStore,
        notes: Arc<NotesService>,
        page: Option<PageScope>,
    ) -> Self {
        Self {
            current: Mutex::new(ProgressRecord::new(clock.now())),
            clock,
            records,
            notes,
            page: Mutex::new(page),
        }
    }

    fn current(&self) -> MutexGuard<'_, ProgressRecord> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace_current(&self, record: ProgressRecord) {
        *self.current() = record;
    }

    /// Copy of the in-memory record.
    #[must_use]
    pub fn record(&self) -> ProgressRecord {
        self.current().clone()
    }

    /// Topics the statistics are computed over.
    #[must_use]
    pub fn page(&self) -> PageScope {
        let page = self.page.lock().unwrap_or_else(PoisonError::into_inner);
        match page.as_ref() {
            Some(page) => page.clone(),
            None => PageScope::from_record(&self.current()),
        }
    }

    pub fn set_page(&self, page: Option<PageScope>) {
        *self.page.lock().unwrap_or_else(PoisonError::into_inner) = page;
    }

    /// Read the record from storage, creating it on first use.
    ///
    /// A malformed record loads as the default skeleton without an error.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the backend cannot be accessed.
    pub async fn load_progress(&self) -> Result<ProgressRecord, ProgressError> {
        let record = self.records.load_or_create(self.clock.now()).await?;
        self.replace_current(record.clone());
        Ok(record)
    }

    /// Refresh the in-memory copy after another session changed the record.
    ///
    /// Never writes: a record cleared elsewhere reads as an empty skeleton and
    /// stays absent in storage.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the backend cannot be accessed.
    pub async fn reload(&self) -> Result<(), ProgressError> {
        let record = match self.records.load().await? {
            RecordState::Present(record) => record,
            RecordState::Missing | RecordState::Corrupt { .. } => {
                ProgressRecord::new(self.clock.now())
            }
        };
        debug!(version = record.version, "progress reloaded");
        self.replace_current(record);
        Ok(())
    }

    /// Mark `topic` complete (stamped now) or pending, persist, and re-render.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the record is corrupt or cannot be written.
    pub async fn toggle_topic_completion(
        &self,
        topic: TopicId,
        completed: bool,
    ) -> Result<TopicToggled, ProgressError> {
        let now = self.clock.now();
        let record = self
            .records
            .update(now, |record| {
                record.set_topic_completed(topic.clone(), completed, now);
            })
            .await?;

        let state = record
            .topic(&topic)
            .cloned()
            .unwrap_or_else(TopicProgress::pending);
        self.replace_current(record);
        info!(%topic, completed, "topic toggled");

        Ok(TopicToggled {
            topic,
            state,
            dashboard: self.dashboard(),
        })
    }

    /// Progress of the page topics in the group starting with `prefix`.
    #[must_use]
    pub fn calculate_progress(&self, prefix: &str) -> ProgressRatio {
        let page = self.page();
        stats::group_progress(&self.current(), &page, prefix)
    }

    #[must_use]
    pub fn calculate_overall_progress(&self) -> ProgressRatio {
        let page = self.page();
        stats::overall_progress(&self.current(), &page)
    }

    #[must_use]
    pub fn calculate_streak(&self) -> u32 {
        stats::streak(&self.current(), self.clock.today())
    }

    #[must_use]
    pub fn weekly_completions(&self) -> usize {
        stats::weekly_completions(&self.current(), self.clock.today())
    }

    #[must_use]
    pub fn dashboard(&self) -> Dashboard {
        let page = self.page();
        Dashboard::build(&self.current(), &page, self.clock.today())
    }

    /// Write the record plus an overall-progress snapshot to a date-stamped file.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if the record cannot be read or the file written.
    pub async fn export_progress(&self, dir: &Path) -> Result<PathBuf, ProgressError> {
        let record = self.load_progress().await?;
        let now = self.clock.now();
        let mut export = RecordExport::new(record, now);
        export.overall_progress = Some(self.calculate_overall_progress());

        let path = write_json(dir, &export_file_name("progress", now), &export).await?;
        info!(path = %path.display(), "exported progress");
        Ok(path)
    }

    /// Delete the record after confirmation and start over from a fresh one.
    ///
    /// No backup is taken. Returns `false` if the user declined.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the record cannot be removed or recreated.
    pub async fn reset_progress(&self, prompt: &dyn UserPrompt) -> Result<bool, ProgressError> {
        if !prompt.confirm(RESET_QUESTION) {
            return Ok(false);
        }
        self.records.remove_primary().await?;
        info!("progress reset");
        self.load_progress().await?;
        Ok(true)
    }

    /// Save a note through the notes owner and refresh the in-memory copy.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Notes` if the note cannot be written.
    pub async fn save_note(
        &self,
        topic: TopicId,
        content: impl Into<String>,
    ) -> Result<TopicNote, ProgressError> {
        let note = self.notes.save_notes(topic, content).await?;
        self.load_progress().await?;
        Ok(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompt;
    use std::time::Duration;
    use storage::{Storage, StorageError, StorageKeys};
    use study_core::time::fixed_now;

    fn tracker(page: Option<PageScope>) -> (RecordStore, ProgressTracker) {
        let records = Storage::in_memory().records(StorageKeys::default());
        let clock = Clock::fixed(fixed_now());
        let notes = Arc::new(NotesService::new(
            clock,
            records.clone(),
            Duration::from_secs(1),
        ));
        let tracker = ProgressTracker::new(clock, records.clone(), notes, page);
        (records, tracker)
    }

    #[tokio::test]
    async fn toggle_on_then_off_leaves_pending() {
        let (records, tracker) = tracker(None);
        tracker.load_progress().await.unwrap();
        let topic = TopicId::new("part1-01");

        let on = tracker.toggle_topic_completion(topic.clone(), true).await.unwrap();
        assert!(on.state.completed());
        assert_eq!(on.state.completed_date(), Some(fixed_now()));

        let off = tracker.toggle_topic_completion(topic.clone(), false).await.unwrap();
        assert!(!off.state.completed());
        assert_eq!(off.state.completed_date(), None);

        let RecordState::Present(stored) = records.load().await.unwrap() else {
            panic!("record should be present");
        };
        assert_eq!(stored.topic(&topic), Some(&TopicProgress::pending()));
    }

    #[tokio::test]
    async fn statistics_are_page_scoped() {
        let page = PageScope::parse("part1-01\npart1-02\npart2-01\npart2-02");
        let (_, tracker) = tracker(Some(page));
        tracker.load_progress().await.unwrap();

        tracker
            .toggle_topic_completion(TopicId::new("part1-01"), true)
            .await
            .unwrap();
        tracker
            .toggle_topic_completion(TopicId::new("part3-01"), true)
            .await
            .unwrap();

        assert_eq!(tracker.calculate_progress("part1"), ProgressRatio::new(1, 2));
        assert_eq!(tracker.calculate_progress("part2"), ProgressRatio::new(0, 2));
        assert_eq!(tracker.calculate_overall_progress(), ProgressRatio::new(1, 4));
        assert_eq!(tracker.calculate_streak(), 1);
        assert_eq!(tracker.weekly_completions(), 2);

        tracker.set_page(Some(PageScope::default()));
        assert_eq!(tracker.calculate_overall_progress().percent(), 0);
    }

    #[tokio::test]
    async fn toggle_returns_rendered_dashboard() {
        let (_, tracker) = tracker(Some(PageScope::parse("a-1\na-2")));
        let toggled = tracker
            .toggle_topic_completion(TopicId::new("a-1"), true)
            .await
            .unwrap();
        assert_eq!(toggled.dashboard.overall, ProgressRatio::new(1, 2));
        assert_eq!(toggled.dashboard.total_completed, 1);
    }

    #[tokio::test]
    async fn reset_requires_confirmation() {
        let (records, tracker) = tracker(None);
        tracker
            .toggle_topic_completion(TopicId::new("a-1"), true)
            .await
            .unwrap();

        assert!(!tracker.reset_progress(&ScriptedPrompt::always(false)).await.unwrap());
        assert!(tracker.record().is_completed(&TopicId::new("a-1")));

        assert!(tracker.reset_progress(&ScriptedPrompt::always(true)).await.unwrap());
        assert!(tracker.record().topics.is_empty());
        assert!(records.backup_raw().await.unwrap().is_none());
        let RecordState::Present(fresh) = records.load().await.unwrap() else {
            panic!("reset should recreate the record");
        };
        assert!(fresh.topics.is_empty());
    }

    #[tokio::test]
    async fn reload_after_removal_does_not_recreate_record() {
        let (records, tracker) = tracker(None);
        tracker
            .toggle_topic_completion(TopicId::new("a-1"), true)
            .await
            .unwrap();
        records.remove_primary().await.unwrap();

        tracker.reload().await.unwrap();
        assert!(tracker.record().topics.is_empty());
        assert!(records.primary_raw().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_note_goes_through_notes_service() {
        let (_, tracker) = tracker(None);
        tracker
            .save_note(TopicId::new("a-1"), "lifetimes")
            .await
            .unwrap();
        assert_eq!(
            tracker.record().note(&TopicId::new("a-1")).unwrap().content,
            "lifetimes"
        );
        assert_eq!(tracker.dashboard().notes, 1);
    }

    #[tokio::test]
    async fn malformed_record_loads_as_skeleton() {
        let storage = Storage::in_memory();
        storage.kv.set("study_progress", "{oops").await.unwrap();
        let records = storage.records(StorageKeys::default());
        let clock = Clock::fixed(fixed_now());
        let notes = Arc::new(NotesService::new(clock, records.clone(), Duration::from_secs(1)));
        let tracker = ProgressTracker::new(clock, records, notes, None);

        let record = tracker.load_progress().await.unwrap();
        assert!(record.topics.is_empty());
        assert!(matches!(
            tracker
                .toggle_topic_completion(TopicId::new("a-1"), true)
                .await
                .unwrap_err(),
            ProgressError::Storage(StorageError::Corrupt(_))
        ));
    }
}
