use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use storage::RecordStore;
use study_core::model::{NotesExport, TopicId, TopicNote, export_file_name};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::NotesError;
use crate::files::write_json;
use crate::Clock;

struct PendingNote {
    generation: u64,
    content: String,
    task: Option<JoinHandle<()>>,
}

/// Sole owner of the `notes` subtree of the progress record.
///
/// Keystrokes go through [`NotesService::schedule_auto_save`], which waits for a
/// quiet period per topic before writing the latest content.
pub struct NotesService {
    clock: Clock,
    records: RecordStore,
    debounce: Duration,
    pending: Mutex<HashMap<TopicId, PendingNote>>,
    generation: AtomicU64,
}

impl NotesService {
    #[must_use]
    pub fn new(clock: Clock, records: RecordStore, debounce: Duration) -> Self {
        Self {
            clock,
            records,
            debounce,
            pending: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<TopicId, PendingNote>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All saved notes.
    ///
    /// # Errors
    ///
    /// Returns `NotesError::Storage` if the record cannot be read.
    pub async fn load_notes(&self) -> Result<BTreeMap<TopicId, TopicNote>, NotesError> {
        let record = self.records.load_or_create(self.clock.now()).await?;
        Ok(record.notes)
    }

    /// # Errors
    ///
    /// Returns `NotesError::Storage` if the record cannot be read.
    pub async fn note(&self, topic: &TopicId) -> Result<Option<TopicNote>, NotesError> {
        let mut notes = self.load_notes().await?;
        Ok(notes.remove(topic))
    }

    /// Save immediately, superseding any autosave scheduled for the topic.
    ///
    /// # Errors
    ///
    /// Returns `NotesError::Storage` if the record cannot be written.
    pub async fn save_notes(
        &self,
        topic: TopicId,
        content: impl Into<String>,
    ) -> Result<TopicNote, NotesError> {
        if let Some(previous) = self.pending().remove(&topic) {
            abort(previous);
        }
        self.persist(topic, content.into()).await
    }

    /// (Re)start the quiet-period timer for `topic` with the latest `content`.
    pub fn schedule_auto_save(self: &Arc<Self>, topic: TopicId, content: impl Into<String>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.pending();
            let entry = PendingNote {
                generation,
                content: content.into(),
                task: None,
            };
            if let Some(previous) = pending.insert(topic.clone(), entry) {
                abort(previous);
            }
        }

        let this = Arc::clone(self);
        let key = topic.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            this.commit_pending(key, generation).await;
        });

        match self.pending().get_mut(&topic) {
            Some(entry) if entry.generation == generation => entry.task = Some(task),
            // Already committed or superseded.
            _ => drop(task),
        }
    }

    /// Number of topics with an autosave still waiting.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Write every scheduled note now. Returns how many were saved.
    ///
    /// # Errors
    ///
    /// Returns `NotesError::Storage` on the first failed write; notes not yet
    /// written are dropped.
    pub async fn flush_pending(&self) -> Result<usize, NotesError> {
        let drained: Vec<(TopicId, PendingNote)> = self.pending().drain().collect();
        let count = drained.len();
        for (topic, note) in drained {
            let PendingNote { content, task, .. } = note;
            if let Some(task) = task {
                task.abort();
            }
            self.persist(topic, content).await?;
        }
        if count > 0 {
            debug!(count, "flushed pending notes");
        }
        Ok(count)
    }

    /// Write a date-stamped notes export into `dir`.
    ///
    /// # Errors
    ///
    /// Returns `NotesError` if the record cannot be read or the file written.
    pub async fn export_notes(&self, dir: &Path) -> Result<PathBuf, NotesError> {
        let now = self.clock.now();
        let export = NotesExport {
            notes: self.load_notes().await?,
            exported_at: now,
        };
        let path = write_json(dir, &export_file_name("notes", now), &export).await?;
        info!(path = %path.display(), notes = export.notes.len(), "exported notes");
        Ok(path)
    }

    /// Merge the notes of an exported file into the record, by topic key.
    ///
    /// Returns the number of notes written.
    ///
    /// # Errors
    ///
    /// Returns `NotesError::Import` if the file has no `notes` field, or I/O and
    /// storage errors.
    pub async fn import_notes(&self, path: &Path) -> Result<usize, NotesError> {
        let text = tokio::fs::read_to_string(path).await?;
        let export = NotesExport::parse(&text)?;
        let incoming = export.notes;
        let count = incoming.len();

        self.records
            .update(self.clock.now(), |record| {
                record.merge_notes(incoming.clone());
            })
            .await?;
        info!(path = %path.display(), count, "imported notes");
        Ok(count)
    }

    async fn persist(&self, topic: TopicId, content: String) -> Result<TopicNote, NotesError> {
        let now = self.clock.now();
        self.records
            .update(now, |record| record.set_note(topic.clone(), content.clone(), now))
            .await?;
        debug!(%topic, "note saved");
        Ok(TopicNote {
            content,
            last_modified: now,
        })
    }

    async fn commit_pending(&self, topic: TopicId, generation: u64) {
        let content = {
            let mut pending = self.pending();
            let current = pending
                .get(&topic)
                .is_some_and(|entry| entry.generation == generation);
            if current {
                pending.remove(&topic).map(|entry| entry.content)
            } else {
                None
            }
        };
        let Some(content) = content else {
            return;
        };
        if let Err(err) = self.persist(topic.clone(), content).await {
            warn!(%topic, %err, "autosave failed");
        }
    }
}

fn abort(note: PendingNote) {
    if let Some(task) = note.task {
        task.abort();
    }
}

impl Drop for NotesService {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !pending.is_empty() {
            warn!(count = pending.len(), "dropping unsaved notes");
        }
    }
}
