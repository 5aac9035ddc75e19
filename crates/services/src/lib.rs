#![forbid(unsafe_code)]

pub mod app_services;
pub mod config;
pub mod dashboard;
pub mod error;
mod files;
pub mod notes_service;
pub mod progress_tracker;
pub mod prompt;
pub mod sync_service;

pub use study_core::Clock;

pub use app_services::AppServices;
pub use config::TrackerConfig;
pub use dashboard::Dashboard;
pub use error::{AppServicesError, ConfigError, NotesError, ProgressError, SyncError};
pub use notes_service::NotesService;
pub use progress_tracker::{ProgressTracker, TopicToggled};
pub use prompt::{AutoConfirm, ScriptedPrompt, UserPrompt};
pub use sync_service::{BackupTask, ImportOutcome, IntegrityStatus, RestoreOutcome, SyncService};
