//! Shared error types for the services crate.

use thiserror::Error;

use storage::sqlite::SqliteInitError;
use storage::StorageError;
use study_core::model::ImportError;

/// Errors emitted by `ProgressTracker`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Notes(#[from] NotesError),
    #[error("failed to write export: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors emitted by `NotesService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotesError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error("notes file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors emitted by `SyncService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error("data file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid configuration value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid {var} value: {raw}")]
    Invalid { var: &'static str, raw: String },
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Notes(#[from] NotesError),
}
