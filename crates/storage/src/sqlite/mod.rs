use std::sync::Arc;
use std::time::Duration;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::repository::{SessionId, Storage, StorageEvent};

mod kv_repo;
mod migrate;

const EVENT_CAPACITY: usize = 64;

/// `SQLite`-backed key-value store.
///
/// Sessions created with [`SqliteRepository::session`] share the pool and
/// receive each other's change events. Separate processes on the same file
/// see the data but not the events.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
    events: broadcast::Sender<StorageEvent>,
    origin: SessionId,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl SqliteRepository {
    /// Connect to `SQLite` using the given URL.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the connection cannot be established or
    /// connection setup pragmas fail.
    pub async fn connect(database_url: &str) -> Result<Self, SqliteInitError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode = WAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA busy_timeout = 5000;")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            pool,
            events,
            origin: SessionId::new(),
        })
    }

    /// Same pool and event channel, fresh session id.
    #[must_use]
    pub fn session(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            events: self.events.clone(),
            origin: SessionId::new(),
        }
    }

    /// Create tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if migration queries fail.
    pub async fn migrate(&self) -> Result<(), SqliteInitError> {
        migrate::run_migrations(&self.pool).await
    }
}

impl Storage {
    /// Build a `Storage` backed by `SQLite`.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if connection or migrations cannot be
    /// completed.
    pub async fn sqlite(database_url: &str) -> Result<Self, SqliteInitError> {
        let repo = SqliteRepository::connect(database_url).await?;
        repo.migrate().await?;
        Ok(Self::new(Arc::new(repo)))
    }
}
