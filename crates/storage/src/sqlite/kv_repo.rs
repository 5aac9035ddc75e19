use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use tokio::sync::broadcast;

use crate::repository::{
    KeyValueStore, SessionId, StorageError, StorageEvent, StorageEventKind,
};

use super::SqliteRepository;

impl SqliteRepository {
    fn notify(&self, key: &str, kind: StorageEventKind) {
        let _ = self.events.send(StorageEvent {
            key: key.to_owned(),
            origin: self.origin,
            kind,
        });
    }
}

#[async_trait]
impl KeyValueStore for SqliteRepository {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv_entries WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value: String = row
            .try_get("value")
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO kv_entries (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            ",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        self.notify(key, StorageEventKind::Set);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;

        if result.rows_affected() > 0 {
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
        let result = match expected {
            None => {
                sqlx::query(
                    r"
                    INSERT INTO kv_entries (key, value, updated_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO NOTHING
                    ",
                )
                .bind(key)
                .bind(value)
                .bind(Utc::now())
                .execute(&self.pool)
                .await
            }
            Some(expected) => {
                sqlx::query(
                    r"
                    UPDATE kv_entries
                    SET value = ?2, updated_at = ?3
                    WHERE key = ?1 AND value = ?4
                    ",
                )
                .bind(key)
                .bind(value)
                .bind(Utc::now())
                .bind(expected)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        let written = result.rows_affected() == 1;
        if written {
            self.notify(key, StorageEventKind::Set);
        }
        Ok(written)
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
