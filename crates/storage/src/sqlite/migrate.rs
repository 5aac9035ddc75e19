use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use super::SqliteInitError;

struct Migration {
    version: i64,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    statements: &[r"
        CREATE TABLE IF NOT EXISTS kv_entries (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    "],
}];

/// Apply every migration not yet recorded in `schema_migrations`, each in its
/// own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );
        ",
    )
    .execute(pool)
    .await?;

    let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    let current = current.unwrap_or(0);

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)
             ON CONFLICT(version) DO NOTHING",
        )
        .bind(migration.version)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        debug!(version = migration.version, "applied sqlite migration");
    }

    Ok(())
}
