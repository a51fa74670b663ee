//! SQLite host directory.

use super::{HostDirectory, HostRecord};
use crate::error::StorageError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-backed [`HostDirectory`].
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteHostStore {
    pool: SqlitePool,
}

impl SqliteHostStore {
    /// Open (or create) the directory database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let url = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory directory (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?;

        // One connection: every pooled connection would get its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hosts (
                host_id TEXT PRIMARY KEY,
                author_id TEXT NOT NULL,
                signing_public_key TEXT,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of registered hosts.
    pub async fn host_count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM hosts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl HostDirectory for SqliteHostStore {
    async fn lookup_host(&self, host_id: &str) -> Result<Option<HostRecord>, StorageError> {
        let row = sqlx::query_as::<_, HostRow>(
            "SELECT host_id, author_id, signing_public_key FROM hosts WHERE host_id = ?1",
        )
        .bind(host_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(HostRecord::from))
    }

    async fn register_host(&self, record: &HostRecord) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO hosts (host_id, author_id, signing_public_key)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(host_id) DO NOTHING
            "#,
        )
        .bind(&record.host_id)
        .bind(&record.author_id)
        .bind(&record.signing_public_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::DuplicateHost {
                host_id: record.host_id.clone(),
            });
        }
        tracing::info!("Registered host {}", record.host_id);
        Ok(())
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct HostRow {
    host_id: String,
    author_id: String,
    signing_public_key: Option<String>,
}

impl From<HostRow> for HostRecord {
    fn from(row: HostRow) -> Self {
        Self {
            host_id: row.host_id,
            author_id: row.author_id,
            signing_public_key: row.signing_public_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(host_id: &str) -> HostRecord {
        HostRecord {
            host_id: host_id.to_string(),
            author_id: format!("{host_id}-author"),
            signing_public_key: Some("a2V5".to_string()),
        }
    }

    #[tokio::test]
    async fn register_then_lookup() {
        let store = SqliteHostStore::in_memory().await.unwrap();
        store.register_host(&record("host-123")).await.unwrap();

        let found = store.lookup_host("host-123").await.unwrap().unwrap();
        assert_eq!(found, record("host-123"));
        assert_eq!(store.host_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_host_is_none() {
        let store = SqliteHostStore::in_memory().await.unwrap();
        assert!(store.lookup_host("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let store = SqliteHostStore::in_memory().await.unwrap();
        store.register_host(&record("host-1")).await.unwrap();

        let err = store.register_host(&record("host-1")).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateHost { host_id } if host_id == "host-1"));
    }

    #[tokio::test]
    async fn host_without_signing_key() {
        let store = SqliteHostStore::in_memory().await.unwrap();
        let mut rec = record("host-2");
        rec.signing_public_key = None;
        store.register_host(&rec).await.unwrap();

        let found = store.lookup_host("host-2").await.unwrap().unwrap();
        assert!(found.signing_public_key.is_none());
    }

    #[tokio::test]
    async fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.db");
        {
            let store = SqliteHostStore::new(&path).await.unwrap();
            store.register_host(&record("host-9")).await.unwrap();
        }
        let store = SqliteHostStore::new(&path).await.unwrap();
        assert!(store.lookup_host("host-9").await.unwrap().is_some());
    }
}
