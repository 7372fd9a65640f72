//! SQLite checkpoint store implementation

use async_trait::async_trait;
use herald_domain::{
    Checkpoint, CheckpointError, CheckpointStatus, CheckpointStore, Clock, CursorStore,
    SystemClock, prune_cutoff,
};
use serde_json::Value;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

type CheckpointRow = (String, String, String, String, String, Option<String>);

/// SQLite-backed checkpoint store
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteCheckpointStore {
    /// Open (or create) the database file and apply migrations
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CheckpointError::Database(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(db_error)?;

        let store = Self {
            pool,
            clock: Arc::new(SystemClock),
        };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub async fn in_memory() -> Result<Self, CheckpointError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_error)?;

        let store = Self {
            pool,
            clock: Arc::new(SystemClock),
        };
        store.run_migrations().await?;

        Ok(store)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn run_migrations(&self) -> Result<(), CheckpointError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                last_updated TEXT NOT NULL,
                result TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_checkpoints_status_created
            ON checkpoints(status, created_at_ms)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cursors (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn create(&self, id: &str, data: Value) -> Result<(), CheckpointError> {
        let now = self.clock.now();
        let now_str = format_time(now)?;
        let data = serde_json::to_string(&data)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO checkpoints (id, data, status, created_at, created_at_ms, last_updated, result)
            VALUES (?, ?, ?, ?, ?, ?, NULL)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&data)
        .bind(CheckpointStatus::Created.as_str())
        .bind(&now_str)
        .bind(unix_millis(now))
        .bind(&now_str)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if inserted.rows_affected() == 0 {
            return Err(CheckpointError::AlreadyExists(id.to_string()));
        }
        Ok(())
    }

    async fn update(
        &self,
        id: &str,
        status: CheckpointStatus,
        result: Option<Value>,
    ) -> Result<(), CheckpointError> {
        let now_str = format_time(self.clock.now())?;
        let result = result
            .map(|value| serde_json::to_string(&value))
            .transpose()
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let current: Option<(String,)> = sqlx::query_as("SELECT status FROM checkpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?;

        let Some((current,)) = current else {
            return Err(CheckpointError::NotFound(id.to_string()));
        };
        let current = parse_status(&current)?;

        if !current.can_transition_to(status) {
            return Err(CheckpointError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: status,
            });
        }

        sqlx::query(
            r#"
            UPDATE checkpoints
            SET status = ?, last_updated = ?, result = COALESCE(?, result)
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(&now_str)
        .bind(&result)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            r#"
            SELECT id, data, status, created_at, last_updated, result
            FROM checkpoints
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(checkpoint_from_row).transpose()
    }

    async fn list_pending(&self) -> Result<Vec<String>, CheckpointError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM checkpoints
            WHERE status IN (?, ?)
            ORDER BY created_at_ms, rowid
            "#,
        )
        .bind(CheckpointStatus::Created.as_str())
        .bind(CheckpointStatus::Processing.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn prune(&self, max_age: Duration) -> Result<usize, CheckpointError> {
        let Some(cutoff) = prune_cutoff(self.clock.now(), max_age) else {
            return Ok(0);
        };
        let cutoff = unix_millis(cutoff);

        let deleted = sqlx::query("DELETE FROM checkpoints WHERE created_at_ms < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        let removed = usize::try_from(deleted.rows_affected()).unwrap_or(usize::MAX);
        if removed > 0 {
            tracing::info!(removed, "Pruned old checkpoints");
        }
        Ok(removed)
    }
}

#[async_trait]
impl CursorStore for SqliteCheckpointStore {
    async fn load_cursor(&self, name: &str) -> Result<Option<String>, CheckpointError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM cursors WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.map(|(value,)| value))
    }

    async fn save_cursor(&self, name: &str, value: &str) -> Result<(), CheckpointError> {
        let now_str = format_time(self.clock.now())?;

        sqlx::query(
            r#"
            INSERT INTO cursors (name, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(value)
        .bind(&now_str)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }
}

fn db_error(error: sqlx::Error) -> CheckpointError {
    CheckpointError::Database(error.to_string())
}

fn format_time(at: OffsetDateTime) -> Result<String, CheckpointError> {
    at.format(&Rfc3339)
        .map_err(|e| CheckpointError::Serialization(e.to_string()))
}

fn parse_time(value: &str) -> Result<OffsetDateTime, CheckpointError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| CheckpointError::Serialization(e.to_string()))
}

fn parse_status(value: &str) -> Result<CheckpointStatus, CheckpointError> {
    CheckpointStatus::parse(value)
        .ok_or_else(|| CheckpointError::Serialization(format!("Unknown status: {}", value)))
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

fn checkpoint_from_row(row: CheckpointRow) -> Result<Checkpoint, CheckpointError> {
    let (id, data, status, created_at, last_updated, result) = row;
    let parse_json = |text: &str| {
        serde_json::from_str::<Value>(text).map_err(|e| CheckpointError::Serialization(e.to_string()))
    };

    Ok(Checkpoint {
        data: parse_json(&data)?,
        status: parse_status(&status)?,
        created_at: parse_time(&created_at)?,
        last_updated: parse_time(&last_updated)?,
        result: result.as_deref().map(parse_json).transpose()?,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_domain::ManualClock;
    use serde_json::json;
    use tempfile::TempDir;
    use time::macros::datetime;

    async fn store() -> (SqliteCheckpointStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(datetime!(2024-01-15 12:00 UTC)));
        let store = SqliteCheckpointStore::in_memory()
            .await
            .unwrap()
            .with_clock(clock.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn test_checkpoint_lifecycle() {
        let (store, clock) = store().await;

        store
            .create("cp1", json!({"category": "news", "event_count": 2}))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(10));
        store
            .update("cp1", CheckpointStatus::Processing, None)
            .await
            .unwrap();
        store
            .update("cp1", CheckpointStatus::Failed, Some(json!({"error": "503"})))
            .await
            .unwrap();

        let checkpoint = store.get("cp1").await.unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Failed);
        assert_eq!(checkpoint.data["event_count"], 2);
        assert_eq!(checkpoint.result, Some(json!({"error": "503"})));
        assert_eq!(checkpoint.created_at, datetime!(2024-01-15 12:00 UTC));
        assert_eq!(checkpoint.last_updated, datetime!(2024-01-15 12:00:10 UTC));

        let err = store
            .update("cp1", CheckpointStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_create_existing_id_fails() {
        let (store, _) = store().await;
        store.create("cp1", json!({"v": 1})).await.unwrap();

        let err = store.create("cp1", json!({"v": 2})).await.unwrap_err();

        assert!(matches!(err, CheckpointError::AlreadyExists(_)));
        assert_eq!(store.get("cp1").await.unwrap().unwrap().data["v"], 1);
    }

    #[tokio::test]
    async fn test_create_over_completed_id_fails() {
        let (store, _) = store().await;
        store.create("cp1", json!({"v": 1})).await.unwrap();
        store
            .update("cp1", CheckpointStatus::Processing, None)
            .await
            .unwrap();
        store
            .update("cp1", CheckpointStatus::Completed, Some(json!({"receipts": ["9"]})))
            .await
            .unwrap();

        let err = store.create("cp1", json!({"v": 2})).await.unwrap_err();

        assert!(matches!(err, CheckpointError::AlreadyExists(_)));
        let checkpoint = store.get("cp1").await.unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Completed);
        assert_eq!(checkpoint.data["v"], 1);
        assert_eq!(checkpoint.result, Some(json!({"receipts": ["9"]})));
        assert!(store.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_and_same_state() {
        let (store, _) = store().await;
        assert!(matches!(
            store.update("missing", CheckpointStatus::Processing, None).await,
            Err(CheckpointError::NotFound(_))
        ));

        store.create("cp1", json!({})).await.unwrap();
        assert!(matches!(
            store.update("cp1", CheckpointStatus::Created, None).await,
            Err(CheckpointError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_pending_and_prune() {
        let (store, clock) = store().await;
        store.create("first", json!({})).await.unwrap();
        clock.advance(Duration::from_secs(60));
        store.create("second", json!({})).await.unwrap();
        store.create("done", json!({})).await.unwrap();
        store
            .update("done", CheckpointStatus::Processing, None)
            .await
            .unwrap();
        store
            .update("done", CheckpointStatus::Completed, None)
            .await
            .unwrap();

        assert_eq!(store.list_pending().await.unwrap(), vec!["first", "second"]);

        clock.advance(Duration::from_secs(24 * 3600 - 30));
        let removed = store.prune(Duration::from_secs(24 * 3600)).await.unwrap();

        assert_eq!(removed, 1);
        assert_eq!(store.list_pending().await.unwrap(), vec!["second"]);
    }

    #[tokio::test]
    async fn test_prune_with_unbounded_age_keeps_everything() {
        let (store, _) = store().await;
        store.create("cp1", json!({})).await.unwrap();

        assert_eq!(store.prune(Duration::MAX).await.unwrap(), 0);
        assert_eq!(
            store
                .prune(Duration::from_secs(u64::MAX / 4))
                .await
                .unwrap(),
            0
        );
        assert_eq!(store.list_pending().await.unwrap(), vec!["cp1"]);
    }

    #[tokio::test]
    async fn test_cursor_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("herald.db");

        {
            let store = SqliteCheckpointStore::new(&path).await.unwrap();
            assert_eq!(store.load_cursor("mentions_since_id").await.unwrap(), None);
            store.save_cursor("mentions_since_id", "100").await.unwrap();
            store.save_cursor("mentions_since_id", "105").await.unwrap();
        }

        let reopened = SqliteCheckpointStore::new(&path).await.unwrap();
        assert_eq!(
            reopened
                .load_cursor("mentions_since_id")
                .await
                .unwrap()
                .as_deref(),
            Some("105")
        );
        assert!(reopened.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("herald.db");

        {
            let store = SqliteCheckpointStore::new(&path).await.unwrap();
            store.create("cp1", json!({"category": "alerts"})).await.unwrap();
        }

        let reopened = SqliteCheckpointStore::new(&path).await.unwrap();
        assert_eq!(reopened.list_pending().await.unwrap(), vec!["cp1"]);
    }
}
