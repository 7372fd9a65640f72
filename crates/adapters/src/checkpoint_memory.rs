//! In-memory checkpoint store for testing and offline mode

use async_trait::async_trait;
use herald_domain::{
    Checkpoint, CheckpointError, CheckpointStatus, CheckpointStore, Clock, CursorStore,
    SystemClock, prune_cutoff,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

struct Entry {
    seq: u64,
    checkpoint: Checkpoint,
}

#[derive(Default)]
struct Entries {
    next_seq: u64,
    by_id: HashMap<String, Entry>,
    cursors: HashMap<String, String>,
}

/// In-memory checkpoint store implementation
pub struct InMemoryCheckpointStore {
    entries: RwLock<Entries>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.by_id.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn create(&self, id: &str, data: Value) -> Result<(), CheckpointError> {
        let now = self.clock.now();
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CheckpointError::Database(e.to_string()))?;

        if entries.by_id.contains_key(id) {
            return Err(CheckpointError::AlreadyExists(id.to_string()));
        }

        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.by_id.insert(
            id.to_string(),
            Entry {
                seq,
                checkpoint: Checkpoint {
                    id: id.to_string(),
                    data,
                    status: CheckpointStatus::Created,
                    created_at: now,
                    last_updated: now,
                    result: None,
                },
            },
        );
        Ok(())
    }

    async fn update(
        &self,
        id: &str,
        status: CheckpointStatus,
        result: Option<Value>,
    ) -> Result<(), CheckpointError> {
        let now = self.clock.now();
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CheckpointError::Database(e.to_string()))?;

        let entry = entries
            .by_id
            .get_mut(id)
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))?;
        let checkpoint = &mut entry.checkpoint;

        if !checkpoint.status.can_transition_to(status) {
            return Err(CheckpointError::InvalidTransition {
                id: id.to_string(),
                from: checkpoint.status,
                to: status,
            });
        }

        checkpoint.status = status;
        checkpoint.last_updated = now;
        if result.is_some() {
            checkpoint.result = result;
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| CheckpointError::Database(e.to_string()))?;
        Ok(entries.by_id.get(id).map(|e| e.checkpoint.clone()))
    }

    async fn list_pending(&self) -> Result<Vec<String>, CheckpointError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| CheckpointError::Database(e.to_string()))?;

        let mut pending: Vec<&Entry> = entries
            .by_id
            .values()
            .filter(|e| e.checkpoint.status.is_pending())
            .collect();
        pending.sort_by_key(|e| (e.checkpoint.created_at, e.seq));

        Ok(pending.into_iter().map(|e| e.checkpoint.id.clone()).collect())
    }

    async fn prune(&self, max_age: Duration) -> Result<usize, CheckpointError> {
        let Some(cutoff) = prune_cutoff(self.clock.now(), max_age) else {
            return Ok(0);
        };
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CheckpointError::Database(e.to_string()))?;

        let before = entries.by_id.len();
        entries
            .by_id
            .retain(|_, e| e.checkpoint.created_at >= cutoff);
        Ok(before - entries.by_id.len())
    }
}

#[async_trait]
impl CursorStore for InMemoryCheckpointStore {
    async fn load_cursor(&self, name: &str) -> Result<Option<String>, CheckpointError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| CheckpointError::Database(e.to_string()))?;
        Ok(entries.cursors.get(name).cloned())
    }

    async fn save_cursor(&self, name: &str, value: &str) -> Result<(), CheckpointError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CheckpointError::Database(e.to_string()))?;
        entries.cursors.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_domain::ManualClock;
    use serde_json::json;
    use time::macros::datetime;

    fn store() -> (InMemoryCheckpointStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(datetime!(2024-01-15 12:00 UTC)));
        (InMemoryCheckpointStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_checkpoint_lifecycle() {
        let (store, clock) = store();

        store.create("cp1", json!({"category": "news"})).await.unwrap();
        clock.advance(Duration::from_secs(5));
        store
            .update("cp1", CheckpointStatus::Processing, None)
            .await
            .unwrap();
        store
            .update("cp1", CheckpointStatus::Completed, Some(json!({"receipts": ["1"]})))
            .await
            .unwrap();

        let checkpoint = store.get("cp1").await.unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Completed);
        assert_eq!(checkpoint.result, Some(json!({"receipts": ["1"]})));
        assert_eq!(checkpoint.data["category"], "news");
        assert!(checkpoint.last_updated > checkpoint.created_at);

        let err = store
            .update("cp1", CheckpointStatus::Processing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_create_existing_id_fails() {
        let (store, _) = store();
        store.create("cp1", json!({})).await.unwrap();
        store
            .update("cp1", CheckpointStatus::Processing, None)
            .await
            .unwrap();

        let err = store.create("cp1", json!({})).await.unwrap_err();
        assert!(matches!(err, CheckpointError::AlreadyExists(_)));
        assert_eq!(
            store.get("cp1").await.unwrap().unwrap().status,
            CheckpointStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_create_over_completed_id_fails() {
        let (store, _) = store();
        store.create("cp1", json!({"events": 2})).await.unwrap();
        store
            .update("cp1", CheckpointStatus::Processing, None)
            .await
            .unwrap();
        store
            .update("cp1", CheckpointStatus::Completed, Some(json!({"receipts": ["9"]})))
            .await
            .unwrap();

        let err = store.create("cp1", json!({})).await.unwrap_err();

        assert!(matches!(err, CheckpointError::AlreadyExists(_)));
        let checkpoint = store.get("cp1").await.unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Completed);
        assert_eq!(checkpoint.data, json!({"events": 2}));
        assert_eq!(checkpoint.result, Some(json!({"receipts": ["9"]})));
        assert!(store.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_id() {
        let (store, _) = store();
        let err = store
            .update("missing", CheckpointStatus::Processing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_pending_oldest_first() {
        let (store, clock) = store();
        store.create("b", json!({})).await.unwrap();
        store.create("a", json!({})).await.unwrap();
        clock.advance(Duration::from_secs(1));
        store.create("c", json!({})).await.unwrap();
        store
            .update("a", CheckpointStatus::Processing, None)
            .await
            .unwrap();
        store
            .update("c", CheckpointStatus::Processing, None)
            .await
            .unwrap();
        store
            .update("c", CheckpointStatus::Failed, None)
            .await
            .unwrap();

        assert_eq!(store.list_pending().await.unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_prune_by_age() {
        let (store, clock) = store();
        store.create("old", json!({})).await.unwrap();
        clock.advance(Duration::from_secs(23 * 3600));
        store.create("new", json!({})).await.unwrap();
        clock.advance(Duration::from_secs(2 * 3600));

        let removed = store.prune(Duration::from_secs(24 * 3600)).await.unwrap();

        assert_eq!(removed, 1);
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("new").await.unwrap().is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_prune_with_unbounded_age_keeps_everything() {
        let (store, _) = store();
        store.create("cp1", json!({})).await.unwrap();

        assert_eq!(store.prune(Duration::MAX).await.unwrap(), 0);
        assert_eq!(
            store
                .prune(Duration::from_secs(u64::MAX / 4))
                .await
                .unwrap(),
            0
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_cursor_roundtrip() {
        let (store, _) = store();
        assert_eq!(store.load_cursor("mentions_since_id").await.unwrap(), None);

        store.save_cursor("mentions_since_id", "100").await.unwrap();
        store.save_cursor("mentions_since_id", "105").await.unwrap();

        assert_eq!(
            store.load_cursor("mentions_since_id").await.unwrap().as_deref(),
            Some("105")
        );
        assert!(store.is_empty());
    }
}
