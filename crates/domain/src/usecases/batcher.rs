//! Event batcher - per-category queues, similarity grouping and checkpointing

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::{
    model::{Batch, Event, Group},
    ports::{CheckpointStore, Clock},
    similarity::{SimilarityEngine, cosine_similarity},
};

/// Configuration for the event batcher
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Queue length that triggers processing
    pub batch_size: usize,
    /// Minimum similarity (exclusive) to join an existing group
    pub similarity_threshold: f64,
    /// Oldest pending event age that forces a partial batch
    pub max_batch_wait: Duration,
    /// How often the monitor sweeps for stale queues
    pub monitor_interval: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            similarity_threshold: 0.8,
            max_batch_wait: Duration::from_secs(60),
            monitor_interval: Duration::from_secs(5),
        }
    }
}

/// Accumulates events per category and emits grouped, checkpointed batches
pub struct EventBatcher<St>
where
    St: CheckpointStore + ?Sized,
{
    similarity: SimilarityEngine,
    checkpoints: Arc<St>,
    clock: Arc<dyn Clock>,
    config: BatcherConfig,
    pending: Mutex<HashMap<String, Vec<Event>>>,
}

impl<St> EventBatcher<St>
where
    St: CheckpointStore + ?Sized,
{
    pub fn new(
        similarity: SimilarityEngine,
        checkpoints: Arc<St>,
        clock: Arc<dyn Clock>,
        config: BatcherConfig,
    ) -> Self {
        Self {
            similarity,
            checkpoints,
            clock,
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Queue an event; returns the batch if this event filled the queue
    pub async fn add_event(&self, mut event: Event, category: &str) -> Option<Batch> {
        event.category = category.to_string();

        let queued = {
            let mut pending = self.pending();
            let queue = pending.entry(category.to_string()).or_default();
            queue.push(event);
            queue.len()
        };

        tracing::debug!(category = %category, queued, "Queued event");

        if queued >= self.config.batch_size.max(1) {
            self.process_batch(category).await
        } else {
            None
        }
    }

    /// Drain and group everything pending for `category`
    ///
    /// The drain happens before any await, so drained events are never seen by
    /// another caller. A failed checkpoint write is logged and the batch is
    /// still returned with `checkpointed = false`.
    pub async fn process_batch(&self, category: &str) -> Option<Batch> {
        let events = self.pending().remove(category).unwrap_or_default();
        if events.is_empty() {
            return None;
        }

        let event_count = events.len();
        let events = self.fill_embeddings(events).await;
        let groups = self.group_events(events);
        let similarity_score = self.aggregate_similarity(&groups);

        let checkpoint_id = Uuid::new_v4().to_string();
        let checkpointed = match self
            .checkpoints
            .create(&checkpoint_id, checkpoint_data(category, &groups))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    category = %category,
                    checkpoint_id = %checkpoint_id,
                    error = %e,
                    "Failed to save checkpoint, batch may need replay"
                );
                false
            }
        };

        tracing::info!(
            category = %category,
            checkpoint_id = %checkpoint_id,
            events = event_count,
            groups = groups.len(),
            similarity_score,
            "Processed batch"
        );

        Some(Batch {
            batch_id: format!("batch_{}_{}", category, checkpoint_id),
            checkpoint_id,
            category: category.to_string(),
            groups,
            similarity_score,
            checkpointed,
        })
    }

    /// One monitor sweep: force-process categories whose oldest event is stale
    pub async fn flush_stale(&self) -> Vec<Batch> {
        let now = self.clock.now();
        let mut stale: Vec<String> = self
            .pending()
            .iter()
            .filter(|(_, queue)| {
                queue
                    .first()
                    .is_some_and(|oldest| now - oldest.received_at > self.config.max_batch_wait)
            })
            .map(|(category, _)| category.clone())
            .collect();
        stale.sort();

        let mut batches = Vec::with_capacity(stale.len());
        for category in stale {
            tracing::info!(category = %category, "Forcing partial batch past max wait");
            if let Some(batch) = self.process_batch(&category).await {
                batches.push(batch);
            }
        }
        batches
    }

    /// Sweep for stale queues every `monitor_interval` until shutdown
    ///
    /// Batches go to `sink`. The loop only stops at its sleep, never while a
    /// batch is being processed, and also stops once the receiver is gone.
    pub async fn monitor_pending_batches(
        &self,
        sink: mpsc::Sender<Batch>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.config.monitor_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for batch in self.flush_stale().await {
                        if sink.send(batch).await.is_err() {
                            tracing::info!("Batch receiver dropped, stopping monitor");
                            return;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Batch monitor shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Queue lengths per category
    pub fn pending_counts(&self) -> HashMap<String, usize> {
        self.pending()
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(category, queue)| (category.clone(), queue.len()))
            .collect()
    }

    async fn fill_embeddings(&self, mut events: Vec<Event>) -> Vec<Event> {
        let missing: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if missing.is_empty() {
            return events;
        }

        let texts: Vec<String> = missing.iter().map(|&i| events[i].text()).collect();
        let vectors = self.similarity.embed(&texts).await;
        for (index, vector) in missing.into_iter().zip(vectors) {
            events[index].embedding = Some(vector);
        }
        events
    }

    /// Greedy single pass: join the most similar group leader above threshold
    fn group_events(&self, events: Vec<Event>) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();

        for event in events {
            let embedding = event.embedding.as_deref().unwrap_or_default();
            let mut best: Option<(usize, f64)> = None;

            for (index, group) in groups.iter().enumerate() {
                let leader = group.leader().embedding.as_deref().unwrap_or_default();
                let similarity = self.similarity.similarity(embedding, leader);
                if similarity > self.config.similarity_threshold
                    && best.is_none_or(|(_, top)| similarity > top)
                {
                    best = Some((index, similarity));
                }
            }

            match best {
                Some((index, _)) => groups[index].events.push(event),
                None => groups.push(Group::new(event)),
            }
        }

        groups
    }

    /// Mean of every within-group pairwise similarity, over groups of two or more
    fn aggregate_similarity(&self, groups: &[Group]) -> f64 {
        let mut total = 0.0;
        let mut pairs = 0usize;

        for group in groups.iter().filter(|g| g.len() > 1) {
            for (i, a) in group.events.iter().enumerate() {
                for b in &group.events[i + 1..] {
                    total += cosine_similarity(
                        a.embedding.as_deref().unwrap_or_default(),
                        b.embedding.as_deref().unwrap_or_default(),
                    );
                    pairs += 1;
                }
            }
        }

        if pairs == 0 { 0.0 } else { total / pairs as f64 }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, Vec<Event>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Checkpoint payload: the grouped events without their embeddings
fn checkpoint_data(category: &str, groups: &[Group]) -> Value {
    let groups: Vec<Vec<Value>> = groups
        .iter()
        .map(|group| {
            group
                .events
                .iter()
                .map(|event| {
                    json!({
                        "received_at": event.received_at.unix_timestamp(),
                        "fields": event.fields,
                    })
                })
                .collect()
        })
        .collect();

    json!({
        "category": category,
        "event_count": groups.iter().map(Vec::len).sum::<usize>(),
        "groups": groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Checkpoint, CheckpointStatus};
    use crate::ports::{CheckpointError, EmbedError, Embedder, ManualClock};
    use async_trait::async_trait;
    use time::OffsetDateTime;
    use time::macros::datetime;

    struct FakeCheckpointStore {
        fail: bool,
        created: Mutex<Vec<(String, Value)>>,
    }

    impl FakeCheckpointStore {
        fn new() -> Self {
            Self {
                fail: false,
                created: Mutex::new(vec![]),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                created: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl CheckpointStore for FakeCheckpointStore {
        async fn create(&self, id: &str, data: Value) -> Result<(), CheckpointError> {
            if self.fail {
                return Err(CheckpointError::Database("disk full".to_string()));
            }
            self.created.lock().unwrap().push((id.to_string(), data));
            Ok(())
        }

        async fn update(
            &self,
            _id: &str,
            _status: CheckpointStatus,
            _result: Option<Value>,
        ) -> Result<(), CheckpointError> {
            Ok(())
        }

        async fn get(&self, _id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
            Ok(None)
        }

        async fn list_pending(&self) -> Result<Vec<String>, CheckpointError> {
            Ok(self
                .created
                .lock()
                .unwrap()
                .iter()
                .map(|(id, _)| id.clone())
                .collect())
        }

        async fn prune(&self, _max_age: Duration) -> Result<usize, CheckpointError> {
            Ok(0)
        }
    }

    /// Embeds by looking the text up in a fixed table
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts
                .iter()
                .map(|t| self.table.get(t).cloned().unwrap_or_else(|| vec![0.0; 2]))
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::Api("503 Service Unavailable".to_string()))
        }
    }

    fn start() -> OffsetDateTime {
        datetime!(2024-01-15 12:00 UTC)
    }

    fn batcher_with(
        embedder: Arc<dyn Embedder>,
        dimensions: usize,
        store: Arc<FakeCheckpointStore>,
        clock: Arc<ManualClock>,
        config: BatcherConfig,
    ) -> EventBatcher<FakeCheckpointStore> {
        EventBatcher::new(
            SimilarityEngine::new(embedder, dimensions),
            store,
            clock,
            config,
        )
    }

    fn two_topic_embedder() -> Arc<dyn Embedder> {
        let table = [
            ("rates rise", vec![1.0, 0.0]),
            ("storm warning", vec![0.0, 1.0]),
            ("central bank hikes", vec![0.99, 0.1]),
            ("hurricane landfall", vec![0.1, 0.99]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Arc::new(TableEmbedder { table })
    }

    /// Unit vectors whose pairwise cosine similarity is exactly `c`
    fn equiangular(c: f32) -> Vec<Vec<f32>> {
        let (a, b) = (c.sqrt(), (1.0 - c).sqrt());
        vec![
            vec![a, b, 0.0, 0.0],
            vec![a, 0.0, b, 0.0],
            vec![a, 0.0, 0.0, b],
        ]
    }

    #[tokio::test]
    async fn test_full_queue_triggers_single_group_batch() {
        let store = Arc::new(FakeCheckpointStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let batcher = batcher_with(
            two_topic_embedder(),
            4,
            store.clone(),
            clock.clone(),
            BatcherConfig {
                batch_size: 3,
                ..Default::default()
            },
        );

        let mut vectors = equiangular(0.95).into_iter();
        let mut batch = None;
        for i in 0..3 {
            let event = Event::from_text(clock.now(), format!("markets fall {i}"))
                .with_embedding(vectors.next().unwrap());
            batch = batcher.add_event(event, "news").await;
            if i < 2 {
                assert!(batch.is_none());
            }
        }

        let batch = batch.expect("third event triggers processing");
        assert_eq!(batch.groups.len(), 1);
        assert_eq!(batch.groups[0].len(), 3);
        assert!((batch.similarity_score - 0.95).abs() < 1e-4);
        assert!(batch.checkpointed);
        assert_eq!(batch.batch_id, format!("batch_news_{}", batch.checkpoint_id));
        assert!(batch.groups[0].events.iter().all(|e| e.category == "news"));

        assert!(batcher.pending_counts().is_empty());
        let created = store.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, batch.checkpoint_id);
        assert_eq!(created[0].1["event_count"], 3);
    }

    #[tokio::test]
    async fn test_process_empty_category_returns_none() {
        let batcher = batcher_with(
            two_topic_embedder(),
            2,
            Arc::new(FakeCheckpointStore::new()),
            Arc::new(ManualClock::new(start())),
            BatcherConfig::default(),
        );

        assert!(batcher.process_batch("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_grouping_is_deterministic() {
        let texts = [
            "rates rise",
            "storm warning",
            "central bank hikes",
            "hurricane landfall",
        ];

        let mut runs = Vec::new();
        for _ in 0..2 {
            let batcher = batcher_with(
                two_topic_embedder(),
                2,
                Arc::new(FakeCheckpointStore::new()),
                Arc::new(ManualClock::new(start())),
                BatcherConfig::default(),
            );
            for text in texts {
                batcher.add_event(Event::from_text(start(), text), "news").await;
            }
            let batch = batcher.process_batch("news").await.unwrap();
            let membership: Vec<Vec<String>> = batch
                .groups
                .iter()
                .map(|g| g.events.iter().map(Event::text).collect())
                .collect();
            runs.push(membership);
        }

        assert_eq!(runs[0], runs[1]);
        assert_eq!(
            runs[0],
            vec![
                vec!["rates rise".to_string(), "central bank hikes".to_string()],
                vec!["storm warning".to_string(), "hurricane landfall".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_joins_most_similar_group() {
        let batcher = batcher_with(
            two_topic_embedder(),
            2,
            Arc::new(FakeCheckpointStore::new()),
            Arc::new(ManualClock::new(start())),
            BatcherConfig {
                similarity_threshold: 0.5,
                ..Default::default()
            },
        );

        let a = Event::from_text(start(), "a").with_embedding(vec![1.0, 0.0]);
        let b = Event::from_text(start(), "b").with_embedding(vec![0.0, 1.0]);
        // above threshold for both leaders, closer to b
        let c = Event::from_text(start(), "c").with_embedding(vec![0.6, 0.8]);
        for event in [a, b, c] {
            batcher.add_event(event, "news").await;
        }

        let batch = batcher.process_batch("news").await.unwrap();
        assert_eq!(batch.groups.len(), 2);
        assert_eq!(batch.groups[0].len(), 1);
        assert_eq!(batch.groups[1].events[1].text(), "c");
        assert!((batch.similarity_score - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_singletons() {
        let batcher = batcher_with(
            Arc::new(FailingEmbedder),
            8,
            Arc::new(FakeCheckpointStore::new()),
            Arc::new(ManualClock::new(start())),
            BatcherConfig::default(),
        );

        for text in ["one", "one", "one"] {
            batcher.add_event(Event::from_text(start(), text), "news").await;
        }

        let batch = batcher.process_batch("news").await.unwrap();
        assert_eq!(batch.groups.len(), 3);
        assert_eq!(batch.similarity_score, 0.0);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_still_returns_batch() {
        let batcher = batcher_with(
            two_topic_embedder(),
            2,
            Arc::new(FakeCheckpointStore::failing()),
            Arc::new(ManualClock::new(start())),
            BatcherConfig::default(),
        );

        batcher
            .add_event(Event::from_text(start(), "rates rise"), "news")
            .await;
        let batch = batcher.process_batch("news").await.unwrap();

        assert!(!batch.checkpointed);
        assert_eq!(batch.event_count(), 1);
        assert!(batcher.pending_counts().is_empty());
    }

    #[tokio::test]
    async fn test_flush_stale_forces_partial_batch() {
        let clock = Arc::new(ManualClock::new(start()));
        let batcher = batcher_with(
            two_topic_embedder(),
            2,
            Arc::new(FakeCheckpointStore::new()),
            clock.clone(),
            BatcherConfig {
                batch_size: 5,
                max_batch_wait: Duration::from_secs(1),
                ..Default::default()
            },
        );

        batcher
            .add_event(Event::from_text(clock.now(), "rates rise"), "news")
            .await;
        batcher
            .add_event(Event::from_text(clock.now(), "storm warning"), "weather")
            .await;
        assert!(batcher.flush_stale().await.is_empty());

        clock.advance(Duration::from_secs(2));
        batcher
            .add_event(Event::from_text(clock.now(), "hurricane landfall"), "alerts")
            .await;

        let batches = batcher.flush_stale().await;
        let categories: Vec<&str> = batches.iter().map(|b| b.category.as_str()).collect();
        assert_eq!(categories, vec!["news", "weather"]);
        assert_eq!(batcher.pending_counts().get("alerts"), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_hands_batches_to_sink_and_stops() {
        let clock = Arc::new(ManualClock::new(start()));
        let batcher = batcher_with(
            two_topic_embedder(),
            2,
            Arc::new(FakeCheckpointStore::new()),
            clock.clone(),
            BatcherConfig {
                max_batch_wait: Duration::from_secs(1),
                ..Default::default()
            },
        );

        batcher
            .add_event(Event::from_text(clock.now(), "rates rise"), "news")
            .await;
        clock.advance(Duration::from_secs(2));

        let (tx, mut rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = watch::channel(false);

        let receive = async {
            let batch = rx.recv().await.expect("monitor sends stale batch");
            stop_tx.send(true).unwrap();
            batch
        };
        let ((), batch) = tokio::join!(batcher.monitor_pending_batches(tx, stop_rx), receive);

        assert_eq!(batch.category, "news");
        assert!(batcher.pending_counts().is_empty());
    }
}
