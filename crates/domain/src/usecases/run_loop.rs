//! Run loop use case - polls mentions, batches them, and publishes composed content

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use regex::Regex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant, sleep_until};

use crate::{
    model::{Batch, CheckpointStatus, Event, Mention, Receipt},
    ports::{CheckpointStore, Clock, Composer, CursorStore, Platform},
    text::{MAX_POST_CHARS, chunk_content},
    usecases::{
        batcher::EventBatcher,
        platform_client::{PlatformClient, PostingError},
    },
};

/// Configuration for the run loop
#[derive(Debug, Clone)]
pub struct RunLoopConfig {
    /// Batcher category that mentions are queued under
    pub category: String,
    /// How far back the first mentions poll reaches
    pub mention_window_minutes: u32,
    /// Regex patterns for mentions to ignore
    pub ignore_patterns: Vec<String>,
    /// Character limit used when chunking composed text
    pub max_chars: usize,
    /// Delay between polls while operational
    pub poll_interval: Duration,
    /// Delay between polls while the governor is halted
    pub halted_poll_interval: Duration,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            category: "mentions".to_string(),
            mention_window_minutes: 5,
            ignore_patterns: vec![],
            max_chars: MAX_POST_CHARS,
            poll_interval: Duration::from_secs(60),
            halted_poll_interval: Duration::from_secs(3600),
        }
    }
}

/// What happened to one batch
#[derive(Debug, Clone, PartialEq)]
pub enum PublishResult {
    Published {
        receipts: Vec<Receipt>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
        retryable: bool,
        /// Posts that went out before the failure
        receipts: Vec<Receipt>,
    },
    /// Held while the governor is halted; the checkpoint stays pending
    Deferred {
        reason: String,
    },
}

/// Errors from the run loop
#[derive(Debug, thiserror::Error)]
pub enum RunLoopError {
    #[error("Posting halted: {0}")]
    Halted(String),
    #[error("Mention poll failed: {0}")]
    Poll(#[from] PostingError),
}

/// Batch waiting for the governor to resume
struct DeferredBatch {
    batch: Batch,
    /// Checkpoint already moved to `processing`
    started: bool,
}

/// Run loop orchestrator
pub struct RunLoop<P, St>
where
    P: Platform + ?Sized,
    St: CheckpointStore + ?Sized,
{
    client: Arc<PlatformClient<P>>,
    batcher: Arc<EventBatcher<St>>,
    checkpoints: Arc<St>,
    composer: Arc<dyn Composer>,
    clock: Arc<dyn Clock>,
    config: RunLoopConfig,
    ignore_patterns: Vec<Regex>,
    cursors: Option<Arc<dyn CursorStore>>,
    deferred: Mutex<VecDeque<DeferredBatch>>,
}

impl<P, St> RunLoop<P, St>
where
    P: Platform + ?Sized,
    St: CheckpointStore + ?Sized,
{
    pub fn new(
        client: Arc<PlatformClient<P>>,
        batcher: Arc<EventBatcher<St>>,
        checkpoints: Arc<St>,
        composer: Arc<dyn Composer>,
        clock: Arc<dyn Clock>,
        config: RunLoopConfig,
    ) -> Self {
        let ignore_patterns = compile_ignore_patterns(&config.ignore_patterns);
        Self {
            client,
            batcher,
            checkpoints,
            composer,
            clock,
            config,
            ignore_patterns,
            cursors: None,
            deferred: Mutex::new(VecDeque::new()),
        }
    }

    /// Persist the mentions cursor in `store` after every poll that advances it
    pub fn with_cursor_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.cursors = Some(store);
        self
    }

    /// Load the persisted mentions cursor into the client
    ///
    /// Returns the restored cursor. Load failures are logged and leave the
    /// client on its time-window fallback.
    pub async fn restore_cursor(&self) -> Option<String> {
        let store = self.cursors.as_ref()?;
        match store.load_cursor(&self.cursor_name()).await {
            Ok(Some(since_id)) => {
                tracing::info!(since_id = %since_id, "Restored mentions cursor");
                self.client.restore_cursor(Some(since_id.clone()));
                Some(since_id)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load mentions cursor");
                None
            }
        }
    }

    /// Run a single poll cycle, returning results keyed by batch ID
    ///
    /// Batches held during an earlier halt are published first.
    pub async fn poll_once(&self) -> Result<Vec<(String, PublishResult)>, RunLoopError> {
        if let Some(reason) = self.halt_reason() {
            return Err(RunLoopError::Halted(reason));
        }

        let mut results = self.publish_deferred().await;

        let previous_cursor = self.client.cursor();
        let mentions = self
            .client
            .poll_mentions(self.config.mention_window_minutes)
            .await?;
        self.save_cursor(previous_cursor).await;

        if mentions.is_empty() {
            tracing::debug!("No new mentions");
            return Ok(results);
        }

        let fetched = mentions.len();
        let mentions = self.filter_mentions(mentions);
        tracing::info!(
            fetched,
            kept = mentions.len(),
            category = %self.config.category,
            "Queuing mentions"
        );

        for mention in mentions {
            let event = self.mention_event(mention);
            if let Some(batch) = self.batcher.add_event(event, &self.config.category).await {
                let result = self.publish_batch(&batch).await;
                results.push((batch.batch_id, result));
            }
        }

        Ok(results)
    }

    /// Compose, chunk and publish one batch, recording the outcome on its checkpoint
    ///
    /// While the governor is halted the batch is held instead and its
    /// checkpoint stays `created`.
    pub async fn publish_batch(&self, batch: &Batch) -> PublishResult {
        if let Some(reason) = self.halt_reason() {
            return self.defer(batch.clone(), false, reason);
        }

        self.mark(batch, CheckpointStatus::Processing, None).await;
        self.deliver(batch).await
    }

    /// Publish batches held during a halt, oldest first
    ///
    /// Stops as soon as the governor halts again.
    pub async fn publish_deferred(&self) -> Vec<(String, PublishResult)> {
        let mut results = Vec::new();
        while self.halt_reason().is_none() {
            let Some(next) = self.deferred_queue().pop_front() else {
                break;
            };
            tracing::info!(batch_id = %next.batch.batch_id, "Publishing held batch");

            let result = if next.started {
                self.deliver(&next.batch).await
            } else {
                self.publish_batch(&next.batch).await
            };

            if matches!(result, PublishResult::Deferred { .. }) {
                // Re-held at the back; keep it at the head of the line
                let mut queue = self.deferred_queue();
                if let Some(held) = queue.pop_back() {
                    queue.push_front(held);
                }
                break;
            }
            results.push((next.batch.batch_id.clone(), result));
        }
        results
    }

    /// Batches waiting for the governor to resume
    pub fn deferred_count(&self) -> usize {
        self.deferred_queue().len()
    }

    async fn deliver(&self, batch: &Batch) -> PublishResult {
        let text = match self.composer.compose(batch).await {
            Ok(Some(text)) => text,
            Ok(None) => return self.skip(batch, "Composer produced no content").await,
            Err(e) => {
                let error = format!("Composition failed: {}", e);
                self.mark(batch, CheckpointStatus::Failed, Some(json!({ "error": error })))
                    .await;
                return PublishResult::Failed {
                    error,
                    retryable: false,
                    receipts: vec![],
                };
            }
        };

        let chunks = chunk_content(&text, self.config.max_chars);
        let (receipts, error) = match chunks.as_slice() {
            [] => return self.skip(batch, "Composed content was empty").await,
            [single] => match self.client.post(single).await {
                Ok(receipt) => (vec![receipt], None),
                Err(e) => (vec![], Some(e)),
            },
            _ => {
                let outcome = self.client.post_thread(&chunks).await;
                (outcome.receipts, outcome.error)
            }
        };

        if let Some(PostingError::Halted(reason)) = &error {
            if receipts.is_empty() {
                return self.defer(batch.clone(), true, reason.clone());
            }
        }

        let posted: Vec<&str> = receipts.iter().map(|r| r.id.as_str()).collect();
        match error {
            None => {
                tracing::info!(
                    batch_id = %batch.batch_id,
                    posts = receipts.len(),
                    "Published batch"
                );
                self.mark(
                    batch,
                    CheckpointStatus::Completed,
                    Some(json!({ "receipts": posted })),
                )
                .await;
                PublishResult::Published { receipts }
            }
            Some(e) => {
                tracing::error!(
                    batch_id = %batch.batch_id,
                    posted = receipts.len(),
                    error = %e,
                    "Failed to publish batch"
                );
                self.mark(
                    batch,
                    CheckpointStatus::Failed,
                    Some(json!({
                        "error": e.to_string(),
                        "retryable": e.is_retryable(),
                        "receipts": posted,
                    })),
                )
                .await;
                PublishResult::Failed {
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                    receipts,
                }
            }
        }
    }

    /// Poll, batch and publish until `shutdown` flips to true
    ///
    /// The batcher monitor runs alongside and its stale batches are published
    /// between polls. While halted, polls back off to `halted_poll_interval`.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let (sink, mut stale_batches) = mpsc::channel::<Batch>(16);
        let monitor = self
            .batcher
            .monitor_pending_batches(sink, shutdown.clone());

        let mut shutdown = shutdown;
        let worker = async move {
            let mut next_poll = Instant::now();
            loop {
                if *shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    _ = sleep_until(next_poll) => {
                        let delay = match self.poll_once().await {
                            Ok(results) => {
                                if !results.is_empty() {
                                    tracing::info!(batches = results.len(), "Poll cycle complete");
                                }
                                self.config.poll_interval
                            }
                            Err(RunLoopError::Halted(reason)) => {
                                tracing::warn!(
                                    reason = %reason,
                                    retry_in_secs = self.config.halted_poll_interval.as_secs(),
                                    "Governor halted, backing off"
                                );
                                self.config.halted_poll_interval
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Poll cycle failed");
                                self.config.poll_interval
                            }
                        };
                        next_poll = Instant::now() + delay;
                    }
                    Some(batch) = stale_batches.recv() => {
                        let result = self.publish_batch(&batch).await;
                        tracing::debug!(batch_id = %batch.batch_id, result = ?result, "Published stale batch");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            let pending = self.batcher.pending_counts();
            if !pending.is_empty() {
                tracing::warn!(pending = ?pending, "Shutting down with unbatched events");
            }
            let held = self.deferred_count();
            if held > 0 {
                tracing::warn!(held, "Shutting down with batches held by a halt, checkpoints stay pending");
            }
        };

        tokio::join!(monitor, worker);
        tracing::info!("Run loop stopped");
    }

    fn halt_reason(&self) -> Option<String> {
        let governor = self.client.governor();
        if governor.is_operational() {
            return None;
        }
        Some(
            governor
                .status()
                .halt_reason
                .unwrap_or_else(|| "halted".to_string()),
        )
    }

    fn defer(&self, batch: Batch, started: bool, reason: String) -> PublishResult {
        tracing::warn!(
            batch_id = %batch.batch_id,
            reason = %reason,
            "Governor halted, holding batch until resume"
        );
        self.deferred_queue().push_back(DeferredBatch { batch, started });
        PublishResult::Deferred { reason }
    }

    fn deferred_queue(&self) -> MutexGuard<'_, VecDeque<DeferredBatch>> {
        self.deferred.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cursor_name(&self) -> String {
        format!("{}_since_id", self.config.category)
    }

    async fn save_cursor(&self, previous: Option<String>) {
        let Some(store) = &self.cursors else {
            return;
        };
        let Some(current) = self.client.cursor() else {
            return;
        };
        if previous.as_deref() == Some(current.as_str()) {
            return;
        }
        if let Err(e) = store.save_cursor(&self.cursor_name(), &current).await {
            tracing::warn!(since_id = %current, error = %e, "Failed to save mentions cursor");
        }
    }

    fn filter_mentions(&self, mentions: Vec<Mention>) -> Vec<Mention> {
        mentions
            .into_iter()
            .filter(|m| {
                let ignored = self
                    .ignore_patterns
                    .iter()
                    .any(|pattern| pattern.is_match(&m.text));
                if ignored {
                    tracing::debug!(mention_id = %m.id, "Ignoring mention");
                }
                !ignored
            })
            .collect()
    }

    fn mention_event(&self, mention: Mention) -> Event {
        let mut event = Event::from_text(self.clock.now(), mention.text)
            .with_field("mention_id", mention.id);
        if let Some(author_id) = mention.author_id {
            event = event.with_field("author_id", author_id);
        }
        event
    }

    async fn skip(&self, batch: &Batch, reason: &str) -> PublishResult {
        tracing::info!(batch_id = %batch.batch_id, reason = %reason, "Skipped batch");
        self.mark(
            batch,
            CheckpointStatus::Completed,
            Some(json!({ "skipped": true, "reason": reason })),
        )
        .await;
        PublishResult::Skipped {
            reason: reason.to_string(),
        }
    }

    async fn mark(&self, batch: &Batch, status: CheckpointStatus, result: Option<Value>) {
        if !batch.checkpointed {
            tracing::debug!(batch_id = %batch.batch_id, status = %status, "Batch has no checkpoint");
            return;
        }
        if let Err(e) = self
            .checkpoints
            .update(&batch.checkpoint_id, status, result)
            .await
        {
            tracing::warn!(
                checkpoint_id = %batch.checkpoint_id,
                status = %status,
                error = %e,
                "Failed to update checkpoint"
            );
        }
    }
}

fn compile_ignore_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(error) => {
                tracing::warn!(pattern = %pattern, error = %error, "Invalid ignore pattern");
                None
            }
        })
        .collect()
}
