//! Port definitions (traits) for external dependencies
//!
//! These traits define the boundaries between the domain and external systems.
//! Adapters implement these traits to connect to real infrastructure.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

use crate::model::{Batch, Checkpoint, CheckpointStatus, Mention, MentionQuery, Receipt};

/// Error type for embedding providers
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Embedding API error: {0}")]
    Api(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response format: {0}")]
    InvalidFormat(String),
}

/// Port for an opaque `text -> vector` provider
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input in the same order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Error type for checkpoint store operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint already exists: {0}")]
    AlreadyExists(String),
    #[error("Checkpoint not found: {0}")]
    NotFound(String),
    #[error("Invalid checkpoint transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: CheckpointStatus,
        to: CheckpointStatus,
    },
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Port for durable batch-processing state
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Record a new checkpoint with status `created`
    async fn create(&self, id: &str, data: Value) -> Result<(), CheckpointError>;

    /// Move a checkpoint forward, optionally attaching a result
    async fn update(
        &self,
        id: &str,
        status: CheckpointStatus,
        result: Option<Value>,
    ) -> Result<(), CheckpointError>;

    /// Fetch a single checkpoint
    async fn get(&self, id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// IDs still `created` or `processing`, oldest first
    async fn list_pending(&self) -> Result<Vec<String>, CheckpointError>;

    /// Remove checkpoints created more than `max_age` ago, returning how many went
    async fn prune(&self, max_age: Duration) -> Result<usize, CheckpointError>;
}

/// Oldest `created_at` kept by `prune(max_age)`
///
/// `None` when `max_age` reaches past the representable time range, in which
/// case nothing is old enough to prune.
pub fn prune_cutoff(now: OffsetDateTime, max_age: Duration) -> Option<OffsetDateTime> {
    time::Duration::try_from(max_age)
        .ok()
        .and_then(|age| now.checked_sub(age))
}

/// Port for named feed positions that must survive restarts
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load_cursor(&self, name: &str) -> Result<Option<String>, CheckpointError>;

    /// Insert or replace the stored value
    async fn save_cursor(&self, name: &str, value: &str) -> Result<(), CheckpointError>;
}

/// Error type for platform API calls
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("Rate limited, retry after: {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl PlatformError {
    /// Transient failures the caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Network(_)
        )
    }

    /// Credential failures that must stop all outbound traffic
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Port for the signed social platform REST API
#[async_trait]
pub trait Platform: Send + Sync {
    /// Create a standalone post
    async fn create_post(&self, text: &str) -> Result<Receipt, PlatformError>;

    /// Create a post replying to `in_reply_to_id`
    async fn create_reply(&self, text: &str, in_reply_to_id: &str)
    -> Result<Receipt, PlatformError>;

    /// Fetch mentions of the authenticated account, oldest first
    async fn get_mentions(&self, query: &MentionQuery) -> Result<Vec<Mention>, PlatformError>;

    /// Platform name (e.g., "x", "outbox")
    fn platform(&self) -> &'static str;
}

/// Error type for content composers
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Composer error: {0}")]
    Failed(String),
}

/// Port for the external content generator that turns a batch into post text
#[async_trait]
pub trait Composer: Send + Sync {
    /// Produce the text to publish for a batch, or `None` to skip it
    async fn compose(&self, batch: &Batch) -> Result<Option<String>, ComposeError>;
}

/// Port for time/clock operations (enables deterministic testing)
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> OffsetDateTime;
}

/// Real clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Manually advanced clock for tests and replays
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
