//! Domain models and value objects

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// An external event waiting to be batched
///
/// Only the fields this crate inspects are typed; everything else the
/// producer sent rides along in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Partition key, stamped when the event is queued
    pub category: String,
    /// When the event arrived
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
    /// Precomputed embedding, if the producer had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Open extension map with the producer's payload
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Event {
    pub fn new(received_at: OffsetDateTime, fields: Map<String, Value>) -> Self {
        Self {
            category: String::new(),
            received_at,
            embedding: None,
            fields,
        }
    }

    /// Build an event carrying a single `text` field
    pub fn from_text(received_at: OffsetDateTime, text: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("text".to_string(), Value::String(text.into()));
        Self::new(received_at, fields)
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Text used as embedding input: `text`, then `content`, then the whole payload
    pub fn text(&self) -> String {
        for key in ["text", "content"] {
            if let Some(Value::String(s)) = self.fields.get(key) {
                return s.clone();
            }
        }
        Value::Object(self.fields.clone()).to_string()
    }
}

/// Events judged similar to the group's first member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub events: Vec<Event>,
}

impl Group {
    pub fn new(first: Event) -> Self {
        Self {
            events: vec![first],
        }
    }

    /// The member every later candidate is compared against
    pub fn leader(&self) -> &Event {
        &self.events[0]
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A drained, grouped unit of work handed to the content pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// `batch_{category}_{checkpoint_id}`
    pub batch_id: String,
    pub checkpoint_id: String,
    pub category: String,
    pub groups: Vec<Group>,
    /// Mean pairwise similarity inside multi-member groups
    pub similarity_score: f64,
    /// False when the checkpoint could not be persisted; the batch may need replay
    pub checkpointed: bool,
}

impl Batch {
    pub fn event_count(&self) -> usize {
        self.groups.iter().map(Group::len).sum()
    }
}

/// Lifecycle of a checkpointed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Created,
    Processing,
    Completed,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Forward-only: created -> processing -> {completed, failed}
    pub fn can_transition_to(&self, next: CheckpointStatus) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Created | Self::Processing)
    }
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of a batch's processing lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub data: Value,
    pub status: CheckpointStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
    pub result: Option<Value>,
}

/// Platform acknowledgment of a successful post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Platform-specific post ID
    pub id: String,
    /// Text as actually sent
    pub text: String,
    /// URL to the published post, if known
    pub url: Option<String>,
    /// Post this one replies to
    pub in_reply_to: Option<String>,
}

/// A post mentioning the authenticated account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    pub text: String,
    pub author_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub created_at: Option<OffsetDateTime>,
}

/// Which feed position a mentions request starts from; never both
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MentionQuery {
    /// Everything newer than the stored cursor
    SinceId(String),
    /// Everything created after the given instant
    StartTime(OffsetDateTime),
}

/// Kind of outbound post, for the daily counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    Post,
    Thread,
    Reply,
}

/// Counters reset at UTC midnight
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub posts: u32,
    pub threads: u32,
    pub replies: u32,
    pub api_errors: u32,
    pub rate_limit_hits: u32,
}

/// Order two snowflake-style IDs numerically without parsing
pub fn newer_id<'a>(a: &'a str, b: &'a str) -> &'a str {
    if (b.len(), b) > (a.len(), a) { b } else { a }
}
