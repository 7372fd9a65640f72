//! Outbox platform for dry-run mode: posts go to a JSONL file for review.

use async_trait::async_trait;
use herald_domain::{Mention, MentionQuery, Platform, PlatformError, Receipt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct OutboxWriter {
    path: PathBuf,
    file: Arc<Mutex<tokio::fs::File>>,
}

impl OutboxWriter {
    pub async fn new(path: PathBuf) -> Result<Self, OutboxError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &OutboxEntry<'_>) -> Result<(), OutboxError> {
        let line = serde_json::to_string(entry)?;
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct OutboxEntry<'a> {
    id: &'a str,
    kind: &'static str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_reply_to: Option<&'a str>,
    #[serde(with = "time::serde::rfc3339")]
    written_at: OffsetDateTime,
}

/// Platform that records posts to an outbox instead of publishing them
///
/// Mention reads go to an optional wrapped platform so a dry run can still
/// react to real traffic.
pub struct OutboxPlatform {
    writer: OutboxWriter,
    reader: Option<Arc<dyn Platform>>,
}

impl OutboxPlatform {
    pub fn new(writer: OutboxWriter) -> Self {
        Self {
            writer,
            reader: None,
        }
    }

    /// Serve `get_mentions` from another platform
    pub fn with_reader(mut self, reader: Arc<dyn Platform>) -> Self {
        self.reader = Some(reader);
        self
    }

    async fn record(&self, text: &str, in_reply_to: Option<&str>) -> Result<Receipt, PlatformError> {
        let id = format!("outbox-{}", Uuid::new_v4());
        let entry = OutboxEntry {
            id: &id,
            kind: if in_reply_to.is_some() { "reply" } else { "post" },
            text,
            in_reply_to,
            written_at: OffsetDateTime::now_utc(),
        };

        self.writer.append(&entry).await.map_err(|error| {
            PlatformError::Rejected {
                status: 0,
                message: format!("Outbox write failed: {}", error),
            }
        })?;

        tracing::info!(
            outbox = %self.writer.path().display(),
            id = %id,
            in_reply_to = ?in_reply_to,
            "[DRY RUN] Wrote post to outbox"
        );

        Ok(Receipt {
            id,
            text: text.to_string(),
            url: None,
            in_reply_to: in_reply_to.map(String::from),
        })
    }
}

#[async_trait]
impl Platform for OutboxPlatform {
    async fn create_post(&self, text: &str) -> Result<Receipt, PlatformError> {
        self.record(text, None).await
    }

    async fn create_reply(
        &self,
        text: &str,
        in_reply_to_id: &str,
    ) -> Result<Receipt, PlatformError> {
        self.record(text, Some(in_reply_to_id)).await
    }

    async fn get_mentions(&self, query: &MentionQuery) -> Result<Vec<Mention>, PlatformError> {
        match &self.reader {
            Some(reader) => reader.get_mentions(query).await,
            None => Ok(vec![]),
        }
    }

    fn platform(&self) -> &'static str {
        "outbox"
    }
}
