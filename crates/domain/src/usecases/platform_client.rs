//! Platform client - gated outbound posting and cursor-tracked mention polling

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::{
    governor::{ApiErrorKind, SafetyGovernor},
    model::{Mention, MentionQuery, PostKind, Receipt, newer_id},
    ports::{Clock, Platform, PlatformError},
    ratelimit::{GENERAL, MENTIONS, POSTS, RateLimiter},
    text::{MAX_POST_CHARS, truncate_chars},
};

/// Configuration for the platform client
#[derive(Debug, Clone)]
pub struct PlatformClientConfig {
    /// Post length limit in characters
    pub max_chars: usize,
    /// Pause between consecutive posts of a thread
    pub thread_delay: Duration,
    /// How long a call may wait on the local limiter before failing
    pub max_wait: Duration,
}

impl Default for PlatformClientConfig {
    fn default() -> Self {
        Self {
            max_chars: MAX_POST_CHARS,
            thread_delay: Duration::from_secs(2),
            max_wait: Duration::ZERO,
        }
    }
}

/// Errors from the platform client
#[derive(Debug, Error)]
pub enum PostingError {
    #[error("Posting halted: {0}")]
    Halted(String),
    #[error("Posting cap reached")]
    DailyCapReached,
    #[error("Nothing to post")]
    EmptyContent,
    #[error("Local rate limit for {class}, available in {wait:?}")]
    RateLimited { class: &'static str, wait: Duration },
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

impl PostingError {
    /// Whether the caller may try the same call again later
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Platform(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the failure stops all outbound traffic
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Halted(_) => true,
            Self::Platform(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Result of a thread: every receipt that made it, plus the error that stopped it
#[derive(Debug)]
pub struct ThreadOutcome {
    pub receipts: Vec<Receipt>,
    pub error: Option<PostingError>,
    /// Chunks never sent because an earlier one failed
    pub unattempted: usize,
}

impl ThreadOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Platform client gated by the rate limiter and the safety governor
pub struct PlatformClient<P>
where
    P: Platform + ?Sized,
{
    platform: Arc<P>,
    limiter: Arc<RateLimiter>,
    governor: Arc<SafetyGovernor>,
    clock: Arc<dyn Clock>,
    config: PlatformClientConfig,
    cursor: Mutex<Option<String>>,
}

impl<P> PlatformClient<P>
where
    P: Platform + ?Sized,
{
    pub fn new(
        platform: Arc<P>,
        limiter: Arc<RateLimiter>,
        governor: Arc<SafetyGovernor>,
        clock: Arc<dyn Clock>,
        config: PlatformClientConfig,
    ) -> Self {
        Self {
            platform,
            limiter,
            governor,
            clock,
            config,
            cursor: Mutex::new(None),
        }
    }

    pub fn governor(&self) -> &SafetyGovernor {
        &self.governor
    }

    /// Publish a standalone post
    pub async fn post(&self, text: &str) -> Result<Receipt, PostingError> {
        self.ensure_can_post()?;
        self.send(text, None, PostKind::Post).await
    }

    /// Publish a reply to an existing post
    pub async fn reply(&self, text: &str, in_reply_to_id: &str) -> Result<Receipt, PostingError> {
        self.ensure_can_post()?;
        self.send(text, Some(in_reply_to_id), PostKind::Reply).await
    }

    /// Publish chunks as a reply chain, stopping at the first failure
    ///
    /// The posting caps are checked once for the whole thread; the halt switch
    /// is checked again before every chunk.
    pub async fn post_thread(&self, texts: &[String]) -> ThreadOutcome {
        if let Err(error) = self.ensure_can_post() {
            return ThreadOutcome {
                receipts: vec![],
                error: Some(error),
                unattempted: texts.len(),
            };
        }

        let mut receipts: Vec<Receipt> = Vec::with_capacity(texts.len());
        for (index, text) in texts.iter().enumerate() {
            if index > 0 {
                sleep(self.config.thread_delay).await;
            }

            let in_reply_to = receipts.last().map(|r| r.id.clone());
            match self.send(text, in_reply_to.as_deref(), PostKind::Thread).await {
                Ok(receipt) => receipts.push(receipt),
                Err(error) => {
                    tracing::warn!(
                        posted = receipts.len(),
                        failed_index = index,
                        total = texts.len(),
                        error = %error,
                        "Thread aborted"
                    );
                    return ThreadOutcome {
                        receipts,
                        error: Some(error),
                        unattempted: texts.len() - index - 1,
                    };
                }
            }
        }

        tracing::info!(posts = receipts.len(), "Thread published");
        ThreadOutcome {
            receipts,
            error: None,
            unattempted: 0,
        }
    }

    /// Fetch new mentions and advance the cursor
    ///
    /// Uses the stored cursor once one exists, otherwise the last
    /// `since_minutes` minutes.
    pub async fn poll_mentions(&self, since_minutes: u32) -> Result<Vec<Mention>, PostingError> {
        self.acquire(MENTIONS).await?;

        let query = match self.cursor_guard().clone() {
            Some(since_id) => MentionQuery::SinceId(since_id),
            None => MentionQuery::StartTime(
                self.clock.now() - Duration::from_secs(u64::from(since_minutes) * 60),
            ),
        };

        let mentions = match self.platform.get_mentions(&query).await {
            Ok(mentions) => mentions,
            Err(error) => {
                self.report_error(MENTIONS, &error).await;
                return Err(error.into());
            }
        };

        if let Some(newest) = mentions.iter().map(|m| m.id.as_str()).reduce(newer_id) {
            let mut cursor = self.cursor_guard();
            let advanced = match cursor.as_deref() {
                Some(current) => newer_id(current, newest).to_string(),
                None => newest.to_string(),
            };
            *cursor = Some(advanced);
        }

        tracing::info!(count = mentions.len(), query = ?query, "Polled mentions");
        Ok(mentions)
    }

    /// Current mentions cursor
    pub fn cursor(&self) -> Option<String> {
        self.cursor_guard().clone()
    }

    /// Restore a cursor persisted by a previous run
    pub fn restore_cursor(&self, since_id: Option<String>) {
        *self.cursor_guard() = since_id;
    }

    fn ensure_can_post(&self) -> Result<(), PostingError> {
        if !self.governor.is_operational() {
            return Err(self.halted());
        }
        if !self.governor.check_rate_limit() {
            return Err(PostingError::DailyCapReached);
        }
        Ok(())
    }

    async fn send(
        &self,
        text: &str,
        in_reply_to: Option<&str>,
        kind: PostKind,
    ) -> Result<Receipt, PostingError> {
        if !self.governor.is_operational() {
            return Err(self.halted());
        }

        let text = self.prepare_text(text)?;
        self.acquire(POSTS).await?;

        let result = match in_reply_to {
            Some(id) => self.platform.create_reply(&text, id).await,
            None => self.platform.create_post(&text).await,
        };

        match result {
            Ok(receipt) => {
                self.governor.record_post(kind);
                tracing::info!(
                    post_id = %receipt.id,
                    in_reply_to = ?in_reply_to,
                    platform = self.platform.platform(),
                    "Posted"
                );
                Ok(receipt)
            }
            Err(error) => {
                self.report_error(POSTS, &error).await;
                Err(error.into())
            }
        }
    }

    fn prepare_text(&self, text: &str) -> Result<String, PostingError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PostingError::EmptyContent);
        }

        let length = trimmed.chars().count();
        if length > self.config.max_chars {
            tracing::warn!(length, max = self.config.max_chars, "Truncating post");
        }
        Ok(truncate_chars(trimmed, self.config.max_chars))
    }

    /// Reserve one call in `class` and the shared class, waiting up to `max_wait`
    async fn acquire(&self, class: &'static str) -> Result<(), PostingError> {
        let deadline = Instant::now() + self.config.max_wait;
        let classes = [class, GENERAL];

        loop {
            if self.limiter.try_acquire(&classes).await {
                return Ok(());
            }

            for limited in classes {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if !self.limiter.wait_within(limited, remaining).await {
                    let wait = self.limiter.time_until_available(limited).await;
                    tracing::warn!(class = limited, wait_secs = wait.as_secs(), "Local rate limit reached");
                    return Err(PostingError::RateLimited {
                        class: limited,
                        wait,
                    });
                }
            }
        }
    }

    async fn report_error(&self, class: &'static str, error: &PlatformError) {
        let kind = match error {
            PlatformError::RateLimited { retry_after } => {
                if let Some(wait) = retry_after {
                    self.limiter.apply_reset_hint(class, *wait).await;
                }
                ApiErrorKind::RateLimited
            }
            PlatformError::Auth { .. } => ApiErrorKind::AuthenticationFailed,
            PlatformError::Server { .. } => ApiErrorKind::ServerError,
            PlatformError::Network(_) => ApiErrorKind::Network,
            PlatformError::Rejected { .. } | PlatformError::InvalidResponse(_) => {
                ApiErrorKind::PostingError
            }
        };
        self.governor.log_api_error(kind, &error.to_string());
    }

    fn halted(&self) -> PostingError {
        let reason = self
            .governor
            .status()
            .halt_reason
            .unwrap_or_else(|| "halted".to_string());
        PostingError::Halted(reason)
    }

    fn cursor_guard(&self) -> MutexGuard<'_, Option<String>> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
