//! Safety governor: business-level posting caps, daily stats and the halt switch
//!
//! The governor is a two-state machine. Critical API errors move it from
//! operational to halted; only [`SafetyGovernor::resume`] moves it back.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use time::{Date, Duration, OffsetDateTime};

use crate::model::{DailyStats, PostKind};
use crate::ports::Clock;

/// Classification of an API failure reported to the governor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorKind {
    /// Credentials rejected (401/403)
    AuthenticationFailed,
    /// Rate limits exhausted beyond recovery
    RateLimitExceeded,
    /// Provider unreachable or persistently failing
    ApiUnavailable,
    /// A single 429
    RateLimited,
    /// A single 5xx
    ServerError,
    /// Timeouts, connection resets
    Network,
    /// Request rejected for any other reason
    PostingError,
}

impl ApiErrorKind {
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed | Self::RateLimitExceeded | Self::ApiUnavailable
        )
    }
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ApiUnavailable => "API_UNAVAILABLE",
            Self::RateLimited => "RATE_LIMITED",
            Self::ServerError => "SERVER_ERROR",
            Self::Network => "NETWORK",
            Self::PostingError => "POSTING_ERROR",
        };
        f.write_str(s)
    }
}

/// Governor limits
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub max_posts_per_hour: usize,
    pub max_posts_per_day: usize,
    /// Consecutive 429s before escalating to `RateLimitExceeded`
    pub max_consecutive_rate_limits: u32,
    /// Consecutive 5xx before escalating to `ApiUnavailable`
    pub max_consecutive_server_errors: u32,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_posts_per_hour: 5,
            max_posts_per_day: 20,
            max_consecutive_rate_limits: 3,
            max_consecutive_server_errors: 3,
        }
    }
}

/// Snapshot of the governor for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct GovernorStatus {
    pub operational: bool,
    pub halt_reason: Option<String>,
    pub posts_last_hour: usize,
    pub posts_last_day: usize,
    pub stats: DailyStats,
}

#[derive(Debug)]
struct SafetyState {
    post_history: VecDeque<OffsetDateTime>,
    daily_stats: DailyStats,
    stats_date: Date,
    halted: bool,
    halt_reason: Option<String>,
    consecutive_rate_limits: u32,
    consecutive_server_errors: u32,
}

/// Process-wide posting guard; share it by `Arc`
pub struct SafetyGovernor {
    config: GovernorConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<SafetyState>,
}

impl SafetyGovernor {
    pub fn new(config: GovernorConfig, clock: Arc<dyn Clock>) -> Self {
        let today = clock.now().to_offset(time::UtcOffset::UTC).date();
        Self {
            config,
            clock,
            state: Mutex::new(SafetyState {
                post_history: VecDeque::new(),
                daily_stats: DailyStats::default(),
                stats_date: today,
                halted: false,
                halt_reason: None,
                consecutive_rate_limits: 0,
                consecutive_server_errors: 0,
            }),
        }
    }

    pub fn is_operational(&self) -> bool {
        !self.state().halted
    }

    /// Whether another post fits within the hourly and daily caps
    pub fn check_rate_limit(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state();
        Self::prune_history(&mut state, now);

        let hour_ago = now - Duration::HOUR;
        let posts_last_hour = state
            .post_history
            .iter()
            .filter(|ts| **ts > hour_ago)
            .count();
        let posts_today = state.post_history.len();

        let within_limits = posts_last_hour < self.config.max_posts_per_hour
            && posts_today < self.config.max_posts_per_day;

        if !within_limits {
            tracing::warn!(
                posts_last_hour,
                posts_today,
                max_per_hour = self.config.max_posts_per_hour,
                max_per_day = self.config.max_posts_per_day,
                "Posting cap reached"
            );
            self.roll_stats(&mut state, now);
            state.daily_stats.rate_limit_hits += 1;
        }

        within_limits
    }

    /// Count a confirmed successful post
    pub fn record_post(&self, kind: PostKind) {
        let now = self.clock.now();
        let mut state = self.state();
        self.roll_stats(&mut state, now);

        state.post_history.push_back(now);
        state.daily_stats.posts += 1;
        match kind {
            PostKind::Thread => state.daily_stats.threads += 1,
            PostKind::Reply => state.daily_stats.replies += 1,
            PostKind::Post => {}
        }
        state.consecutive_rate_limits = 0;
        state.consecutive_server_errors = 0;
    }

    /// Record an API failure; critical or persistent failures halt the system
    pub fn log_api_error(&self, kind: ApiErrorKind, detail: &str) {
        let now = self.clock.now();
        let mut state = self.state();
        self.roll_stats(&mut state, now);

        tracing::error!(kind = %kind, detail = %detail, "API error");
        state.daily_stats.api_errors += 1;

        let mut effective = kind;
        match kind {
            ApiErrorKind::RateLimited => {
                state.daily_stats.rate_limit_hits += 1;
                state.consecutive_rate_limits += 1;
                if state.consecutive_rate_limits >= self.config.max_consecutive_rate_limits {
                    effective = ApiErrorKind::RateLimitExceeded;
                }
            }
            ApiErrorKind::ServerError => {
                state.consecutive_server_errors += 1;
                if state.consecutive_server_errors >= self.config.max_consecutive_server_errors {
                    effective = ApiErrorKind::ApiUnavailable;
                }
            }
            _ => {}
        }

        if effective.is_critical() {
            Self::halt_locked(&mut state, format!("{}: {}", effective, detail));
        }
    }

    /// Halt outbound posting immediately
    pub fn halt(&self, reason: &str) {
        Self::halt_locked(&mut self.state(), reason.to_string());
    }

    /// Explicitly return to operational; the only way out of a halt
    pub fn resume(&self) {
        let mut state = self.state();
        if state.halted {
            state.halted = false;
            state.halt_reason = None;
            state.consecutive_rate_limits = 0;
            state.consecutive_server_errors = 0;
            tracing::info!("Operations resumed");
        }
    }

    pub fn status(&self) -> GovernorStatus {
        let now = self.clock.now();
        let mut state = self.state();
        Self::prune_history(&mut state, now);
        self.roll_stats(&mut state, now);

        let hour_ago = now - Duration::HOUR;
        GovernorStatus {
            operational: !state.halted,
            halt_reason: state.halt_reason.clone(),
            posts_last_hour: state.post_history.iter().filter(|ts| **ts > hour_ago).count(),
            posts_last_day: state.post_history.len(),
            stats: state.daily_stats.clone(),
        }
    }

    fn halt_locked(state: &mut SafetyState, reason: String) {
        if !state.halted {
            tracing::error!(reason = %reason, "Emergency halt activated");
        }
        state.halted = true;
        state.halt_reason = Some(reason);
    }

    fn prune_history(state: &mut SafetyState, now: OffsetDateTime) {
        let day_ago = now - Duration::DAY;
        while state.post_history.front().is_some_and(|ts| *ts <= day_ago) {
            state.post_history.pop_front();
        }
    }

    /// Reset daily counters when the UTC date changes
    fn roll_stats(&self, state: &mut SafetyState, now: OffsetDateTime) {
        let today = now.to_offset(time::UtcOffset::UTC).date();
        if today != state.stats_date {
            tracing::info!(previous = ?state.daily_stats, "Resetting daily stats");
            state.daily_stats = DailyStats::default();
            state.stats_date = today;
        }
    }

    fn state(&self) -> MutexGuard<'_, SafetyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
