//! Multi-class sliding-window rate limiter
//!
//! Each named class (e.g. `posts`, `mentions`) has its own fixed window that
//! resets once fully elapsed. Callers check before issuing a request and
//! consume right after issuing it, so in-flight requests already count.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, sleep};

/// Limit class for creating posts and replies
pub const POSTS: &str = "posts";
/// Limit class for reading mentions
pub const MENTIONS: &str = "mentions";
/// Limit class shared by every platform call
pub const GENERAL: &str = "general";

/// Maximum calls allowed per window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitSpec {
    pub max_calls: u32,
    pub window: Duration,
}

impl LimitSpec {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self { max_calls, window }
    }
}

/// Point-in-time view of one class's window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub calls_in_window: u32,
    pub max_calls: u32,
    pub remaining_in_window: Duration,
    pub blocked_for: Duration,
}

#[derive(Debug)]
struct RateLimitWindow {
    calls_in_window: u32,
    window_start: Instant,
    max_calls: u32,
    window: Duration,
    /// Set from a provider reset hint; overrides the local window while in the future
    blocked_until: Option<Instant>,
}

impl RateLimitWindow {
    fn new(spec: LimitSpec, now: Instant) -> Self {
        Self {
            calls_in_window: 0,
            window_start: now,
            max_calls: spec.max_calls,
            window: spec.window,
            blocked_until: None,
        }
    }

    fn refresh(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.calls_in_window = 0;
        }
        if self.blocked_until.is_some_and(|until| until <= now) {
            self.blocked_until = None;
        }
    }

    fn is_available(&mut self, now: Instant) -> bool {
        self.refresh(now);
        self.blocked_until.is_none() && self.calls_in_window < self.max_calls
    }

    fn wait_time(&mut self, now: Instant) -> Duration {
        if self.is_available(now) {
            return Duration::ZERO;
        }

        let mut wait = Duration::ZERO;
        if self.calls_in_window >= self.max_calls {
            let elapsed = now.duration_since(self.window_start);
            wait = wait.max(self.window.saturating_sub(elapsed));
        }
        if let Some(until) = self.blocked_until {
            wait = wait.max(until.duration_since(now));
        }
        wait
    }
}

/// Rate limiter over independent named classes
#[derive(Debug)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, RateLimitWindow>>,
    max_wait_step: Duration,
}

impl RateLimiter {
    pub fn new<I, S>(limits: I) -> Self
    where
        I: IntoIterator<Item = (S, LimitSpec)>,
        S: Into<String>,
    {
        let now = Instant::now();
        let windows = limits
            .into_iter()
            .map(|(class, spec)| (class.into(), RateLimitWindow::new(spec, now)))
            .collect();

        Self {
            windows: Mutex::new(windows),
            max_wait_step: Duration::from_secs(60),
        }
    }

    /// X API v2 user-context limits: 180 mention reads, 50 posts, 180 overall per 15 minutes
    pub fn x_api_defaults() -> Self {
        let window = Duration::from_secs(900);
        Self::new([
            (MENTIONS, LimitSpec::new(180, window)),
            (POSTS, LimitSpec::new(50, window)),
            (GENERAL, LimitSpec::new(180, window)),
        ])
    }

    /// Longest single sleep while waiting, so waits stay cancellable
    pub fn with_max_wait_step(mut self, step: Duration) -> Self {
        self.max_wait_step = step.max(Duration::from_millis(1));
        self
    }

    /// Whether a call in `class` may be issued now; unknown classes are unlimited
    pub async fn check(&self, class: &str) -> bool {
        let mut windows = self.windows.lock().await;
        match windows.get_mut(class) {
            Some(window) => window.is_available(Instant::now()),
            None => true,
        }
    }

    /// Count an issued call against `class`
    pub async fn consume(&self, class: &str) {
        let mut windows = self.windows.lock().await;
        let Some(window) = windows.get_mut(class) else {
            return;
        };

        window.refresh(Instant::now());
        window.calls_in_window = window.calls_in_window.saturating_add(1);
        if window.calls_in_window > window.max_calls {
            tracing::warn!(
                class = %class,
                calls = window.calls_in_window,
                max_calls = window.max_calls,
                "Call consumed beyond window limit"
            );
        }
    }

    /// Check every class and consume all of them in one step, or none
    pub async fn try_acquire(&self, classes: &[&str]) -> bool {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();

        let all_available = classes.iter().all(|class| {
            windows
                .get_mut(*class)
                .is_none_or(|window| window.is_available(now))
        });
        if !all_available {
            return false;
        }

        for class in classes {
            if let Some(window) = windows.get_mut(*class) {
                window.calls_in_window = window.calls_in_window.saturating_add(1);
            }
        }
        true
    }

    /// How long until `class` would pass [`check`](Self::check)
    pub async fn time_until_available(&self, class: &str) -> Duration {
        let mut windows = self.windows.lock().await;
        match windows.get_mut(class) {
            Some(window) => window.wait_time(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Sleep until `class` is available, in steps of at most `max_wait_step`
    pub async fn wait_if_needed(&self, class: &str) {
        loop {
            let wait = self.time_until_available(class).await;
            if wait.is_zero() {
                return;
            }
            tracing::debug!(class = %class, wait_ms = wait.as_millis() as u64, "Waiting for rate limit window");
            sleep(wait.min(self.max_wait_step)).await;
        }
    }

    /// Like [`wait_if_needed`](Self::wait_if_needed) but gives up after `budget`
    ///
    /// Returns false without sleeping when the required wait exceeds what is
    /// left of the budget.
    pub async fn wait_within(&self, class: &str, budget: Duration) -> bool {
        let deadline = Instant::now() + budget;
        loop {
            let wait = self.time_until_available(class).await;
            if wait.is_zero() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if wait > remaining {
                return false;
            }
            sleep(wait.min(self.max_wait_step)).await;
        }
    }

    /// Apply a provider reset hint (HTTP 429) if it outlasts the local window
    pub async fn apply_reset_hint(&self, class: &str, wait: Duration) {
        let mut windows = self.windows.lock().await;
        let Some(window) = windows.get_mut(class) else {
            return;
        };

        let now = Instant::now();
        let local_wait = window.wait_time(now);
        if wait > local_wait {
            window.blocked_until = Some(now + wait);
            tracing::warn!(
                class = %class,
                wait_secs = wait.as_secs(),
                "Provider rate limit reset hint overrides local window"
            );
        }
    }

    pub async fn snapshot(&self, class: &str) -> Option<WindowSnapshot> {
        let mut windows = self.windows.lock().await;
        let window = windows.get_mut(class)?;
        let now = Instant::now();
        window.refresh(now);

        Some(WindowSnapshot {
            calls_in_window: window.calls_in_window,
            max_calls: window.max_calls,
            remaining_in_window: window
                .window
                .saturating_sub(now.duration_since(window.window_start)),
            blocked_for: window
                .blocked_until
                .map(|until| until.duration_since(now))
                .unwrap_or_default(),
        })
    }
}
