//! Configuration loading and management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use herald_domain::{
    GovernorConfig, LimitSpec,
    ratelimit::{GENERAL, MENTIONS, POSTS},
    usecases::{BatcherConfig, PlatformClientConfig, RunLoopConfig},
};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub batcher: BatcherSection,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub x: XConfig,

    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_true")]
    pub dry_run: bool,

    #[serde(default = "default_state_db_path")]
    pub state_db_path: PathBuf,

    #[serde(default = "default_outbox_path")]
    pub outbox_path: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_halted_poll_interval")]
    pub halted_poll_interval_secs: u64,

    #[serde(default = "default_mention_window")]
    pub mention_window_minutes: u32,

    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    #[serde(default = "default_checkpoint_max_age")]
    pub checkpoint_max_age_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    #[serde(default = "default_max_batch_wait")]
    pub max_batch_wait_secs: u64,

    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClassLimit {
    pub max_calls: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_mentions_limit")]
    pub mentions: ClassLimit,

    #[serde(default = "default_posts_limit")]
    pub posts: ClassLimit,

    #[serde(default = "default_general_limit")]
    pub general: ClassLimit,

    /// How long a call may wait for the local limiter; 0 fails immediately
    #[serde(default)]
    pub max_wait_secs: u64,

    #[serde(default = "default_max_wait_step")]
    pub max_wait_step_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_max_posts_per_hour")]
    pub max_posts_per_hour: usize,

    #[serde(default = "default_max_posts_per_day")]
    pub max_posts_per_day: usize,

    #[serde(default = "default_max_consecutive")]
    pub max_consecutive_rate_limits: u32,

    #[serde(default = "default_max_consecutive")]
    pub max_consecutive_server_errors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XConfig {
    #[serde(default = "default_x_base_url")]
    pub base_url: String,

    #[serde(default = "default_x_user_token_env")]
    pub user_token_env: String,

    /// Account ID; looked up from the token when unset
    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default = "default_x_max_chars")]
    pub max_chars: usize,

    #[serde(default = "default_thread_delay")]
    pub thread_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// `openai` or `stub`
    #[serde(default = "default_embeddings_provider")]
    pub provider: String,

    #[serde(default = "default_embeddings_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_state_db_path() -> PathBuf {
    PathBuf::from("./herald.sqlite")
}

fn default_outbox_path() -> PathBuf {
    PathBuf::from("./outbox.jsonl")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_halted_poll_interval() -> u64 {
    3600
}

fn default_mention_window() -> u32 {
    5
}

fn default_checkpoint_max_age() -> u64 {
    24
}

fn default_batch_size() -> usize {
    5
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_max_batch_wait() -> u64 {
    60
}

fn default_monitor_interval() -> u64 {
    5
}

fn default_mentions_limit() -> ClassLimit {
    ClassLimit {
        max_calls: 180,
        window_secs: 900,
    }
}

fn default_posts_limit() -> ClassLimit {
    ClassLimit {
        max_calls: 50,
        window_secs: 900,
    }
}

fn default_general_limit() -> ClassLimit {
    ClassLimit {
        max_calls: 180,
        window_secs: 900,
    }
}

fn default_max_wait_step() -> u64 {
    60
}

fn default_max_posts_per_hour() -> usize {
    5
}

fn default_max_posts_per_day() -> usize {
    20
}

fn default_max_consecutive() -> u32 {
    3
}

fn default_x_base_url() -> String {
    "https://api.twitter.com".to_string()
}

fn default_x_user_token_env() -> String {
    "X_USER_TOKEN".to_string()
}

fn default_x_max_chars() -> usize {
    280
}

fn default_thread_delay() -> u64 {
    2000
}

fn default_embeddings_provider() -> String {
    "stub".to_string()
}

fn default_embeddings_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    1536
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            dry_run: default_true(),
            state_db_path: default_state_db_path(),
            outbox_path: default_outbox_path(),
            log_level: default_log_level(),
            poll_interval_secs: default_poll_interval(),
            halted_poll_interval_secs: default_halted_poll_interval(),
            mention_window_minutes: default_mention_window(),
            ignore_patterns: vec![],
            checkpoint_max_age_hours: default_checkpoint_max_age(),
        }
    }
}

impl Default for BatcherSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            similarity_threshold: default_similarity_threshold(),
            max_batch_wait_secs: default_max_batch_wait(),
            monitor_interval_secs: default_monitor_interval(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            mentions: default_mentions_limit(),
            posts: default_posts_limit(),
            general: default_general_limit(),
            max_wait_secs: 0,
            max_wait_step_secs: default_max_wait_step(),
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_posts_per_hour: default_max_posts_per_hour(),
            max_posts_per_day: default_max_posts_per_day(),
            max_consecutive_rate_limits: default_max_consecutive(),
            max_consecutive_server_errors: default_max_consecutive(),
        }
    }
}

impl Default for XConfig {
    fn default() -> Self {
        Self {
            base_url: default_x_base_url(),
            user_token_env: default_x_user_token_env(),
            user_id: None,
            max_chars: default_x_max_chars(),
            thread_delay_ms: default_thread_delay(),
        }
    }
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: default_embeddings_provider(),
            model: default_embeddings_model(),
            dimensions: default_dimensions(),
            api_key_env: default_openai_api_key_env(),
            base_url: default_openai_base_url(),
        }
    }
}

impl ClassLimit {
    fn spec(&self) -> LimitSpec {
        LimitSpec::new(self.max_calls, Duration::from_secs(self.window_secs))
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Try default config path if none specified
        let default_path = PathBuf::from("./herald.toml");
        let path = config_path.unwrap_or(&default_path);

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else if config_path.is_some() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        // Add environment variable overrides
        builder = builder.add_source(
            config::Environment::with_prefix("HERALD")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn batcher_config(&self) -> BatcherConfig {
        BatcherConfig {
            batch_size: self.batcher.batch_size,
            similarity_threshold: self.batcher.similarity_threshold,
            max_batch_wait: Duration::from_secs(self.batcher.max_batch_wait_secs),
            monitor_interval: Duration::from_secs(self.batcher.monitor_interval_secs.max(1)),
        }
    }

    pub fn rate_limits(&self) -> Vec<(&'static str, LimitSpec)> {
        vec![
            (MENTIONS, self.limits.mentions.spec()),
            (POSTS, self.limits.posts.spec()),
            (GENERAL, self.limits.general.spec()),
        ]
    }

    pub fn governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            max_posts_per_hour: self.safety.max_posts_per_hour,
            max_posts_per_day: self.safety.max_posts_per_day,
            max_consecutive_rate_limits: self.safety.max_consecutive_rate_limits,
            max_consecutive_server_errors: self.safety.max_consecutive_server_errors,
        }
    }

    pub fn client_config(&self) -> PlatformClientConfig {
        PlatformClientConfig {
            max_chars: self.x.max_chars,
            thread_delay: Duration::from_millis(self.x.thread_delay_ms),
            max_wait: Duration::from_secs(self.limits.max_wait_secs),
        }
    }

    pub fn run_loop_config(&self) -> RunLoopConfig {
        RunLoopConfig {
            mention_window_minutes: self.general.mention_window_minutes,
            ignore_patterns: self.general.ignore_patterns.clone(),
            max_chars: self.x.max_chars,
            poll_interval: Duration::from_secs(self.general.poll_interval_secs.max(1)),
            halted_poll_interval: Duration::from_secs(self.general.halted_poll_interval_secs),
            ..Default::default()
        }
    }

    /// Generate example configuration as TOML string
    pub fn example_toml() -> String {
        r#"# herald configuration
# Every key can be overridden with HERALD__SECTION__KEY, e.g. HERALD__GENERAL__DRY_RUN=false

[general]
dry_run = true
state_db_path = "./herald.sqlite"
outbox_path = "./outbox.jsonl"
log_level = "info"
poll_interval_secs = 60
# Poll interval while the safety governor is halted
halted_poll_interval_secs = 3600
# How far back the first mentions poll reaches
mention_window_minutes = 5
# ignore_patterns = ["^RT @", "(?i)giveaway"]
checkpoint_max_age_hours = 24

[batcher]
batch_size = 5
similarity_threshold = 0.8
max_batch_wait_secs = 60
monitor_interval_secs = 5

[limits]
# 0 fails immediately when a local window is exhausted
max_wait_secs = 0
max_wait_step_secs = 60

[limits.mentions]
max_calls = 180
window_secs = 900

[limits.posts]
max_calls = 50
window_secs = 900

[limits.general]
max_calls = 180
window_secs = 900

[safety]
max_posts_per_hour = 5
max_posts_per_day = 20
max_consecutive_rate_limits = 3
max_consecutive_server_errors = 3

[x]
base_url = "https://api.twitter.com"
user_token_env = "X_USER_TOKEN"
# user_id = "1234567890"
max_chars = 280
thread_delay_ms = 2000

[embeddings]
provider = "stub"  # stub, openai
model = "text-embedding-3-small"
dimensions = 1536
api_key_env = "OPENAI_API_KEY"
base_url = "https://api.openai.com/v1"
"#
        .to_string()
    }
}
