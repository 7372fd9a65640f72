//! Doctor command - validate configuration and show status

use anyhow::{Result, bail};
use herald_adapters::checkpoint::SqliteCheckpointStore;
use herald_domain::CheckpointStore;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::args::DoctorArgs;
use crate::config::AppConfig;

const COMPONENTS: [&str; 5] = ["config", "state", "x", "embeddings", "safety"];

#[derive(Debug, Serialize)]
struct DoctorReport {
    config: CheckResult,
    state: CheckResult,
    x: CheckResult,
    embeddings: CheckResult,
    safety: CheckResult,
    overall: String,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: "warn".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn skipped() -> Self {
        Self {
            status: "skipped".to_string(),
            message: "Not requested".to_string(),
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn is_ok(&self) -> bool {
        self.status == "ok" || self.status == "skipped"
    }

    fn is_error(&self) -> bool {
        self.status == "error"
    }
}

pub async fn execute(args: DoctorArgs, config_path: Option<PathBuf>) -> Result<()> {
    if let Some(check) = args.check.as_deref() {
        if !COMPONENTS.contains(&check) {
            bail!(
                "Unknown component: {} (expected one of {})",
                check,
                COMPONENTS.join(", ")
            );
        }
    }
    let wants = |name: &str| args.check.as_deref().is_none_or(|c| c == name);

    let mut report = DoctorReport {
        config: CheckResult::error("Not checked"),
        state: CheckResult::skipped(),
        x: CheckResult::skipped(),
        embeddings: CheckResult::skipped(),
        safety: CheckResult::skipped(),
        overall: "error".to_string(),
    };

    // Check config
    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(c) => {
            report.config = CheckResult::ok("Configuration loaded successfully");
            Some(c)
        }
        Err(e) => {
            report.config = CheckResult::error(format!("Failed to load config: {:#}", e));
            None
        }
    };

    if let Some(ref config) = config {
        if wants("state") {
            report.state = check_state(&config.general.state_db_path).await;
        }
        if wants("x") {
            report.x = check_x(config);
        }
        if wants("embeddings") {
            report.embeddings = check_embeddings(config);
        }
        if wants("safety") {
            report.safety = check_safety(config);
        }
    }

    let checks = [
        &report.config,
        &report.state,
        &report.x,
        &report.embeddings,
        &report.safety,
    ];

    let has_error = checks.iter().any(|c| c.is_error());
    let all_ok = checks.iter().all(|c| c.is_ok());

    report.overall = if has_error {
        "error".to_string()
    } else if all_ok {
        "ok".to_string()
    } else {
        "warn".to_string()
    };

    // Output report
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.overall == "error" {
        std::process::exit(1);
    }

    Ok(())
}

async fn check_state(path: &Path) -> CheckResult {
    if !path.exists() {
        return CheckResult::ok(format!(
            "State database will be created at {}",
            path.display()
        ));
    }

    let store = match SqliteCheckpointStore::new(path).await {
        Ok(store) => store,
        Err(e) => return CheckResult::error(format!("Failed to open state database: {}", e)),
    };

    match store.list_pending().await {
        Ok(pending) if pending.is_empty() => {
            CheckResult::ok(format!("State database: {}", path.display()))
        }
        Ok(pending) => CheckResult::warn(format!(
            "State database: {}, {} unfinished batch(es)",
            path.display(),
            pending.len()
        ))
        .with_details(serde_json::json!({ "pending": pending })),
        Err(e) => CheckResult::error(format!("Failed to read checkpoints: {}", e)),
    }
}

fn check_x(config: &AppConfig) -> CheckResult {
    let env_var = &config.x.user_token_env;

    if env_var.is_empty() {
        return CheckResult::error("No user token env var configured");
    }

    let token_set = matches!(std::env::var(env_var), Ok(val) if !val.trim().is_empty());
    let mode = if config.general.dry_run {
        "dry-run"
    } else {
        "live"
    };

    match (token_set, config.general.dry_run) {
        (true, _) => CheckResult::ok(format!(
            "User token: {} (set), Mode: {}, API: {}",
            env_var, mode, config.x.base_url
        )),
        (false, true) => CheckResult::warn(format!(
            "User token: {} (not set), Mode: {}, mentions will not be read",
            env_var, mode
        )),
        (false, false) => CheckResult::error(format!(
            "User token: {} (not set), Mode: {}",
            env_var, mode
        )),
    }
}

fn check_embeddings(config: &AppConfig) -> CheckResult {
    let embeddings = &config.embeddings;

    if embeddings.dimensions == 0 {
        return CheckResult::error("Embedding dimensions must be greater than zero");
    }

    match embeddings.provider.as_str() {
        "stub" => CheckResult::ok(format!(
            "Provider: stub (offline hashing), Dimensions: {}",
            embeddings.dimensions
        )),
        "openai" => match std::env::var(&embeddings.api_key_env) {
            Ok(val) if !val.trim().is_empty() => CheckResult::ok(format!(
                "Provider: openai, Model: {}, API key: {} (set)",
                embeddings.model, embeddings.api_key_env
            )),
            _ => CheckResult::warn(format!(
                "Provider: openai, Model: {}, API key: {} (not set)",
                embeddings.model, embeddings.api_key_env
            )),
        },
        other => CheckResult::error(format!("Unknown embeddings provider: {}", other)),
    }
}

fn check_safety(config: &AppConfig) -> CheckResult {
    let mut problems = Vec::new();

    for (class, limit) in [
        ("mentions", &config.limits.mentions),
        ("posts", &config.limits.posts),
        ("general", &config.limits.general),
    ] {
        if limit.max_calls == 0 || limit.window_secs == 0 {
            problems.push(format!("limits.{} must have non-zero max_calls and window_secs", class));
        }
    }

    if config.safety.max_posts_per_hour > config.safety.max_posts_per_day {
        problems.push("safety.max_posts_per_hour exceeds max_posts_per_day".to_string());
    }

    if config.batcher.batch_size == 0 {
        problems.push("batcher.batch_size must be greater than zero".to_string());
    }

    if !(0.0..=1.0).contains(&config.batcher.similarity_threshold) {
        problems.push("batcher.similarity_threshold must be within 0.0..=1.0".to_string());
    }

    for pattern in &config.general.ignore_patterns {
        if let Err(e) = Regex::new(pattern) {
            problems.push(format!("Invalid ignore pattern '{}': {}", pattern, e));
        }
    }

    if problems.is_empty() {
        CheckResult::ok(format!(
            "Caps: {}/hour, {}/day",
            config.safety.max_posts_per_hour, config.safety.max_posts_per_day
        ))
    } else {
        CheckResult::error(format!("{} problem(s) found", problems.len()))
            .with_details(serde_json::json!({ "problems": problems }))
    }
}

fn print_report(report: &DoctorReport) {
    println!("herald Doctor Report");
    println!("====================");
    println!();

    print_check("Config", &report.config);
    print_check("State", &report.state);
    print_check("X", &report.x);
    print_check("Embeddings", &report.embeddings);
    print_check("Safety", &report.safety);

    println!();
    let symbol = match report.overall.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} Overall: {}", symbol, report.overall.to_uppercase());

    if report.overall == "ok" {
        println!();
        println!("Ready to run! Try: herald run --dry-run --once");
    }
}

fn print_check(name: &str, result: &CheckResult) {
    let symbol = match result.status.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        "skipped" => "-",
        _ => "✗",
    };
    println!("{} {}: {}", symbol, name, result.message);

    if let Some(problems) = result
        .details
        .as_ref()
        .and_then(|d| d["problems"].as_array())
    {
        for problem in problems.iter().filter_map(|p| p.as_str()) {
            println!("    - {}", problem);
        }
    }
}
