//! Run command - poll, batch, and publish loop

use anyhow::{Context, Result, bail};
use herald_adapters::{
    checkpoint::SqliteCheckpointStore,
    compose::DigestComposer,
    embed::{HashingEmbedder, OpenAiEmbedder},
    outbox::{OutboxPlatform, OutboxWriter},
    x_api::XPlatform,
};
use herald_domain::{
    CheckpointStore, Clock, Composer, Embedder, Platform, RateLimiter, SafetyGovernor,
    SimilarityEngine, SystemClock,
    usecases::{EventBatcher, PlatformClient, PublishResult, RunLoop},
};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::args::RunArgs;
use crate::config::AppConfig;

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;

    let dry_run = args.dry_run || config.general.dry_run;
    let outbox_path = args
        .outbox
        .clone()
        .unwrap_or_else(|| config.general.outbox_path.clone());

    if args.outbox.is_some() && !dry_run {
        tracing::warn!("--outbox is ignored outside dry-run mode");
    }

    tracing::info!(
        dry_run = dry_run,
        once = args.once,
        state_db = %config.general.state_db_path.display(),
        "Starting herald run"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let checkpoints = Arc::new(
        SqliteCheckpointStore::new(&config.general.state_db_path)
            .await
            .context("Failed to initialize SQLite checkpoint store")?,
    );
    recover_checkpoints(checkpoints.as_ref(), &config).await?;

    let similarity = SimilarityEngine::new(build_embedder(&config)?, config.embeddings.dimensions);
    let batcher = Arc::new(EventBatcher::new(
        similarity,
        checkpoints.clone(),
        clock.clone(),
        config.batcher_config(),
    ));

    let platform = build_platform(&config, dry_run, outbox_path).await?;
    let limiter = Arc::new(
        RateLimiter::new(config.rate_limits())
            .with_max_wait_step(Duration::from_secs(config.limits.max_wait_step_secs)),
    );
    let governor = Arc::new(SafetyGovernor::new(config.governor_config(), clock.clone()));
    let client = Arc::new(PlatformClient::new(
        platform,
        limiter,
        governor,
        clock.clone(),
        config.client_config(),
    ));

    let composer: Arc<dyn Composer> = Arc::new(DigestComposer::default());
    let loop_config = config.run_loop_config();
    let category = loop_config.category.clone();

    let run_loop = RunLoop::new(
        client.clone(),
        batcher.clone(),
        checkpoints.clone(),
        composer,
        clock,
        loop_config,
    )
    .with_cursor_store(checkpoints);
    run_loop.restore_cursor().await;

    if args.once {
        tracing::info!("Running single poll cycle");
        let mut results = run_loop.poll_once().await?;

        // Publish whatever did not fill a whole batch
        if let Some(batch) = batcher.process_batch(&category).await {
            let result = run_loop.publish_batch(&batch).await;
            results.push((batch.batch_id.clone(), result));
        }

        tracing::info!(batches = results.len(), "Poll cycle complete");
        log_results(&results);
    } else {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                    // Hold the sender so the loop keeps running
                    std::future::pending::<()>().await;
                }
            }
        });

        run_loop.run(shutdown_rx).await;
    }

    let status = client.governor().status();
    tracing::info!(
        operational = status.operational,
        posts = status.stats.posts,
        threads = status.stats.threads,
        api_errors = status.stats.api_errors,
        rate_limit_hits = status.stats.rate_limit_hits,
        "herald run completed"
    );
    Ok(())
}

/// Drop expired checkpoints and report batches a previous run left unfinished
async fn recover_checkpoints(store: &SqliteCheckpointStore, config: &AppConfig) -> Result<()> {
    let max_age = Duration::from_secs(
        config
            .general
            .checkpoint_max_age_hours
            .saturating_mul(3600),
    );
    store
        .prune(max_age)
        .await
        .context("Failed to prune checkpoints")?;

    let unfinished = store
        .list_pending()
        .await
        .context("Failed to list pending checkpoints")?;
    if !unfinished.is_empty() {
        tracing::warn!(
            count = unfinished.len(),
            oldest = %unfinished[0],
            "Found unfinished batches from a previous run; inspect with `herald checkpoints pending`"
        );
    }
    Ok(())
}

fn log_results(results: &[(String, PublishResult)]) {
    for (batch_id, result) in results {
        match result {
            PublishResult::Published { receipts } => {
                tracing::info!(
                    batch_id = %batch_id,
                    posts = receipts.len(),
                    first_id = ?receipts.first().map(|r| &r.id),
                    "Published"
                );
            }
            PublishResult::Skipped { reason } => {
                tracing::debug!(batch_id = %batch_id, reason = %reason, "Skipped");
            }
            PublishResult::Deferred { reason } => {
                tracing::warn!(batch_id = %batch_id, reason = %reason, "Held until resume");
            }
            PublishResult::Failed {
                error,
                retryable,
                receipts,
            } => {
                tracing::error!(
                    batch_id = %batch_id,
                    error = %error,
                    retryable = retryable,
                    posted = receipts.len(),
                    "Failed"
                );
            }
        }
    }
}

async fn build_platform(
    config: &AppConfig,
    dry_run: bool,
    outbox_path: PathBuf,
) -> Result<Arc<dyn Platform>> {
    if dry_run {
        let writer = OutboxWriter::new(outbox_path.clone())
            .await
            .context("Failed to initialize outbox writer")?;
        let mut outbox = OutboxPlatform::new(writer);

        match load_api_key(&config.x.user_token_env, "x") {
            Ok(token) => {
                outbox = outbox.with_reader(Arc::new(build_x_platform(config, token)?));
            }
            Err(e) => {
                tracing::warn!(error = %e, "No X token, dry run will not read mentions");
            }
        }

        tracing::info!(outbox = %outbox_path.display(), "Writing posts to outbox");
        return Ok(Arc::new(outbox));
    }

    let token = load_api_key(&config.x.user_token_env, "x")?;
    Ok(Arc::new(build_x_platform(config, token)?))
}

fn build_x_platform(config: &AppConfig, token: SecretString) -> Result<XPlatform> {
    let mut platform = XPlatform::with_base_url(token, config.x.base_url.clone())
        .context("Failed to build X API client")?;

    if let Some(user_id) = config.x.user_id.as_deref().map(str::trim) {
        if !user_id.is_empty() {
            platform = platform.with_user_id(user_id);
        }
    }
    Ok(platform)
}

pub fn build_embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>> {
    match config.embeddings.provider.trim() {
        "openai" => {
            let api_key = load_api_key(&config.embeddings.api_key_env, "openai")?;
            let embedder = OpenAiEmbedder::with_base_url(
                api_key,
                config.embeddings.base_url.clone(),
                config.embeddings.model.clone(),
            )
            .context("Failed to build OpenAI client")?
            .with_dimensions(config.embeddings.dimensions);
            Ok(Arc::new(embedder))
        }
        "stub" => Ok(Arc::new(HashingEmbedder::new(config.embeddings.dimensions))),
        other => bail!("Unknown embeddings provider: {}", other),
    }
}

pub fn load_api_key(env_var: &str, provider: &str) -> Result<SecretString> {
    let value = std::env::var(env_var)
        .with_context(|| format!("Missing {} credentials: set {}", provider, env_var))?;

    if value.trim().is_empty() {
        bail!("{} is set but empty", env_var);
    }

    Ok(SecretString::from(value))
}
