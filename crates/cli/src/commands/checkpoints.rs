//! Checkpoints command - inspect and prune batch checkpoints

use anyhow::{Context, Result};
use herald_adapters::checkpoint::SqliteCheckpointStore;
use herald_domain::{Checkpoint, CheckpointStore};
use std::path::PathBuf;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;

use crate::args::{CheckpointsArgs, CheckpointsCommands};
use crate::config::AppConfig;

pub async fn execute(args: CheckpointsArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| config.general.state_db_path.clone());

    let store = SqliteCheckpointStore::new(&db_path)
        .await
        .with_context(|| format!("Failed to open state database: {}", db_path.display()))?;

    match args.command {
        CheckpointsCommands::Pending { json } => list_pending(&store, json).await,
        CheckpointsCommands::Show { id } => show(&store, &id).await,
        CheckpointsCommands::Prune { max_age_hours } => {
            let hours = max_age_hours.unwrap_or(config.general.checkpoint_max_age_hours);
            prune(&store, hours).await
        }
    }
}

async fn list_pending(store: &SqliteCheckpointStore, json: bool) -> Result<()> {
    let ids = store
        .list_pending()
        .await
        .context("Failed to list pending checkpoints")?;

    let mut checkpoints: Vec<Checkpoint> = Vec::with_capacity(ids.len());
    for id in &ids {
        if let Some(checkpoint) = store.get(id).await.context("Failed to load checkpoint")? {
            checkpoints.push(checkpoint);
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoints)?);
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!("No pending checkpoints");
        return Ok(());
    }

    println!("Pending checkpoints ({}):", checkpoints.len());
    for checkpoint in &checkpoints {
        let created = checkpoint
            .created_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| checkpoint.created_at.to_string());
        let category = checkpoint.data["category"].as_str().unwrap_or("?");
        let events = checkpoint.data["event_count"].as_u64().unwrap_or_default();

        println!(
            "  {} [{}] {} event(s) in {} since {}",
            checkpoint.id, checkpoint.status, events, category, created
        );
    }

    Ok(())
}

async fn show(store: &SqliteCheckpointStore, id: &str) -> Result<()> {
    let checkpoint = store
        .get(id)
        .await
        .context("Failed to load checkpoint")?
        .with_context(|| format!("Checkpoint not found: {}", id))?;

    println!("{}", serde_json::to_string_pretty(&checkpoint)?);
    Ok(())
}

async fn prune(store: &SqliteCheckpointStore, hours: u64) -> Result<()> {
    let removed = store
        .prune(Duration::from_secs(hours.saturating_mul(3600)))
        .await
        .context("Failed to prune checkpoints")?;

    println!("Removed {} checkpoint(s) older than {}h", removed, hours);
    Ok(())
}
