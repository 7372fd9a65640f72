//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// herald: batch similar mentions and publish digests under rate and safety limits
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll mentions, batch them, and publish digests
    Run(RunArgs),

    /// Split text into post-sized chunks
    Chunk(ChunkArgs),

    /// Inspect and prune batch checkpoints
    Checkpoints(CheckpointsArgs),

    /// Configuration management
    Config(ConfigArgs),

    /// Validate configuration and show status
    Doctor(DoctorArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Write posts to the outbox file instead of publishing
    #[arg(long)]
    pub dry_run: bool,

    /// Process one poll cycle, flush pending events, and exit
    #[arg(long)]
    pub once: bool,

    /// Path to outbox file (used in dry-run mode)
    #[arg(long)]
    pub outbox: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ChunkArgs {
    /// Text to split
    #[arg(long, conflicts_with = "file")]
    pub text: Option<String>,

    /// File containing text to split (use - for stdin)
    #[arg(long, conflicts_with = "text")]
    pub file: Option<PathBuf>,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = 280)]
    pub max_chars: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CheckpointsArgs {
    /// Override state database path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CheckpointsCommands,
}

#[derive(Subcommand, Debug)]
pub enum CheckpointsCommands {
    /// List checkpoints that are still created or processing
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one checkpoint
    Show {
        /// Checkpoint ID
        id: String,
    },

    /// Delete checkpoints older than the given age
    Prune {
        /// Maximum age in hours (defaults to general.checkpoint_max_age_hours)
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Generate example configuration file
    Init {
        /// Path to write config file
        #[arg(long, default_value = "./herald.toml")]
        path: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Check specific component (config, state, x, embeddings, safety)
    #[arg(long)]
    pub check: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
