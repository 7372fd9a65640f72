//! herald adapters crate
//!
//! This crate contains infrastructure adapters implementing the domain ports:
//! - `x_api`: X (Twitter) API v2 platform and a scripted stub
//! - `outbox`: JSONL outbox platform for dry runs
//! - `embed`: OpenAI and offline hashing embedders
//! - `checkpoint`: SQLite and in-memory checkpoint stores
//! - `compose`: Digest composer

mod checkpoint_memory;
mod checkpoint_sqlite;

pub mod compose;
pub mod embed;
pub mod outbox;
pub mod x_api;

/// Re-exports for checkpoint adapters
pub mod checkpoint {
    pub use crate::checkpoint_memory::InMemoryCheckpointStore;
    pub use crate::checkpoint_sqlite::SqliteCheckpointStore;
}
