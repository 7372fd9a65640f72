//! Application use cases / business logic

pub mod batcher;
pub mod platform_client;
pub mod run_loop;

pub use batcher::{BatcherConfig, EventBatcher};
pub use platform_client::{PlatformClient, PlatformClientConfig, PostingError, ThreadOutcome};
pub use run_loop::{PublishResult, RunLoop, RunLoopConfig, RunLoopError};
