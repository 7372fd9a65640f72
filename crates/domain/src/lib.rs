//! herald domain crate
//!
//! Core logic for batching external events and posting to a rate-limited
//! social platform, following hexagonal architecture:
//! - `model`: Domain entities and value objects
//! - `ports`: Trait definitions for external dependencies (adapters)
//! - `similarity`, `ratelimit`, `governor`, `text`: Core components
//! - `usecases`: Batching, gated posting and the run loop

pub mod governor;
pub mod model;
pub mod ports;
pub mod ratelimit;
pub mod similarity;
pub mod text;
pub mod usecases;

pub use governor::{ApiErrorKind, GovernorConfig, GovernorStatus, SafetyGovernor};
pub use model::*;
pub use ports::*;
pub use ratelimit::{LimitSpec, RateLimiter, WindowSnapshot};
pub use similarity::{SimilarityEngine, cosine_similarity};
