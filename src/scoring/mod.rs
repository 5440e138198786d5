//! Scoring model and the blocking worker pool that runs it.

pub mod model;
pub mod pool;

pub use model::ScoringModel;
pub use pool::{PoolConfig, ScorerPool};
