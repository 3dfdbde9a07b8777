//! Adaptive proof-of-work search.
//!
//! The engine searches a block header's nonce space for a hash that meets
//! the current difficulty. The calibration factor chooses the order in which
//! nonces are visited through an `OptimizationStrategy`.

pub mod cancel;
pub mod difficulty;
pub mod engine;
pub mod hashrate;
pub mod header;
pub mod strategy;
pub mod types;
pub mod worker;


pub use cancel::CancelToken;
pub use difficulty::Difficulty;
pub use engine::{MiningEngine, RunHandle};
pub use hashrate::HashrateTracker;
pub use header::{hash_value, to_display_hex, BlockHeaderTemplate, HeaderHasher};
pub use strategy::{search_bias, NonceSchedule, OptimizationStrategy};
pub use types::{available_parallelism, EngineState, MiningConfig, MiningResult, MAX_ATTEMPTS_LIMIT};
