//! Feedback loop coordination.
//!
//! `FeedbackCoordinator` owns the signal source, calibration filter and
//! mining engine and drives them from a fixed tick. `CoordinatorHandle`
//! exposes the command contract when the loop runs on its own thread.

pub mod commands;
pub mod core;
pub mod stats;


pub use self::core::FeedbackCoordinator;
pub use commands::{Command, CommandOutcome, CoordinatorHandle};
pub use stats::SessionStats;
