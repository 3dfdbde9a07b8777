// BioMiner Core - bio-feedback proof-of-work optimizer
// Electrode signals steer a nonce search through a learned calibration factor

// Module declarations
pub mod calibration;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod mining;
pub mod signal;

// Re-exports for convenience
pub use calibration::{CalibrationFactor, CalibrationFilter, CalibrationState, FactorCell};
pub use config::AppConfig;
pub use coordinator::{Command, CommandOutcome, CoordinatorHandle, FeedbackCoordinator, SessionStats};
pub use error::{CoreError, ErrorCode, Severity};
pub use events::{CoreEvent, EventBus, EventEnvelope, EventReceiver};
pub use mining::{Difficulty, MiningConfig, MiningEngine, MiningResult, OptimizationStrategy};
pub use signal::{ConnectionStatus, ElectrodeBackend, SignalFrame, SignalSource};

use tracing::level_filters::LevelFilter;

/// Install the global tracing subscriber.
///
/// `log` records from dependencies are forwarded as well. Calling this more
/// than once is harmless; later calls keep the first subscriber.
pub fn init_logging(level: LevelFilter) {
    if tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok()
    {
        log::info!("Logging initialized at {}", level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging(LevelFilter::WARN);
        init_logging(LevelFilter::DEBUG);
    }
}
