// Mining engine error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Mining engine error code constants
///
/// Error code range: 3001-3006
pub struct EngineErrorCodes {}

impl EngineErrorCodes {
    /// start() called while a run is active
    pub const ALREADY_RUNNING: i32 = 3001;

    /// Operation only legal between runs
    pub const RUN_IN_PROGRESS: i32 = 3002;

    /// MiningConfig or difficulty out of bounds
    pub const INVALID_CONFIG: i32 = 3003;

    /// A search worker panicked
    pub const WORKER_PANICKED: i32 = 3004;

    /// Engine state lock was poisoned
    pub const LOCK_POISONED: i32 = 3005;

    /// Supervisor or worker thread could not be created
    pub const SPAWN_FAILED: i32 = 3006;
}

/// Log an engine error with structured context
pub fn log_engine_error(err: &EngineError, context: &str) {
    error!(
        "Engine error in {}: code={}, component=MiningEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Mining engine errors
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Engine is not Idle
    AlreadyRunning,

    /// Difficulty can only change between runs
    RunInProgress,

    /// Configuration rejected by validation
    InvalidConfig { reason: String },

    /// A worker thread panicked during the search
    WorkerPanicked { worker: usize },

    /// Engine state lock was poisoned
    LockPoisoned { component: String },

    /// The OS refused to create a mining thread
    SpawnFailed { reason: String },
}

impl ErrorCode for EngineError {
    fn code(&self) -> i32 {
        match self {
            EngineError::AlreadyRunning => EngineErrorCodes::ALREADY_RUNNING,
            EngineError::RunInProgress => EngineErrorCodes::RUN_IN_PROGRESS,
            EngineError::InvalidConfig { .. } => EngineErrorCodes::INVALID_CONFIG,
            EngineError::WorkerPanicked { .. } => EngineErrorCodes::WORKER_PANICKED,
            EngineError::LockPoisoned { .. } => EngineErrorCodes::LOCK_POISONED,
            EngineError::SpawnFailed { .. } => EngineErrorCodes::SPAWN_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            EngineError::AlreadyRunning => {
                "Mining engine already running. Call stop() first.".to_string()
            }
            EngineError::RunInProgress => {
                "Difficulty cannot change while a run is in progress".to_string()
            }
            EngineError::InvalidConfig { reason } => format!("Invalid mining config: {}", reason),
            EngineError::WorkerPanicked { worker } => format!("Worker {} panicked", worker),
            EngineError::LockPoisoned { component } => {
                format!("Lock poisoned for component: {}", component)
            }
            EngineError::SpawnFailed { reason } => {
                format!("Failed to spawn mining thread: {}", reason)
            }
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EngineError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_codes() {
        assert_eq!(EngineError::AlreadyRunning.code(), 3001);
        assert_eq!(EngineError::RunInProgress.code(), 3002);
        assert_eq!(
            EngineError::InvalidConfig {
                reason: "x".to_string()
            }
            .code(),
            3003
        );
        assert_eq!(EngineError::WorkerPanicked { worker: 2 }.code(), 3004);
        assert_eq!(
            EngineError::LockPoisoned {
                component: "state".to_string()
            }
            .code(),
            3005
        );
        assert_eq!(
            EngineError::SpawnFailed {
                reason: "x".to_string()
            }
            .code(),
            3006
        );
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::AlreadyRunning;
        assert!(err.message().contains("already running"));

        let display = format!("{}", EngineError::RunInProgress);
        assert!(display.contains("3002"));
    }
}
