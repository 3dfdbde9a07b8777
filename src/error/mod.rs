// Error types for the bio-feedback mining core
//
// One enum per component family, each carrying a numeric code so the
// command contract can report failures without string matching.

mod calibration;
mod engine;
mod io;
mod signal;

pub use calibration::{log_calibration_error, CalibrationError, CalibrationErrorCodes};
pub use engine::{log_engine_error, EngineError, EngineErrorCodes};
pub use io::{IoError, IoErrorCodes};
pub use signal::{
    log_signal_error, AcquisitionError, AcquisitionErrorCodes, ConnectionError,
    ConnectionErrorCodes,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the notification contract.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

/// How far an error reaches
///
/// Recoverable errors are logged and the loop continues; fatal errors end the
/// owning component's current operation (acquisition stops, mining run aborts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Recoverable,
    Fatal,
}

/// Umbrella error returned by the command contract
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    Connection(ConnectionError),
    Acquisition(AcquisitionError),
    Calibration(CalibrationError),
    Engine(EngineError),
    Io(IoError),
    /// The coordinator thread is gone or dropped the reply channel
    CoordinatorUnavailable,
}

impl CoreError {
    /// Classify the error for the coordinator's error notification
    pub fn severity(&self) -> Severity {
        match self {
            CoreError::Connection(_) => Severity::Fatal,
            CoreError::Acquisition(AcquisitionError::HardwareFault { .. }) => Severity::Fatal,
            CoreError::Acquisition(_) => Severity::Recoverable,
            CoreError::Calibration(CalibrationError::StatePoisoned) => Severity::Fatal,
            CoreError::Calibration(_) => Severity::Recoverable,
            CoreError::Engine(EngineError::WorkerPanicked { .. }) => Severity::Fatal,
            CoreError::Engine(EngineError::LockPoisoned { .. }) => Severity::Fatal,
            CoreError::Engine(EngineError::SpawnFailed { .. }) => Severity::Fatal,
            CoreError::Engine(_) => Severity::Recoverable,
            CoreError::Io(_) => Severity::Recoverable,
            CoreError::CoordinatorUnavailable => Severity::Fatal,
        }
    }
}

impl ErrorCode for CoreError {
    fn code(&self) -> i32 {
        match self {
            CoreError::Connection(err) => err.code(),
            CoreError::Acquisition(err) => err.code(),
            CoreError::Calibration(err) => err.code(),
            CoreError::Engine(err) => err.code(),
            CoreError::Io(err) => err.code(),
            CoreError::CoordinatorUnavailable => 5001,
        }
    }

    fn message(&self) -> String {
        match self {
            CoreError::Connection(err) => err.message(),
            CoreError::Acquisition(err) => err.message(),
            CoreError::Calibration(err) => err.message(),
            CoreError::Engine(err) => err.message(),
            CoreError::Io(err) => err.message(),
            CoreError::CoordinatorUnavailable => "Coordinator thread is not running".to_string(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoreError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for CoreError {}

impl From<ConnectionError> for CoreError {
    fn from(err: ConnectionError) -> Self {
        CoreError::Connection(err)
    }
}

impl From<AcquisitionError> for CoreError {
    fn from(err: AcquisitionError) -> Self {
        CoreError::Acquisition(err)
    }
}

impl From<CalibrationError> for CoreError {
    fn from(err: CalibrationError) -> Self {
        CoreError::Calibration(err)
    }
}

impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        CoreError::Engine(err)
    }
}

impl From<IoError> for CoreError {
    fn from(err: IoError) -> Self {
        CoreError::Io(err)
    }
}
