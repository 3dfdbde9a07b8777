// Calibration error types and constants

use crate::error::{ErrorCode, IoError};
use log::error;
use std::fmt;

/// Calibration error code constants
///
/// Error code range: 2001-2005
pub struct CalibrationErrorCodes {}

impl CalibrationErrorCodes {
    /// Zero frames, too few frames, or mismatched electrode count
    pub const INSUFFICIENT_DATA: i32 = 2001;

    /// Frame contents are not usable (non-finite voltages)
    pub const MALFORMED_FRAME: i32 = 2002;

    /// Persisting or restoring the state failed
    pub const PERSISTENCE: i32 = 2003;

    /// Calibration state RwLock was poisoned
    pub const STATE_POISONED: i32 = 2004;

    /// A saved state was learned on a different electrode count
    pub const ELECTRODE_MISMATCH: i32 = 2005;
}

/// Log a calibration error with structured context
///
/// Logs the error code, component and message. Never panics.
pub fn log_calibration_error(err: &CalibrationError, context: &str) {
    error!(
        "Calibration error in {}: code={}, component=CalibrationFilter, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Calibration-related errors
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Not enough frames, or a frame with the wrong electrode count
    InsufficientData { reason: String },

    /// A frame carried non-finite voltages
    MalformedFrame { reason: String },

    /// Saving or loading the persisted state failed
    Persistence(IoError),

    /// Calibration state RwLock was poisoned
    StatePoisoned,

    /// Saved state does not fit the connected device
    ElectrodeMismatch { expected: usize, found: usize },
}

impl ErrorCode for CalibrationError {
    fn code(&self) -> i32 {
        match self {
            CalibrationError::InsufficientData { .. } => CalibrationErrorCodes::INSUFFICIENT_DATA,
            CalibrationError::MalformedFrame { .. } => CalibrationErrorCodes::MALFORMED_FRAME,
            CalibrationError::Persistence(_) => CalibrationErrorCodes::PERSISTENCE,
            CalibrationError::StatePoisoned => CalibrationErrorCodes::STATE_POISONED,
            CalibrationError::ElectrodeMismatch { .. } => {
                CalibrationErrorCodes::ELECTRODE_MISMATCH
            }
        }
    }

    fn message(&self) -> String {
        match self {
            CalibrationError::InsufficientData { reason } => {
                format!("Insufficient data: {}", reason)
            }
            CalibrationError::MalformedFrame { reason } => format!("Malformed frame: {}", reason),
            CalibrationError::Persistence(err) => format!("Persistence failed: {}", err.message()),
            CalibrationError::StatePoisoned => "Calibration state lock poisoned".to_string(),
            CalibrationError::ElectrodeMismatch { expected, found } => format!(
                "Saved state covers {} electrodes, device has {}",
                found, expected
            ),
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CalibrationError (code {}): {}",
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CalibrationError {}

impl From<IoError> for CalibrationError {
    fn from(err: IoError) -> Self {
        CalibrationError::Persistence(err)
    }
}
