// Signal acquisition error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Connection error code constants
///
/// Error code range: 1001-1004
pub struct ConnectionErrorCodes {}

impl ConnectionErrorCodes {
    /// Device did not answer
    pub const DEVICE_UNREACHABLE: i32 = 1001;

    /// Device answered but the handshake failed
    pub const HANDSHAKE_FAILED: i32 = 1002;

    /// Device configuration out of bounds
    pub const INVALID_DEVICE_CONFIG: i32 = 1003;

    /// Signal source lock was poisoned
    pub const LOCK_POISONED: i32 = 1004;
}

/// Acquisition error code constants
///
/// Error code range: 1101-1104
pub struct AcquisitionErrorCodes {}

impl AcquisitionErrorCodes {
    /// Acquisition requires a Connected source
    pub const NOT_CONNECTED: i32 = 1101;

    /// Acquisition thread already running
    pub const ALREADY_ACQUIRING: i32 = 1102;

    /// Hardware fault while streaming
    pub const HARDWARE_FAULT: i32 = 1103;

    /// Signal source lock was poisoned
    pub const LOCK_POISONED: i32 = 1104;
}

/// Log a connection or acquisition error with structured context
pub fn log_signal_error(err: &dyn ErrorCode, context: &str) {
    error!(
        "Signal error in {}: code={}, component=SignalSource, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised while establishing a device connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Device could not be reached
    DeviceUnreachable { device: String },

    /// Handshake with the device failed
    HandshakeFailed { reason: String },

    /// Device configuration is invalid
    InvalidDeviceConfig { reason: String },

    /// Signal source lock was poisoned
    LockPoisoned,
}

impl ErrorCode for ConnectionError {
    fn code(&self) -> i32 {
        match self {
            ConnectionError::DeviceUnreachable { .. } => ConnectionErrorCodes::DEVICE_UNREACHABLE,
            ConnectionError::HandshakeFailed { .. } => ConnectionErrorCodes::HANDSHAKE_FAILED,
            ConnectionError::InvalidDeviceConfig { .. } => {
                ConnectionErrorCodes::INVALID_DEVICE_CONFIG
            }
            ConnectionError::LockPoisoned => ConnectionErrorCodes::LOCK_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            ConnectionError::DeviceUnreachable { device } => {
                format!("Device unreachable: {}", device)
            }
            ConnectionError::HandshakeFailed { reason } => {
                format!("Handshake failed: {}", reason)
            }
            ConnectionError::InvalidDeviceConfig { reason } => {
                format!("Invalid device configuration: {}", reason)
            }
            ConnectionError::LockPoisoned => "Signal source lock poisoned".to_string(),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConnectionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ConnectionError {}

/// Errors raised while streaming frames
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    /// Source is not in the Connected state
    NotConnected,

    /// Acquisition already running
    AlreadyAcquiring,

    /// Hardware reported a fault mid-stream
    HardwareFault { details: String },

    /// Signal source lock was poisoned
    LockPoisoned,
}

impl ErrorCode for AcquisitionError {
    fn code(&self) -> i32 {
        match self {
            AcquisitionError::NotConnected => AcquisitionErrorCodes::NOT_CONNECTED,
            AcquisitionError::AlreadyAcquiring => AcquisitionErrorCodes::ALREADY_ACQUIRING,
            AcquisitionError::HardwareFault { .. } => AcquisitionErrorCodes::HARDWARE_FAULT,
            AcquisitionError::LockPoisoned => AcquisitionErrorCodes::LOCK_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            AcquisitionError::NotConnected => {
                "Signal source not connected. Call connect() first.".to_string()
            }
            AcquisitionError::AlreadyAcquiring => "Acquisition already running".to_string(),
            AcquisitionError::HardwareFault { details } => {
                format!("Hardware fault: {}", details)
            }
            AcquisitionError::LockPoisoned => "Signal source lock poisoned".to_string(),
        }
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AcquisitionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AcquisitionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_codes() {
        assert_eq!(
            ConnectionError::DeviceUnreachable {
                device: "mea0".to_string()
            }
            .code(),
            1001
        );
        assert_eq!(
            ConnectionError::HandshakeFailed {
                reason: "timeout".to_string()
            }
            .code(),
            1002
        );
        assert_eq!(
            ConnectionError::InvalidDeviceConfig {
                reason: "0 electrodes".to_string()
            }
            .code(),
            1003
        );
        assert_eq!(ConnectionError::LockPoisoned.code(), 1004);
    }

    #[test]
    fn test_acquisition_error_codes() {
        assert_eq!(AcquisitionError::NotConnected.code(), 1101);
        assert_eq!(AcquisitionError::AlreadyAcquiring.code(), 1102);
        assert_eq!(
            AcquisitionError::HardwareFault {
                details: "x".to_string()
            }
            .code(),
            1103
        );
        assert_eq!(AcquisitionError::LockPoisoned.code(), 1104);
    }

    #[test]
    fn test_messages() {
        let err = ConnectionError::HandshakeFailed {
            reason: "no ack".to_string(),
        };
        assert_eq!(err.message(), "Handshake failed: no ack");

        let err = AcquisitionError::NotConnected;
        assert!(err.message().contains("not connected"));

        let display = format!("{}", AcquisitionError::AlreadyAcquiring);
        assert!(display.contains("AcquisitionError"));
        assert!(display.contains("1102"));
    }
}
