// Persistence IO error types

use crate::error::ErrorCode;
use std::fmt;
use std::io;
use std::path::Path;

/// IO error code constants
///
/// Error code range: 4001-4004
pub struct IoErrorCodes {}

impl IoErrorCodes {
    pub const NOT_FOUND: i32 = 4001;
    pub const PARSE_ERROR: i32 = 4002;
    pub const PERMISSION_DENIED: i32 = 4003;
    pub const OTHER: i32 = 4004;
}

/// Errors raised while reading or writing persisted state
#[derive(Debug, Clone, PartialEq)]
pub enum IoError {
    /// File does not exist
    NotFound { path: String },

    /// File exists but its contents are not a valid state
    ParseError { path: String, reason: String },

    /// Insufficient permissions for the file
    PermissionDenied { path: String },

    /// Any other OS-level failure
    Other { path: String, reason: String },
}

impl IoError {
    /// Map a `std::io::Error` for `path` onto the persistence taxonomy
    pub fn from_io(err: &io::Error, path: &Path) -> Self {
        let path = path.display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => IoError::NotFound { path },
            io::ErrorKind::PermissionDenied => IoError::PermissionDenied { path },
            _ => IoError::Other {
                path,
                reason: err.to_string(),
            },
        }
    }

    pub fn parse(path: &Path, reason: impl Into<String>) -> Self {
        IoError::ParseError {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}

impl ErrorCode for IoError {
    fn code(&self) -> i32 {
        match self {
            IoError::NotFound { .. } => IoErrorCodes::NOT_FOUND,
            IoError::ParseError { .. } => IoErrorCodes::PARSE_ERROR,
            IoError::PermissionDenied { .. } => IoErrorCodes::PERMISSION_DENIED,
            IoError::Other { .. } => IoErrorCodes::OTHER,
        }
    }

    fn message(&self) -> String {
        match self {
            IoError::NotFound { path } => format!("File not found: {}", path),
            IoError::ParseError { path, reason } => {
                format!("Failed to parse {}: {}", path, reason)
            }
            IoError::PermissionDenied { path } => format!("Permission denied: {}", path),
            IoError::Other { path, reason } => format!("IO failure on {}: {}", path, reason),
        }
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IoError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for IoError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_maps_kinds() {
        let path = Path::new("/tmp/cal.json");

        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(IoError::from_io(&err, path), IoError::NotFound { .. }));

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            IoError::from_io(&err, path),
            IoError::PermissionDenied { .. }
        ));

        let err = io::Error::new(io::ErrorKind::Interrupted, "eintr");
        match IoError::from_io(&err, path) {
            IoError::Other { reason, .. } => assert!(reason.contains("eintr")),
            other => panic!("Expected Other, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_message() {
        let err = IoError::parse(Path::new("cal.json"), "expected value at line 1");
        assert_eq!(err.code(), IoErrorCodes::PARSE_ERROR);
        assert!(err.message().contains("cal.json"));
        assert!(err.message().contains("line 1"));
    }
}
