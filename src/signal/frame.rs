// Connection status and electrode frame types

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Connection state of the electrode array
///
/// Samples are only valid while the status is `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn display_name(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "DISCONNECTED",
            ConnectionStatus::Connecting => "CONNECTING",
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Error => "ERROR",
        }
    }
}

/// One acquisition of every electrode in the array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalFrame {
    /// Connection session the frame was acquired in
    pub session_id: u64,
    /// Position of the frame within its session
    pub sequence: u64,
    /// Acquisition time, microseconds since the Unix epoch
    pub timestamp_us: u64,
    /// Electrode count of the session; always equals `voltages_uv.len()`
    pub electrode_count: usize,
    /// Per-electrode voltage in microvolts, ordered by electrode index
    pub voltages_uv: Vec<f32>,
}

impl SignalFrame {
    pub fn new(session_id: u64, sequence: u64, timestamp_us: u64, voltages_uv: Vec<f32>) -> Self {
        Self {
            session_id,
            sequence,
            timestamp_us,
            electrode_count: voltages_uv.len(),
            voltages_uv,
        }
    }

    /// Frame stamped with the current wall clock
    pub fn now(session_id: u64, sequence: u64, voltages_uv: Vec<f32>) -> Self {
        Self::new(session_id, sequence, now_us(), voltages_uv)
    }

    /// Sample count matches the declared electrode count
    pub fn is_consistent(&self) -> bool {
        self.voltages_uv.len() == self.electrode_count
    }
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_electrode_count_matches_samples() {
        let frame = SignalFrame::new(1, 0, 10, vec![0.5; 8]);
        assert_eq!(frame.electrode_count, 8);
        assert!(frame.is_consistent());
    }

    #[test]
    fn test_tampered_frame_is_inconsistent() {
        let mut frame = SignalFrame::now(1, 0, vec![0.0; 4]);
        frame.voltages_uv.push(1.0);
        assert!(!frame.is_consistent());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionStatus::Connected).unwrap();
        assert_eq!(json, "\"connected\"");
        assert_eq!(ConnectionStatus::Error.display_name(), "ERROR");
    }
}
