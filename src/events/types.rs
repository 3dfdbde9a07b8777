//! Notification contract event types.

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationFactor;
use crate::coordinator::SessionStats;
use crate::error::Severity;
use crate::mining::{Difficulty, MiningResult};
use crate::signal::{ConnectionStatus, SignalFrame};

/// Event published on the notification bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CoreEvent {
    StatusChanged {
        status: ConnectionStatus,
    },
    SignalsReceived(SignalFrame),
    Error {
        code: i32,
        message: String,
        severity: Severity,
    },
    CalibrationChanged {
        factor: CalibrationFactor,
    },
    MiningStarted {
        run_id: u64,
        difficulty: Difficulty,
        calibration: CalibrationFactor,
    },
    MiningProgress {
        run_id: u64,
        attempts: u64,
        fraction: f64,
    },
    HashrateUpdated {
        run_id: u64,
        hashes_per_second: f64,
    },
    MiningComplete(MiningResult),
    MiningStopped {
        run_id: u64,
        attempts: u64,
    },
    DifficultyAdjusted {
        difficulty: Difficulty,
    },
    Statistics(SessionStats),
}

impl CoreEvent {
    /// Short label used in logs and CLI output
    pub fn label(&self) -> &'static str {
        match self {
            CoreEvent::StatusChanged { .. } => "status_changed",
            CoreEvent::SignalsReceived(_) => "signals_received",
            CoreEvent::Error { .. } => "error",
            CoreEvent::CalibrationChanged { .. } => "calibration_changed",
            CoreEvent::MiningStarted { .. } => "mining_started",
            CoreEvent::MiningProgress { .. } => "mining_progress",
            CoreEvent::HashrateUpdated { .. } => "hashrate_updated",
            CoreEvent::MiningComplete(_) => "mining_complete",
            CoreEvent::MiningStopped { .. } => "mining_stopped",
            CoreEvent::DifficultyAdjusted { .. } => "difficulty_adjusted",
            CoreEvent::Statistics(_) => "statistics",
        }
    }

    /// Run id for events emitted by a mining run
    pub fn run_id(&self) -> Option<u64> {
        match self {
            CoreEvent::MiningStarted { run_id, .. }
            | CoreEvent::MiningProgress { run_id, .. }
            | CoreEvent::HashrateUpdated { run_id, .. }
            | CoreEvent::MiningStopped { run_id, .. } => Some(*run_id),
            CoreEvent::MiningComplete(result) => Some(result.run_id),
            _ => None,
        }
    }
}

/// Event plus its position in the delivery order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Strictly increasing, equal to the order in which consumers see events
    pub seq: u64,
    /// Milliseconds since the bus was created
    pub timestamp_ms: u64,
    pub event: CoreEvent,
}
