// Mining configuration, result, and engine state types

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationFactor;
use crate::error::EngineError;

use super::difficulty::Difficulty;
use super::header::BlockHeaderTemplate;
use super::strategy::OptimizationStrategy;

/// Largest search space of one run: every u32 nonce once
pub const MAX_ATTEMPTS_LIMIT: u64 = 1 << 32;

/// Parameters of a mining run, immutable while the run is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningConfig {
    pub header: BlockHeaderTemplate,
    /// Positions searched before the run completes unsuccessfully
    pub max_attempts: u64,
    /// How strongly the calibration factor steers the strategy, in [0, 1]
    pub signal_weight: f64,
    pub thread_count: usize,
    #[serde(default)]
    pub strategy: OptimizationStrategy,
}

impl MiningConfig {
    /// Check bounds against the parallelism available on this machine
    pub fn validate(&self) -> Result<(), EngineError> {
        self.validate_with_parallelism(available_parallelism())
    }

    pub fn validate_with_parallelism(&self, parallelism: usize) -> Result<(), EngineError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(EngineError::InvalidConfig {
                reason: format!(
                    "max_attempts must be in 1..={}, got {}",
                    MAX_ATTEMPTS_LIMIT, self.max_attempts
                ),
            });
        }
        if !self.signal_weight.is_finite() || !(0.0..=1.0).contains(&self.signal_weight) {
            return Err(EngineError::InvalidConfig {
                reason: format!("signal_weight must be in [0, 1], got {}", self.signal_weight),
            });
        }
        if self.thread_count == 0 || self.thread_count > parallelism {
            return Err(EngineError::InvalidConfig {
                reason: format!(
                    "thread_count must be in 1..={}, got {}",
                    parallelism, self.thread_count
                ),
            });
        }
        Ok(())
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            header: BlockHeaderTemplate::genesis(),
            max_attempts: 1 << 20,
            signal_weight: 0.5,
            thread_count: 1,
            strategy: OptimizationStrategy::default(),
        }
    }
}

/// Worker threads the machine can run in parallel
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Outcome of one completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningResult {
    pub run_id: u64,
    pub success: bool,
    /// Winning nonce, present on success
    pub nonce: Option<u32>,
    /// Display-order hex of the winning hash, present on success
    pub header_hash: Option<String>,
    /// Positions up to and including the winner, or max_attempts
    pub attempts: u64,
    /// Hashes actually computed by all workers (>= attempts on success)
    pub hashes_computed: u64,
    pub elapsed_ms: u64,
    /// Leading 64 bits of the winning hash, or the best seen on failure
    pub hash_value: u64,
    pub difficulty: Difficulty,
    /// Calibration snapshot the run used
    pub calibration: CalibrationFactor,
}

/// Engine lifecycle: Idle -> Running -> {Completed | Stopped | Failed} -> Idle.
///
/// A terminal state is held until `MiningEngine::drain_results` hands the
/// outcome over, then the engine settles back to Idle. Terminal states also
/// accept a new start directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineState::Completed | EngineState::Stopped | EngineState::Failed
        )
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            EngineState::Idle => "IDLE",
            EngineState::Running => "RUNNING",
            EngineState::Completed => "COMPLETED",
            EngineState::Stopped => "STOPPED",
            EngineState::Failed => "FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_bounds() {
        let valid = MiningConfig::default();
        assert!(valid.validate_with_parallelism(4).is_ok());

        let cases = [
            MiningConfig {
                max_attempts: 0,
                ..MiningConfig::default()
            },
            MiningConfig {
                max_attempts: MAX_ATTEMPTS_LIMIT + 1,
                ..MiningConfig::default()
            },
            MiningConfig {
                signal_weight: 1.5,
                ..MiningConfig::default()
            },
            MiningConfig {
                signal_weight: f64::NAN,
                ..MiningConfig::default()
            },
            MiningConfig {
                thread_count: 0,
                ..MiningConfig::default()
            },
            MiningConfig {
                thread_count: 5,
                ..MiningConfig::default()
            },
        ];
        for config in cases {
            assert!(matches!(
                config.validate_with_parallelism(4),
                Err(EngineError::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn test_full_nonce_space_is_allowed() {
        let config = MiningConfig {
            max_attempts: MAX_ATTEMPTS_LIMIT,
            ..MiningConfig::default()
        };
        assert!(config.validate_with_parallelism(1).is_ok());
    }

    #[test]
    fn test_config_json_defaults_strategy() {
        let json = serde_json::to_value(MiningConfig::default()).unwrap();
        let mut object = json.as_object().unwrap().clone();
        object.remove("strategy");
        let config: MiningConfig = serde_json::from_value(object.into()).unwrap();
        assert_eq!(config.strategy, OptimizationStrategy::Sequential);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!EngineState::Idle.is_terminal());
        assert!(!EngineState::Running.is_terminal());
        assert!(EngineState::Stopped.is_terminal());
    }
}
