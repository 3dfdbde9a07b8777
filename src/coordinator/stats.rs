use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::mining::MiningResult;

/// Session totals owned by the coordinator; reset by `start_session`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub runs: u64,
    pub successes: u64,
    pub total_attempts: u64,
    pub best_hashrate: f64,
    pub last_hashrate: f64,
    pub frames_processed: u64,
    pub stale_frames_dropped: u64,
    pub calibration_cycles: u64,
    /// Wall clock at session start, milliseconds since the Unix epoch
    pub started_at_ms: u64,
}

impl SessionStats {
    pub fn started_now() -> Self {
        Self {
            started_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            ..Self::default()
        }
    }

    pub fn record_result(&mut self, result: &MiningResult) {
        self.runs += 1;
        if result.success {
            self.successes += 1;
        }
        self.total_attempts += result.attempts;
    }

    pub fn record_hashrate(&mut self, rate: f64) {
        if !rate.is_finite() || rate <= 0.0 {
            return;
        }
        self.last_hashrate = rate;
        self.best_hashrate = self.best_hashrate.max(rate);
    }

    pub fn success_rate(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.successes as f64 / self.runs as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationFactor;
    use crate::mining::Difficulty;

    fn result(success: bool, attempts: u64) -> MiningResult {
        MiningResult {
            run_id: 1,
            success,
            nonce: None,
            header_hash: None,
            attempts,
            hashes_computed: attempts,
            elapsed_ms: 0,
            hash_value: 0,
            difficulty: Difficulty::MIN,
            calibration: CalibrationFactor::BASELINE,
        }
    }

    #[test]
    fn test_results_accumulate() {
        let mut stats = SessionStats::default();
        stats.record_result(&result(true, 10));
        stats.record_result(&result(false, 30));
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.total_attempts, 40);
        assert_eq!(stats.success_rate(), 0.5);
    }

    #[test]
    fn test_best_hashrate_is_kept() {
        let mut stats = SessionStats::default();
        stats.record_hashrate(500.0);
        stats.record_hashrate(200.0);
        stats.record_hashrate(f64::NAN);
        assert_eq!(stats.best_hashrate, 500.0);
        assert_eq!(stats.last_hashrate, 200.0);
    }

    #[test]
    fn test_fresh_session_has_timestamp() {
        assert!(SessionStats::started_now().started_at_ms > 0);
        assert_eq!(SessionStats::default().success_rate(), 0.0);
    }
}
