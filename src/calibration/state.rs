// Calibration state - persisted factor and per-electrode weighting
//
// The state is everything a later cycle needs to reproduce the same
// decisions: the factor, the per-electrode weights, and the qualities of the
// last cycle (which select the electrodes rewarded by positive feedback).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current on-disk format
pub const CALIBRATION_FORMAT_VERSION: u32 = 1;

/// Bio-to-mining bias weight, always within [MIN, MAX].
///
/// Deserialization rejects out-of-range and non-finite values, so a corrupt
/// file can never smuggle in an unbounded factor.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct CalibrationFactor(f64);

impl CalibrationFactor {
    pub const MIN: CalibrationFactor = CalibrationFactor(0.0);
    pub const MAX: CalibrationFactor = CalibrationFactor(1.0);
    /// Midpoint of the range; the value for a fresh filter and for signals
    /// without any usable structure
    pub const BASELINE: CalibrationFactor = CalibrationFactor(0.5);

    /// Clamp `value` into range. Non-finite input yields the baseline.
    pub fn new(value: f64) -> Self {
        if !value.is_finite() {
            return Self::BASELINE;
        }
        Self(value.clamp(Self::MIN.0, Self::MAX.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for CalibrationFactor {
    fn default() -> Self {
        Self::BASELINE
    }
}

impl TryFrom<f64> for CalibrationFactor {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value.is_finite() && (Self::MIN.0..=Self::MAX.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!(
                "calibration factor {} outside [{}, {}]",
                value,
                Self::MIN.0,
                Self::MAX.0
            ))
        }
    }
}

impl From<CalibrationFactor> for f64 {
    fn from(factor: CalibrationFactor) -> Self {
        factor.0
    }
}

impl fmt::Display for CalibrationFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Persisted calibration state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    /// Format version of the persisted representation
    pub version: u32,
    pub factor: CalibrationFactor,
    /// Electrode count the weights belong to; 0 until the first cycle
    pub electrode_count: usize,
    /// Per-electrode aggregation weights
    pub weights: Vec<f64>,
    /// Per-electrode quality scores of the most recent cycle
    #[serde(default)]
    pub last_qualities: Vec<f64>,
    /// Completed calibration cycles
    #[serde(default)]
    pub cycles: u64,
    /// Mining feedback received
    #[serde(default)]
    pub successes: u64,
    #[serde(default)]
    pub failures: u64,
}

impl CalibrationState {
    /// Fresh state: baseline factor, no electrode layout yet
    pub fn new_default() -> Self {
        Self {
            version: CALIBRATION_FORMAT_VERSION,
            factor: CalibrationFactor::BASELINE,
            electrode_count: 0,
            weights: Vec::new(),
            last_qualities: Vec::new(),
            cycles: 0,
            successes: 0,
            failures: 0,
        }
    }

    /// Check the structural invariants of a loaded state
    pub fn validate(&self) -> Result<(), String> {
        if self.version == 0 || self.version > CALIBRATION_FORMAT_VERSION {
            return Err(format!("unsupported format version {}", self.version));
        }
        if self.weights.len() != self.electrode_count {
            return Err(format!(
                "{} weights for {} electrodes",
                self.weights.len(),
                self.electrode_count
            ));
        }
        if !self.last_qualities.is_empty() && self.last_qualities.len() != self.electrode_count {
            return Err(format!(
                "{} qualities for {} electrodes",
                self.last_qualities.len(),
                self.electrode_count
            ));
        }
        if self.weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err("weights must be finite and positive".to_string());
        }
        if self
            .last_qualities
            .iter()
            .any(|q| !q.is_finite() || !(0.0..=1.0).contains(q))
        {
            return Err("qualities must be finite and within [0, 1]".to_string());
        }
        Ok(())
    }
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self::new_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_clamps_and_guards_nan() {
        assert_eq!(CalibrationFactor::new(1.7), CalibrationFactor::MAX);
        assert_eq!(CalibrationFactor::new(-0.2), CalibrationFactor::MIN);
        assert_eq!(CalibrationFactor::new(f64::NAN), CalibrationFactor::BASELINE);
        assert_eq!(CalibrationFactor::new(0.25).value(), 0.25);
    }

    #[test]
    fn test_factor_rejects_out_of_range_json() {
        assert!(serde_json::from_str::<CalibrationFactor>("1.5").is_err());
        assert!(serde_json::from_str::<CalibrationFactor>("-0.1").is_err());
        let factor: CalibrationFactor = serde_json::from_str("0.75").unwrap();
        assert_eq!(factor.value(), 0.75);
    }

    #[test]
    fn test_default_state_is_valid() {
        let state = CalibrationState::new_default();
        assert_eq!(state.factor, CalibrationFactor::BASELINE);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_mismatched_weights() {
        let state = CalibrationState {
            electrode_count: 4,
            weights: vec![1.0; 3],
            ..CalibrationState::new_default()
        };
        assert!(state.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_future_version() {
        let state = CalibrationState {
            version: CALIBRATION_FORMAT_VERSION + 1,
            ..CalibrationState::new_default()
        };
        assert!(state.validate().unwrap_err().contains("version"));
    }

    #[test]
    fn test_state_without_counters_deserializes() {
        let json = r#"{"version":1,"factor":0.6,"electrode_count":2,"weights":[1.0,2.0]}"#;
        let state: CalibrationState = serde_json::from_str(json).unwrap();
        assert_eq!(state.cycles, 0);
        assert!(state.last_qualities.is_empty());
        assert!(state.validate().is_ok());
    }
}
