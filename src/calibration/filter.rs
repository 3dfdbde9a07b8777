// CalibrationFilter - derives the calibration factor from signal quality
// and mining feedback, and persists the state behind it
//
// Cycle:
//   1. Per-electrode quality over the frames (see quality.rs)
//   2. Aggregate = weighted mean of the qualities with the persisted weights
//   3. factor' = (1 - smoothing) * factor + smoothing * aggregate
//
// Feedback:
//   success: factor' = factor + success_gain * (1 - factor); electrodes whose
//            last quality is at or above the mean move toward weight_max
//   failure: factor' = factor - failure_decay * factor; every weight relaxes
//            toward 1.0
//
// All rates are in (0, 1], so each update is a convex combination of values
// inside the bounds and repeated feedback cannot diverge.

use std::fs;
use std::path::Path;

use crate::config::CalibrationConfig;
use crate::error::{log_calibration_error, CalibrationError, IoError};
use crate::mining::MiningResult;
use crate::signal::SignalFrame;

use super::cell::FactorCell;
use super::quality::QualityAnalyzer;
use super::state::{CalibrationFactor, CalibrationState};

/// Owner and single writer of the calibration factor
pub struct CalibrationFilter {
    config: CalibrationConfig,
    state: CalibrationState,
    analyzer: QualityAnalyzer,
    cell: FactorCell,
}

impl CalibrationFilter {
    pub fn new(config: CalibrationConfig) -> Self {
        let config = sanitize_config(config);
        let state = CalibrationState::new_default();
        Self {
            cell: FactorCell::new(state.factor),
            config,
            state,
            analyzer: QualityAnalyzer::new(),
        }
    }

    /// Filter starting from an existing state
    pub fn with_state(
        config: CalibrationConfig,
        state: CalibrationState,
    ) -> Result<Self, CalibrationError> {
        state
            .validate()
            .map_err(|reason| CalibrationError::InsufficientData { reason })?;
        let mut filter = Self::new(config);
        filter.cell.publish(state.factor);
        filter.state = state;
        Ok(filter)
    }

    /// Run one calibration cycle over `frames`.
    ///
    /// Deterministic: identical state and frames give an identical factor.
    pub fn run_calibration_cycle(
        &mut self,
        frames: &[SignalFrame],
    ) -> Result<CalibrationFactor, CalibrationError> {
        let electrode_count = self.check_frames(frames).inspect_err(|err| {
            log_calibration_error(err, "run_calibration_cycle");
        })?;

        if self.state.electrode_count == 0 {
            self.state.electrode_count = electrode_count;
            self.state.weights = vec![1.0; electrode_count];
        }

        let series = channel_series(frames, electrode_count);
        let qualities = self.analyzer.qualities(&series);
        let aggregate = weighted_mean(&qualities, &self.state.weights);

        let smoothing = self.config.smoothing;
        let previous = self.state.factor.value();
        let factor = CalibrationFactor::new((1.0 - smoothing) * previous + smoothing * aggregate);

        self.state.last_qualities = qualities;
        self.state.cycles += 1;
        self.set_factor(factor);

        tracing::debug!(
            "[CalibrationFilter] Cycle {}: {} frames, aggregate={:.4}, factor {:.4} -> {}",
            self.state.cycles,
            frames.len(),
            aggregate,
            previous,
            factor
        );
        Ok(factor)
    }

    /// Nudge the factor and weights with the outcome of a mining run
    pub fn apply_mining_feedback(&mut self, result: &MiningResult) -> CalibrationFactor {
        let factor = self.state.factor.value();
        let (weight_min, weight_max) = (self.config.weight_min, self.config.weight_max);

        let next = if result.success {
            self.state.successes += 1;
            let gain = self.config.success_gain;
            let mean_quality = mean(&self.state.last_qualities);
            for (weight, quality) in self
                .state
                .weights
                .iter_mut()
                .zip(self.state.last_qualities.iter())
            {
                if *quality >= mean_quality {
                    *weight = bounded(*weight + gain * (weight_max - *weight), weight_min, weight_max, *weight);
                }
            }
            factor + gain * (1.0 - factor)
        } else {
            self.state.failures += 1;
            let decay = self.config.failure_decay;
            for weight in self.state.weights.iter_mut() {
                *weight = bounded(*weight + decay * (1.0 - *weight), weight_min, weight_max, *weight);
            }
            factor - decay * factor
        };

        let next = if next.is_finite() {
            CalibrationFactor::new(next)
        } else {
            self.state.factor
        };
        self.set_factor(next);

        tracing::debug!(
            "[CalibrationFilter] Feedback run {} success={}: factor {:.4} -> {}",
            result.run_id,
            result.success,
            factor,
            next
        );
        next
    }

    /// Persist the full state as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), IoError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| IoError::parse(path, e.to_string()))?;
        fs::write(path, json).map_err(|e| IoError::from_io(&e, path))?;

        tracing::info!(
            "[CalibrationFilter] Saved state to {} (factor {})",
            path.display(),
            self.state.factor
        );
        Ok(())
    }

    /// Restore a state saved by `save`.
    ///
    /// On any error the in-memory state is left untouched.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<CalibrationFactor, IoError> {
        let path = path.as_ref();
        let loaded = read_state(path)?;
        Ok(self.install(loaded, path))
    }

    /// `load`, rejecting a state learned on another electrode count.
    ///
    /// A state that never committed to a count fits any device.
    pub fn load_matching<P: AsRef<Path>>(
        &mut self,
        path: P,
        electrode_count: usize,
    ) -> Result<CalibrationFactor, CalibrationError> {
        let path = path.as_ref();
        let loaded = read_state(path)?;
        if loaded.electrode_count != 0 && loaded.electrode_count != electrode_count {
            let err = CalibrationError::ElectrodeMismatch {
                expected: electrode_count,
                found: loaded.electrode_count,
            };
            log_calibration_error(&err, "load_matching");
            return Err(err);
        }
        Ok(self.install(loaded, path))
    }

    fn install(&mut self, loaded: CalibrationState, path: &Path) -> CalibrationFactor {
        self.state = loaded;
        self.cell.publish(self.state.factor);

        tracing::info!(
            "[CalibrationFilter] Loaded state from {} (factor {}, {} electrodes)",
            path.display(),
            self.state.factor,
            self.state.electrode_count
        );
        self.state.factor
    }

    pub fn factor(&self) -> CalibrationFactor {
        self.state.factor
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Shared read-only view of the factor for the mining engine
    pub fn factor_cell(&self) -> FactorCell {
        self.cell.clone()
    }

    fn set_factor(&mut self, factor: CalibrationFactor) {
        self.state.factor = factor;
        self.cell.publish(factor);
    }

    /// Electrode count shared by every frame and by the current state
    fn check_frames(&self, frames: &[SignalFrame]) -> Result<usize, CalibrationError> {
        let first = frames.first().ok_or_else(|| CalibrationError::InsufficientData {
            reason: "no frames".to_string(),
        })?;
        let electrode_count = first.electrode_count;
        if electrode_count == 0 {
            return Err(CalibrationError::InsufficientData {
                reason: "frames carry no electrodes".to_string(),
            });
        }

        for frame in frames {
            if frame.electrode_count != electrode_count || !frame.is_consistent() {
                return Err(CalibrationError::InsufficientData {
                    reason: format!(
                        "frame {} has {} samples, expected {} electrodes",
                        frame.sequence,
                        frame.voltages_uv.len(),
                        electrode_count
                    ),
                });
            }
            if frame.voltages_uv.iter().any(|v| !v.is_finite()) {
                return Err(CalibrationError::MalformedFrame {
                    reason: format!("frame {} contains non-finite voltages", frame.sequence),
                });
            }
        }

        if self.state.electrode_count != 0 && self.state.electrode_count != electrode_count {
            return Err(CalibrationError::InsufficientData {
                reason: format!(
                    "state calibrated for {} electrodes, frames have {}",
                    self.state.electrode_count, electrode_count
                ),
            });
        }
        Ok(electrode_count)
    }
}

/// Clamp rates into (0, 1] and weight bounds into a usable order
/// Read and validate a saved state without touching any filter
fn read_state(path: &Path) -> Result<CalibrationState, IoError> {
    let contents = fs::read_to_string(path).map_err(|e| IoError::from_io(&e, path))?;
    let loaded: CalibrationState =
        serde_json::from_str(&contents).map_err(|e| IoError::parse(path, e.to_string()))?;
    loaded
        .validate()
        .map_err(|reason| IoError::parse(path, reason))?;
    Ok(loaded)
}

fn sanitize_config(mut config: CalibrationConfig) -> CalibrationConfig {
    let rate = |value: f64, fallback: f64| {
        if value.is_finite() && value > 0.0 && value <= 1.0 {
            value
        } else {
            tracing::warn!(
                "[CalibrationFilter] Rate {} outside (0, 1], using {}",
                value,
                fallback
            );
            fallback
        }
    };
    let defaults = CalibrationConfig::default();
    config.smoothing = rate(config.smoothing, defaults.smoothing);
    config.success_gain = rate(config.success_gain, defaults.success_gain);
    config.failure_decay = rate(config.failure_decay, defaults.failure_decay);

    if !(config.weight_min.is_finite() && config.weight_min > 0.0 && config.weight_min <= 1.0) {
        config.weight_min = defaults.weight_min;
    }
    if !(config.weight_max.is_finite() && config.weight_max >= 1.0) {
        config.weight_max = defaults.weight_max;
    }
    config
}

/// Transpose frames into one voltage series per electrode
fn channel_series(frames: &[SignalFrame], electrode_count: usize) -> Vec<Vec<f64>> {
    let mut series = vec![Vec::with_capacity(frames.len()); electrode_count];
    for frame in frames {
        for (channel, &voltage) in series.iter_mut().zip(frame.voltages_uv.iter()) {
            channel.push(voltage as f64);
        }
    }
    series
}

fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    let total_weight: f64 = weights.iter().sum();
    if total_weight <= 0.0 || !total_weight.is_finite() {
        return CalibrationFactor::BASELINE.value();
    }
    values
        .iter()
        .zip(weights.iter())
        .map(|(v, w)| v * w)
        .sum::<f64>()
        / total_weight
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Clamp a weight update; non-finite results keep `previous`
fn bounded(value: f64, min: f64, max: f64, previous: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::{Difficulty, MiningResult};

    fn frames(count: usize, electrodes: usize, f: impl Fn(usize, usize) -> f32) -> Vec<SignalFrame> {
        (0..count)
            .map(|i| {
                let voltages = (0..electrodes).map(|e| f(i, e)).collect();
                SignalFrame::new(1, i as u64, i as u64 * 1000, voltages)
            })
            .collect()
    }

    fn structured(count: usize) -> Vec<SignalFrame> {
        frames(count, 4, |i, e| {
            let slow = (i as f32 * 0.1 + e as f32).sin() * 20.0;
            let fast = if (i + e) % 2 == 0 { 3.0 } else { -3.0 };
            slow + fast * e as f32
        })
    }

    fn result(success: bool) -> MiningResult {
        MiningResult {
            run_id: 1,
            success,
            nonce: success.then_some(7),
            header_hash: None,
            attempts: 8,
            hashes_computed: 8,
            elapsed_ms: 1,
            hash_value: 0,
            difficulty: Difficulty::MIN,
            calibration: CalibrationFactor::BASELINE,
        }
    }

    #[test]
    fn test_flat_signal_stays_at_baseline() {
        let mut filter = CalibrationFilter::new(CalibrationConfig::default());
        let flat = frames(100, 8, |_, _| 0.0);

        for _ in 0..5 {
            let factor = filter.run_calibration_cycle(&flat).unwrap();
            assert_eq!(factor, CalibrationFactor::BASELINE);
        }
        assert_eq!(filter.state().weights, vec![1.0; 8]);
    }

    #[test]
    fn test_flat_signal_converges_to_baseline_from_elsewhere() {
        let mut filter = CalibrationFilter::new(CalibrationConfig::default());
        for _ in 0..20 {
            filter.apply_mining_feedback(&result(true));
        }
        assert!(filter.factor().value() > 0.8);

        let flat = frames(100, 8, |_, _| 0.0);
        for _ in 0..60 {
            filter.run_calibration_cycle(&flat).unwrap();
        }
        assert!((filter.factor().value() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_cycle_is_deterministic() {
        let input = structured(128);
        let mut a = CalibrationFilter::new(CalibrationConfig::default());
        let mut b = CalibrationFilter::new(CalibrationConfig::default());
        assert_eq!(
            a.run_calibration_cycle(&input).unwrap(),
            b.run_calibration_cycle(&input).unwrap()
        );
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn test_empty_input_is_insufficient() {
        let mut filter = CalibrationFilter::new(CalibrationConfig::default());
        assert!(matches!(
            filter.run_calibration_cycle(&[]),
            Err(CalibrationError::InsufficientData { .. })
        ));
        assert_eq!(filter.state().cycles, 0);
    }

    #[test]
    fn test_mixed_electrode_counts_are_insufficient() {
        let mut filter = CalibrationFilter::new(CalibrationConfig::default());
        let mut input = frames(10, 4, |_, _| 1.0);
        input.push(SignalFrame::new(1, 10, 0, vec![1.0; 3]));
        assert!(matches!(
            filter.run_calibration_cycle(&input),
            Err(CalibrationError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_frames_for_other_layout_are_insufficient() {
        let mut filter = CalibrationFilter::new(CalibrationConfig::default());
        filter.run_calibration_cycle(&frames(10, 4, |_, _| 0.0)).unwrap();
        assert!(matches!(
            filter.run_calibration_cycle(&frames(10, 6, |_, _| 0.0)),
            Err(CalibrationError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_nan_voltage_is_malformed() {
        let mut filter = CalibrationFilter::new(CalibrationConfig::default());
        let input = frames(10, 2, |i, _| if i == 5 { f32::NAN } else { 0.0 });
        assert!(matches!(
            filter.run_calibration_cycle(&input),
            Err(CalibrationError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_feedback_never_leaves_bounds() {
        let mut filter = CalibrationFilter::new(CalibrationConfig {
            success_gain: 1.0,
            failure_decay: 1.0,
            ..CalibrationConfig::default()
        });
        filter.run_calibration_cycle(&structured(64)).unwrap();

        for i in 0..500 {
            let factor = filter.apply_mining_feedback(&result(i % 3 != 0));
            assert!((0.0..=1.0).contains(&factor.value()));
            for weight in &filter.state().weights {
                assert!((0.1..=4.0).contains(weight));
            }
        }
    }

    #[test]
    fn test_feedback_is_monotonic() {
        let mut filter = CalibrationFilter::new(CalibrationConfig::default());
        let before = filter.factor();
        let up = filter.apply_mining_feedback(&result(true));
        assert!(up > before);
        let down = filter.apply_mining_feedback(&result(false));
        assert!(down < up);
        assert_eq!(filter.state().successes, 1);
        assert_eq!(filter.state().failures, 1);
    }

    #[test]
    fn test_success_rewards_high_quality_electrodes() {
        let mut filter = CalibrationFilter::new(CalibrationConfig::default());
        filter.run_calibration_cycle(&structured(128)).unwrap();
        let qualities = filter.state().last_qualities.clone();
        let mean_quality = mean(&qualities);

        filter.apply_mining_feedback(&result(true));
        for (weight, quality) in filter.state().weights.iter().zip(qualities.iter()) {
            if *quality >= mean_quality {
                assert!(*weight > 1.0);
            } else {
                assert_eq!(*weight, 1.0);
            }
        }
    }

    #[test]
    fn test_invalid_rates_fall_back_to_defaults() {
        let filter = CalibrationFilter::new(CalibrationConfig {
            smoothing: 0.0,
            success_gain: 3.0,
            failure_decay: f64::NAN,
            ..CalibrationConfig::default()
        });
        assert_eq!(filter.config(), &CalibrationConfig::default());
    }

    #[test]
    fn test_factor_cell_follows_updates() {
        let mut filter = CalibrationFilter::new(CalibrationConfig::default());
        let cell = filter.factor_cell();
        let generation = cell.generation();

        let factor = filter.apply_mining_feedback(&result(true));
        assert_eq!(cell.snapshot(), factor);
        assert!(cell.generation() > generation);
    }
}
