// Optimization strategies - calibration factor to nonce order
//
// A run searches positions 0..max_attempts; a schedule maps each position to
// a nonce. All schedules are bijections on u32, so max_attempts <= 2^32
// positions never repeat a nonce, and each mapping depends only on the
// calibration snapshot and the signal weight.
//
// bias = signal_weight * factor + (1 - signal_weight) * 0.5
//
//   Sequential        nonce = i                     (calibration ignored)
//   CalibratedOffset  nonce = start + i             start  = floor(bias * (2^32 - 1))
//   CalibratedStride  nonce = i * stride            stride = 2 * floor(bias * 2^16) + 1
//
// Arithmetic is mod 2^32. The stride is odd, hence invertible mod 2^32.

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationFactor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    #[default]
    Sequential,
    CalibratedOffset,
    CalibratedStride,
}

impl OptimizationStrategy {
    pub const ALL: [OptimizationStrategy; 3] = [
        OptimizationStrategy::Sequential,
        OptimizationStrategy::CalibratedOffset,
        OptimizationStrategy::CalibratedStride,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OptimizationStrategy::Sequential => "sequential",
            OptimizationStrategy::CalibratedOffset => "calibrated_offset",
            OptimizationStrategy::CalibratedStride => "calibrated_stride",
        }
    }
}

/// Blend of the calibration factor and the neutral midpoint
pub fn search_bias(factor: CalibrationFactor, signal_weight: f64) -> f64 {
    let weight = signal_weight.clamp(0.0, 1.0);
    (weight * factor.value() + (1.0 - weight) * 0.5).clamp(0.0, 1.0)
}

/// Position-to-nonce mapping of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceSchedule {
    start: u32,
    stride: u32,
}

impl NonceSchedule {
    pub fn new(
        strategy: OptimizationStrategy,
        factor: CalibrationFactor,
        signal_weight: f64,
    ) -> Self {
        let bias = search_bias(factor, signal_weight);
        match strategy {
            OptimizationStrategy::Sequential => Self { start: 0, stride: 1 },
            OptimizationStrategy::CalibratedOffset => Self {
                start: (bias * u32::MAX as f64).floor() as u32,
                stride: 1,
            },
            OptimizationStrategy::CalibratedStride => Self {
                start: 0,
                stride: 2 * (bias * 65_536.0).floor() as u32 + 1,
            },
        }
    }

    /// Nonce searched at `position` (positions are below 2^32)
    pub fn nonce_at(&self, position: u64) -> u32 {
        self.start
            .wrapping_add((position as u32).wrapping_mul(self.stride))
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }
}
