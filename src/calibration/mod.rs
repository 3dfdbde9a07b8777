// Calibration module - signal quality to calibration factor
//
// This module provides four components:
// 1. CalibrationFactor / CalibrationState: the bounded factor and the
//    persisted state that reproduces future cycles
// 2. QualityAnalyzer: per-electrode spectral quality scores
// 3. CalibrationFilter: runs cycles, applies mining feedback, saves/loads
// 4. FactorCell: the snapshot cell the mining engine reads from

pub mod cell;
pub mod filter;
pub mod quality;
pub mod state;

pub use cell::FactorCell;
pub use filter::CalibrationFilter;
pub use quality::QualityAnalyzer;
pub use state::{CalibrationFactor, CalibrationState, CALIBRATION_FORMAT_VERSION};
