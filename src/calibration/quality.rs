// Per-electrode signal quality
//
// Quality is the fraction of a channel's AC power that sits in the low band
// of its spectrum. Slow, structured activity scores high; white noise spreads
// evenly over the band and scores near the band's share (about 0.25).
//
// The spectrum covers the channel's voltage series across the frames of one
// cycle, mean-removed, with one FFT of exactly that length.

use rustfft::{num_complex::Complex, FftPlanner};

/// Share of the positive-frequency bins counted as the low band
pub const LOW_BAND_FRACTION: f64 = 0.25;

/// Score for a channel with no AC power at all
pub const NEUTRAL_QUALITY: f64 = 0.5;

/// Channels whose mean-removed energy is below this are treated as silent
const SILENT_ENERGY_EPSILON: f64 = 1e-12;

/// Computes per-channel quality scores
pub struct QualityAnalyzer {
    planner: FftPlanner<f64>,
}

impl QualityAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Quality of one channel series, within [0, 1]
    pub fn channel_quality(&mut self, series: &[f64]) -> f64 {
        let n = series.len();
        let positive_bins = n / 2;
        if positive_bins == 0 {
            return NEUTRAL_QUALITY;
        }

        let mean = series.iter().sum::<f64>() / n as f64;
        let energy: f64 = series.iter().map(|x| (x - mean) * (x - mean)).sum();
        if !energy.is_finite() || energy < SILENT_ENERGY_EPSILON {
            return NEUTRAL_QUALITY;
        }

        let mut buffer: Vec<Complex<f64>> = series
            .iter()
            .map(|&x| Complex::new(x - mean, 0.0))
            .collect();
        let fft = self.planner.plan_fft_forward(n);
        fft.process(&mut buffer);

        let low_bins = low_band_bins(positive_bins);
        let power = |k: usize| buffer[k].norm_sqr();

        let total: f64 = (1..=positive_bins).map(power).sum();
        if total <= 0.0 || !total.is_finite() {
            return NEUTRAL_QUALITY;
        }
        let low: f64 = (1..=low_bins).map(power).sum();

        (low / total).clamp(0.0, 1.0)
    }

    /// Quality of every electrode over `series_by_electrode`
    pub fn qualities(&mut self, series_by_electrode: &[Vec<f64>]) -> Vec<f64> {
        series_by_electrode
            .iter()
            .map(|series| self.channel_quality(series))
            .collect()
    }
}

impl Default for QualityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of low-band bins (1-based, DC excluded) for `positive_bins` bins
pub fn low_band_bins(positive_bins: usize) -> usize {
    let bins = (positive_bins as f64 * LOW_BAND_FRACTION).ceil() as usize;
    bins.clamp(1, positive_bins.max(1))
}
