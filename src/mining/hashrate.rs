use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Moving-average hashrate over a trailing window.
///
/// Fed with (time, cumulative hash count) samples; the rate is the count
/// difference across the window divided by its duration.
pub struct HashrateTracker {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl HashrateTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Record a sample and return the current rate in hashes per second
    pub fn observe(&mut self, at: Instant, total_hashes: u64) -> f64 {
        self.samples.push_back((at, total_hashes));
        // Keep one sample at or before the window start as the baseline
        while self.samples.len() > 2 {
            let (second, _) = self.samples[1];
            if at.saturating_duration_since(second) >= self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        self.rate()
    }

    pub fn rate(&self) -> f64 {
        let (Some(&(first_at, first)), Some(&(last_at, last))) =
            (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let seconds = last_at.saturating_duration_since(first_at).as_secs_f64();
        if seconds <= 0.0 {
            return 0.0;
        }
        last.saturating_sub(first) as f64 / seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sample_has_no_rate() {
        let mut tracker = HashrateTracker::new(Duration::from_secs(5));
        assert_eq!(tracker.observe(Instant::now(), 1000), 0.0);
    }

    #[test]
    fn test_constant_rate() {
        let start = Instant::now();
        let mut tracker = HashrateTracker::new(Duration::from_secs(5));
        let mut rate = 0.0;
        for second in 0..10u64 {
            rate = tracker.observe(start + Duration::from_secs(second), second * 2000);
        }
        assert!((rate - 2000.0).abs() < 1e-6);
    }

    #[test]
    fn test_window_forgets_old_rate() {
        let start = Instant::now();
        let mut tracker = HashrateTracker::new(Duration::from_secs(2));
        // 1000 H/s for 5 s, then 100 H/s for 5 s
        let mut total = 0;
        let mut rate = 0.0;
        for second in 1..=10u64 {
            total += if second <= 5 { 1000 } else { 100 };
            rate = tracker.observe(start + Duration::from_secs(second), total);
        }
        assert!((rate - 100.0).abs() < 1e-6, "rate {}", rate);
    }
}
