// FactorCell - published calibration factor
//
// Single writer (the calibration filter), any number of readers. Readers copy
// the factor out; nobody holds the lock across a mining run. Every publish
// bumps the generation so a reader can wait for the next update.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::state::CalibrationFactor;

#[derive(Debug, Clone, Copy)]
struct Published {
    factor: CalibrationFactor,
    generation: u64,
}

/// Snapshot cell for the calibration factor
#[derive(Clone)]
pub struct FactorCell {
    inner: Arc<(Mutex<Published>, Condvar)>,
}

impl FactorCell {
    pub fn new(factor: CalibrationFactor) -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(Published {
                    factor,
                    generation: 0,
                }),
                Condvar::new(),
            )),
        }
    }

    fn read(&self) -> Published {
        *self
            .inner
            .0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current factor
    pub fn snapshot(&self) -> CalibrationFactor {
        self.read().factor
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Factor and generation read atomically
    pub fn snapshot_with_generation(&self) -> (CalibrationFactor, u64) {
        let published = self.read();
        (published.factor, published.generation)
    }

    /// Replace the factor and wake waiters
    pub(crate) fn publish(&self, factor: CalibrationFactor) -> u64 {
        let (lock, changed) = &*self.inner;
        let mut published = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        published.factor = factor;
        published.generation += 1;
        changed.notify_all();
        published.generation
    }

    /// Wait up to `timeout` for a generation newer than `seen`.
    ///
    /// Returns the latest factor and generation either way; the caller can
    /// compare the generation to learn whether an update arrived.
    pub fn wait_newer_than(&self, seen: u64, timeout: Duration) -> (CalibrationFactor, u64) {
        let (lock, changed) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut published = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        while published.generation <= seen {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            published = match changed.wait_timeout(published, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        (published.factor, published.generation)
    }
}

impl Default for FactorCell {
    fn default() -> Self {
        Self::new(CalibrationFactor::BASELINE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_publish_bumps_generation() {
        let cell = FactorCell::default();
        assert_eq!(cell.snapshot_with_generation(), (CalibrationFactor::BASELINE, 0));

        assert_eq!(cell.publish(CalibrationFactor::new(0.7)), 1);
        assert_eq!(cell.snapshot().value(), 0.7);
        assert_eq!(cell.generation(), 1);
    }

    #[test]
    fn test_wait_times_out_without_update() {
        let cell = FactorCell::default();
        let start = Instant::now();
        let (_, generation) = cell.wait_newer_than(0, Duration::from_millis(20));
        assert_eq!(generation, 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_wakes_on_publish() {
        let cell = FactorCell::default();
        let writer = cell.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            writer.publish(CalibrationFactor::new(0.9));
        });

        let (factor, generation) = cell.wait_newer_than(0, Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(generation, 1);
        assert_eq!(factor.value(), 0.9);
    }
}
