// Search worker
//
// Worker w of n searches positions w, w + n, w + 2n, ... below max_attempts.
// `best` holds the smallest qualifying position found so far; a worker stops
// as soon as its next position is not below it. Since `best` only decreases,
// every position below the final winner is searched by its owner, so the
// winner is the smallest qualifying position for any worker count.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::cancel::CancelToken;
use super::difficulty::Difficulty;
use super::header::HeaderHasher;
use super::strategy::NonceSchedule;

/// No qualifying position yet
pub const NO_WINNER: u64 = u64::MAX;

/// Hashes buffered locally before they are added to the shared counter
const COUNTER_FLUSH: u64 = 256;

/// Read-only parameters shared by every worker of a run
pub struct SearchPlan<'a> {
    pub hasher: &'a HeaderHasher,
    pub schedule: NonceSchedule,
    pub difficulty: Difficulty,
    pub max_attempts: u64,
    pub worker_count: usize,
    pub cancel_check_interval: u64,
    pub cancel: &'a CancelToken,
    pub best: &'a AtomicU64,
    pub hashes: &'a AtomicU64,
}

/// Per-worker outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    /// Lowest hash value this worker computed
    pub min_hash_value: u64,
    pub cancelled: bool,
}

/// Decrements the live-worker count when the worker exits, panics included
pub struct LiveGuard<'a>(pub &'a AtomicUsize);

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub fn search(plan: &SearchPlan<'_>, worker_id: usize) -> WorkerReport {
    let step = plan.worker_count.max(1) as u64;
    let check_interval = plan.cancel_check_interval.max(1);

    let mut report = WorkerReport {
        min_hash_value: u64::MAX,
        cancelled: false,
    };
    let mut position = worker_id as u64;
    let mut computed: u64 = 0;
    let mut pending: u64 = 0;

    while position < plan.max_attempts {
        if position >= plan.best.load(Ordering::Acquire) {
            break;
        }
        if computed % check_interval == 0 && plan.cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let value = plan.hasher.hash_value(plan.schedule.nonce_at(position));
        computed += 1;
        pending += 1;
        if pending == COUNTER_FLUSH {
            plan.hashes.fetch_add(pending, Ordering::Relaxed);
            pending = 0;
        }

        report.min_hash_value = report.min_hash_value.min(value);
        if plan.difficulty.is_met_by(value) {
            plan.best.fetch_min(position, Ordering::AcqRel);
            break;
        }

        position += step;
    }

    plan.hashes.fetch_add(pending, Ordering::Relaxed);
    report
}
