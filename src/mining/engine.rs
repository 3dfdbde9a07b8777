// MiningEngine - parallel nonce search with cooperative cancellation
//
// Threads:
// - Supervisor: one per start(); owns the run loop, reports progress and
//   hashrate, publishes the outcome. In continuous mode it starts the next
//   run itself.
// - Workers: scoped threads inside the supervisor, one per thread_count.
//   Workers only touch the shared position/hash counters; they never call
//   into calibration or acquisition.
//
// Guarantees:
// - The calibration snapshot and difficulty of a run are fixed when the run
//   enters Running.
// - stop() returns after the supervisor has joined every worker and
//   published MiningStopped; no run event follows it.
// - Completed results are queued for drain_results() in addition to the
//   MiningComplete event, so a lagging bus consumer cannot lose feedback.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::calibration::{CalibrationFactor, FactorCell};
use crate::config::EngineConfig;
use crate::error::{log_engine_error, EngineError, ErrorCode, Severity};
use crate::events::{CoreEvent, EventBus};

use super::cancel::CancelToken;
use super::difficulty::Difficulty;
use super::hashrate::HashrateTracker;
use super::header::{hash_value, to_display_hex, HeaderHasher};
use super::strategy::NonceSchedule;
use super::types::{EngineState, MiningConfig, MiningResult};
use super::worker::{search, LiveGuard, SearchPlan, WorkerReport, NO_WINNER};

/// Supervisor polling period while workers run
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Completed results kept for the coordinator before the oldest is dropped
const RESULT_QUEUE_LIMIT: usize = 256;

/// Handle to a started run (or, in continuous mode, to the first run)
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: u64,
    cancel: CancelToken,
}

impl RunHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Request cancellation without waiting; `MiningEngine::stop` waits
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Where the next run's calibration comes from
enum RunMode {
    Single,
    Continuous {
        cell: FactorCell,
        auto_retarget: bool,
    },
}

/// Parameters fixed when a run enters Running
#[derive(Debug, Clone, Copy)]
struct RunTicket {
    run_id: u64,
    difficulty: Difficulty,
    calibration: CalibrationFactor,
}

enum RunOutcome {
    Completed(MiningResult),
    Stopped { attempts: u64 },
    Failed(EngineError),
}

struct Control {
    state: EngineState,
    difficulty: Difficulty,
    current_run: Option<u64>,
    next_run_id: u64,
    last_hashrate: f64,
    last_error: Option<EngineError>,
}

/// State shared between the engine handle and its supervisor
struct Shared {
    config: EngineConfig,
    bus: EventBus,
    control: Mutex<Control>,
    results: Mutex<VecDeque<MiningResult>>,
}

struct Supervisor {
    cancel: CancelToken,
    handle: JoinHandle<()>,
    continuous: bool,
}

impl Supervisor {
    /// A single-run supervisor that has left Running has already published
    /// its outcome and is only returning
    fn is_active(&self, state: EngineState) -> bool {
        !self.handle.is_finished() && (self.continuous || state == EngineState::Running)
    }
}

/// Adaptive mining engine
pub struct MiningEngine {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl MiningEngine {
    pub fn new(config: EngineConfig, bus: EventBus) -> Self {
        let difficulty = Difficulty::new(config.initial_difficulty).unwrap_or(Difficulty::MIN);
        Self {
            shared: Arc::new(Shared {
                config,
                bus,
                control: Mutex::new(Control {
                    state: EngineState::Idle,
                    difficulty,
                    current_run: None,
                    next_run_id: 1,
                    last_hashrate: 0.0,
                    last_error: None,
                }),
                results: Mutex::new(VecDeque::new()),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Start a single run with a fixed calibration snapshot.
    ///
    /// Non-blocking; the outcome arrives as MiningComplete (and through
    /// `drain_results`), MiningStopped, or an Error event.
    pub fn start(
        &self,
        config: MiningConfig,
        calibration: CalibrationFactor,
    ) -> Result<RunHandle, EngineError> {
        self.launch(config, calibration, RunMode::Single)
    }

    /// Start continuous mining. After each completed run the engine waits up
    /// to `feedback_wait_ms` for the cell to change, then samples it for the
    /// next run. With `auto_retarget` the difficulty doubles after a success
    /// and halves after a failure.
    pub fn start_continuous(
        &self,
        config: MiningConfig,
        cell: FactorCell,
        auto_retarget: bool,
    ) -> Result<RunHandle, EngineError> {
        let calibration = cell.snapshot();
        self.launch(
            config,
            calibration,
            RunMode::Continuous {
                cell,
                auto_retarget,
            },
        )
    }

    /// Cancel the active run (or continuous session) and wait for the
    /// supervisor to finish. Safe to call when idle.
    ///
    /// Blocks until every worker has seen the cancel flag, which takes at
    /// most one `cancel_check_interval` of hashing per worker.
    pub fn stop(&self) -> Result<(), EngineError> {
        let supervisor = self.lock_supervisor()?.take();
        let Some(supervisor) = supervisor else {
            return Ok(());
        };

        supervisor.cancel.cancel();
        if supervisor.handle.join().is_err() {
            let err = EngineError::WorkerPanicked { worker: 0 };
            let mut control = self.shared.control();
            control.state = EngineState::Failed;
            control.current_run = None;
            control.last_error = Some(err.clone());
            log_engine_error(&err, "stop");
            return Err(err);
        }
        Ok(())
    }

    /// Change the difficulty used by the next run
    pub fn adjust_difficulty(&self, difficulty: Difficulty) -> Result<(), EngineError> {
        let mut control = self.shared.control();
        if control.state == EngineState::Running {
            let err = EngineError::RunInProgress;
            log_engine_error(&err, "adjust_difficulty");
            return Err(err);
        }
        control.difficulty = difficulty;
        self.shared
            .bus
            .publish(CoreEvent::DifficultyAdjusted { difficulty });
        tracing::info!("[MiningEngine] Difficulty set to {}", difficulty);
        Ok(())
    }

    pub fn difficulty(&self) -> Difficulty {
        self.shared.control().difficulty
    }

    pub fn state(&self) -> EngineState {
        self.shared.control().state
    }

    /// Run id of the run currently in Running, if any
    pub fn current_run(&self) -> Option<u64> {
        self.shared.control().current_run
    }

    /// True while a supervisor is alive (a run or a continuous session)
    pub fn is_running(&self) -> bool {
        let state = self.state();
        match self.supervisor.lock() {
            Ok(slot) => slot
                .as_ref()
                .map(|s| s.is_active(state))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Most recent moving-average hashrate
    pub fn last_hashrate(&self) -> f64 {
        self.shared.control().last_hashrate
    }

    /// Error that ended the last failed run
    pub fn last_error(&self) -> Option<EngineError> {
        self.shared.control().last_error.clone()
    }

    /// Completed results not yet handed to the coordinator, oldest first.
    ///
    /// Once a finished run has been handed over the engine settles back to
    /// Idle.
    pub fn drain_results(&self) -> Vec<MiningResult> {
        let results: Vec<_> = self.shared.results().drain(..).collect();
        self.settle_idle();
        results
    }

    /// Terminal -> Idle, unless a supervisor is still active or results wait
    fn settle_idle(&self) {
        let Ok(slot) = self.supervisor.lock() else {
            return;
        };
        let mut control = self.shared.control();
        if !control.state.is_terminal() {
            return;
        }
        let active = slot
            .as_ref()
            .map(|s| s.is_active(control.state))
            .unwrap_or(false);
        if !active && self.shared.results().is_empty() {
            control.state = EngineState::Idle;
        }
    }

    fn launch(
        &self,
        config: MiningConfig,
        calibration: CalibrationFactor,
        mode: RunMode,
    ) -> Result<RunHandle, EngineError> {
        config.validate().inspect_err(|err| {
            log_engine_error(err, "start");
        })?;

        let mut slot = self.lock_supervisor()?;
        if let Some(previous) = slot.take() {
            if previous.is_active(self.state()) {
                *slot = Some(previous);
                let err = EngineError::AlreadyRunning;
                log_engine_error(&err, "start");
                return Err(err);
            }
            // Supervisor of an earlier run; only reap it
            let _ = previous.handle.join();
        }

        let continuous = matches!(mode, RunMode::Continuous { .. });

        let ticket = self.shared.begin_run(calibration)?;
        let cancel = CancelToken::new();

        let shared = Arc::clone(&self.shared);
        let supervisor_cancel = cancel.clone();
        let spawned = thread::Builder::new()
            .name(format!("mining-supervisor-{}", ticket.run_id))
            .spawn(move || supervise(shared, config, mode, supervisor_cancel, ticket));

        match spawned {
            Ok(handle) => {
                *slot = Some(Supervisor {
                    cancel: cancel.clone(),
                    handle,
                    continuous,
                });
                Ok(RunHandle {
                    run_id: ticket.run_id,
                    cancel,
                })
            }
            Err(spawn_err) => {
                let err = EngineError::SpawnFailed {
                    reason: spawn_err.to_string(),
                };
                self.shared.finish_failed(ticket.run_id, err.clone());
                Err(err)
            }
        }
    }

    fn lock_supervisor(&self) -> Result<MutexGuard<'_, Option<Supervisor>>, EngineError> {
        self.supervisor.lock().map_err(|_| {
            let err = EngineError::LockPoisoned {
                component: "supervisor".to_string(),
            };
            log_engine_error(&err, "lock_supervisor");
            err
        })
    }
}

impl Drop for MiningEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl Shared {
    /// Control data is plain values, so a poisoned lock is still usable
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn results(&self) -> MutexGuard<'_, VecDeque<MiningResult>> {
        self.results
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enter Running with the current difficulty and `calibration`
    fn begin_run(&self, calibration: CalibrationFactor) -> Result<RunTicket, EngineError> {
        let mut control = self.control();
        if control.state == EngineState::Running {
            let err = EngineError::AlreadyRunning;
            log_engine_error(&err, "begin_run");
            return Err(err);
        }

        let ticket = RunTicket {
            run_id: control.next_run_id,
            difficulty: control.difficulty,
            calibration,
        };
        control.next_run_id += 1;
        control.state = EngineState::Running;
        control.current_run = Some(ticket.run_id);
        control.last_error = None;

        self.bus.publish(CoreEvent::MiningStarted {
            run_id: ticket.run_id,
            difficulty: ticket.difficulty,
            calibration,
        });
        tracing::info!(
            "[MiningEngine] Run {} started (difficulty {}, calibration {})",
            ticket.run_id,
            ticket.difficulty,
            calibration
        );
        Ok(ticket)
    }

    fn finish_completed(&self, result: MiningResult, max_attempts: u64) {
        let mut control = self.control();

        self.bus.publish(CoreEvent::MiningProgress {
            run_id: result.run_id,
            attempts: result.attempts,
            fraction: fraction(result.attempts, max_attempts),
        });

        {
            let mut results = self.results();
            if results.len() >= RESULT_QUEUE_LIMIT {
                results.pop_front();
                tracing::warn!("[MiningEngine] Result queue full, dropped oldest result");
            }
            results.push_back(result.clone());
        }

        tracing::info!(
            "[MiningEngine] Run {} completed: success={}, attempts={}, {} ms",
            result.run_id,
            result.success,
            result.attempts,
            result.elapsed_ms
        );
        self.bus.publish(CoreEvent::MiningComplete(result));

        control.state = EngineState::Completed;
        control.current_run = None;
    }

    fn finish_stopped(&self, run_id: u64, attempts: u64) {
        let mut control = self.control();
        control.state = EngineState::Stopped;
        control.current_run = None;
        self.bus.publish(CoreEvent::MiningStopped { run_id, attempts });
        tracing::info!(
            "[MiningEngine] Run {} stopped after {} attempts",
            run_id,
            attempts
        );
    }

    fn finish_failed(&self, run_id: u64, err: EngineError) {
        let mut control = self.control();
        control.state = EngineState::Failed;
        control.current_run = None;
        control.last_error = Some(err.clone());
        log_engine_error(&err, &format!("run {}", run_id));
        self.bus.publish(CoreEvent::Error {
            code: err.code(),
            message: err.message(),
            severity: Severity::Fatal,
        });
    }

    /// Double after success, halve after failure
    fn retarget(&self, success: bool) {
        let mut control = self.control();
        let next = if success {
            control.difficulty.doubled()
        } else {
            control.difficulty.halved()
        };
        if next != control.difficulty {
            control.difficulty = next;
            self.bus
                .publish(CoreEvent::DifficultyAdjusted { difficulty: next });
            tracing::debug!("[MiningEngine] Retargeted difficulty to {}", next);
        }
    }

    fn set_hashrate(&self, rate: f64) {
        self.control().last_hashrate = rate;
    }

    /// Search one run to completion, cancellation, or failure
    fn execute(
        &self,
        config: &MiningConfig,
        hasher: &HeaderHasher,
        ticket: RunTicket,
        cancel: &CancelToken,
    ) -> RunOutcome {
        let started = Instant::now();
        let schedule = NonceSchedule::new(config.strategy, ticket.calibration, config.signal_weight);
        let best = AtomicU64::new(NO_WINNER);
        let hashes = AtomicU64::new(0);
        let live = AtomicUsize::new(0);
        let plan = SearchPlan {
            hasher,
            schedule,
            difficulty: ticket.difficulty,
            max_attempts: config.max_attempts,
            worker_count: config.thread_count,
            cancel_check_interval: self.config.cancel_check_interval,
            cancel,
            best: &best,
            hashes: &hashes,
        };

        let mut spawn_error = None;
        let joined: Vec<Option<WorkerReport>> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(config.thread_count);
            for worker_id in 0..config.thread_count {
                let plan = &plan;
                let live = &live;
                live.fetch_add(1, Ordering::AcqRel);
                let spawned = thread::Builder::new()
                    .name(format!("mining-worker-{}", worker_id))
                    .spawn_scoped(scope, move || {
                        let _live = LiveGuard(live);
                        run_worker(plan, worker_id)
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        live.fetch_sub(1, Ordering::AcqRel);
                        // Position 0 is below every position, so this halts the pool
                        plan.best.fetch_min(0, Ordering::AcqRel);
                        spawn_error = Some(err.to_string());
                        break;
                    }
                }
            }

            self.report_until_done(&live, &hashes, ticket.run_id, config.max_attempts, cancel, started);

            handles
                .into_iter()
                .map(|handle| handle.join().ok().flatten())
                .collect()
        });

        let hashes_computed = hashes.load(Ordering::Acquire);

        if let Some(reason) = spawn_error {
            return RunOutcome::Failed(EngineError::SpawnFailed { reason });
        }
        if let Some(worker) = joined.iter().position(Option::is_none) {
            return RunOutcome::Failed(EngineError::WorkerPanicked { worker });
        }
        if cancel.is_cancelled() {
            return RunOutcome::Stopped {
                attempts: hashes_computed,
            };
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let winner = best.load(Ordering::Acquire);
        let result = if winner != NO_WINNER {
            let nonce = schedule.nonce_at(winner);
            let hash = hasher.hash(nonce);
            MiningResult {
                run_id: ticket.run_id,
                success: true,
                nonce: Some(nonce),
                header_hash: Some(to_display_hex(&hash)),
                attempts: winner + 1,
                hashes_computed,
                elapsed_ms,
                hash_value: hash_value(&hash),
                difficulty: ticket.difficulty,
                calibration: ticket.calibration,
            }
        } else {
            let best_value = joined
                .iter()
                .flatten()
                .map(|report| report.min_hash_value)
                .min()
                .unwrap_or(u64::MAX);
            MiningResult {
                run_id: ticket.run_id,
                success: false,
                nonce: None,
                header_hash: None,
                attempts: config.max_attempts,
                hashes_computed,
                elapsed_ms,
                hash_value: best_value,
                difficulty: ticket.difficulty,
                calibration: ticket.calibration,
            }
        };
        RunOutcome::Completed(result)
    }

    /// Emit progress and hashrate at their cadences until every worker exits
    fn report_until_done(
        &self,
        live: &AtomicUsize,
        hashes: &AtomicU64,
        run_id: u64,
        max_attempts: u64,
        cancel: &CancelToken,
        started: Instant,
    ) {
        let progress_every = Duration::from_millis(self.config.progress_interval_ms.max(1));
        let hashrate_every = Duration::from_millis(self.config.hashrate_interval_ms.max(1));
        let mut tracker =
            HashrateTracker::new(Duration::from_millis(self.config.hashrate_window_ms.max(1)));
        tracker.observe(started, 0);

        let mut last_progress = started;
        let mut last_hashrate = started;

        while live.load(Ordering::Acquire) > 0 {
            thread::sleep(POLL_INTERVAL.min(progress_every));
            if cancel.is_cancelled() {
                continue;
            }

            let now = Instant::now();
            let done = hashes.load(Ordering::Relaxed);

            if now.duration_since(last_progress) >= progress_every {
                last_progress = now;
                self.bus.publish(CoreEvent::MiningProgress {
                    run_id,
                    attempts: done,
                    fraction: fraction(done, max_attempts),
                });
            }

            if now.duration_since(last_hashrate) >= hashrate_every {
                last_hashrate = now;
                let rate = tracker.observe(now, done);
                self.set_hashrate(rate);
                self.bus.publish(CoreEvent::HashrateUpdated {
                    run_id,
                    hashes_per_second: rate,
                });
            }
        }
    }
}

/// Worker body; a panic halts the pool and reports None
fn run_worker(plan: &SearchPlan<'_>, worker_id: usize) -> Option<WorkerReport> {
    match panic::catch_unwind(AssertUnwindSafe(|| search(plan, worker_id))) {
        Ok(report) => Some(report),
        Err(_) => {
            plan.best.fetch_min(0, Ordering::AcqRel);
            None
        }
    }
}

fn fraction(attempts: u64, max_attempts: u64) -> f64 {
    if max_attempts == 0 {
        return 1.0;
    }
    (attempts as f64 / max_attempts as f64).min(1.0)
}

/// Supervisor thread body
fn supervise(
    shared: Arc<Shared>,
    config: MiningConfig,
    mode: RunMode,
    cancel: CancelToken,
    first: RunTicket,
) {
    let hasher = HeaderHasher::new(&config.header);
    let mut ticket = first;

    loop {
        match shared.execute(&config, &hasher, ticket, &cancel) {
            RunOutcome::Completed(result) => {
                let RunMode::Continuous {
                    cell,
                    auto_retarget,
                } = &mode
                else {
                    shared.finish_completed(result, config.max_attempts);
                    return;
                };

                // Generation before the result becomes visible, so feedback
                // applied to this result counts as an update
                let seen = cell.generation();
                let (run_id, attempts, success) = (result.run_id, result.attempts, result.success);
                shared.finish_completed(result, config.max_attempts);

                if *auto_retarget {
                    shared.retarget(success);
                }

                let wait = Duration::from_millis(shared.config.feedback_wait_ms);
                let Some(calibration) = wait_for_feedback(cell, seen, wait, &cancel) else {
                    shared.finish_stopped(run_id, attempts);
                    return;
                };

                match shared.begin_run(calibration) {
                    Ok(next) => ticket = next,
                    Err(_) => return,
                }
            }
            RunOutcome::Stopped { attempts } => {
                shared.finish_stopped(ticket.run_id, attempts);
                return;
            }
            RunOutcome::Failed(err) => {
                shared.finish_failed(ticket.run_id, err);
                return;
            }
        }
    }
}

/// Wait for a calibration update (or the timeout) and sample the cell.
/// None when cancelled while waiting.
fn wait_for_feedback(
    cell: &FactorCell,
    seen: u64,
    timeout: Duration,
    cancel: &CancelToken,
) -> Option<CalibrationFactor> {
    let deadline = Instant::now() + timeout;
    let slice = Duration::from_millis(10);
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        let (factor, generation) = cell.wait_newer_than(seen, remaining.min(slice));
        if generation > seen || remaining.is_zero() {
            return if cancel.is_cancelled() { None } else { Some(factor) };
        }
    }
}
