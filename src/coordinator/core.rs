// FeedbackCoordinator - the control loop binding acquisition, calibration
// and mining
//
// Each tick:
//   1. Drain frames from the signal source into the calibration window
//   2. In learning mode, run a cycle once `min_frames` new frames arrived
//   3. Apply feedback for every completed mining result
//   4. If auto-mining and the engine is idle, start a run with the current
//      calibration snapshot
//
// Components publish their own notifications on the shared bus. The
// coordinator adds CalibrationChanged, Statistics, and Error for every
// failed command or tick step. Beyond tick bookkeeping it holds no
// algorithmic state.

use std::collections::VecDeque;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::calibration::{CalibrationFactor, CalibrationFilter};
use crate::config::AppConfig;
use crate::error::{CalibrationError, CoreError, ErrorCode, Severity};
use crate::events::{CoreEvent, EventBus, EventReceiver};
use crate::mining::{Difficulty, MiningConfig, MiningEngine, RunHandle};
use crate::signal::{ConnectionStatus, DeviceConfig, ElectrodeBackend, SignalFrame, SignalSource};

use super::commands::{Command, CommandEnvelope, CommandOutcome, CoordinatorHandle};
use super::stats::SessionStats;

/// Commands buffered before `CoordinatorHandle::execute` waits
const COMMAND_QUEUE_CAPACITY: usize = 64;

pub struct FeedbackCoordinator {
    config: AppConfig,
    bus: EventBus,
    source: SignalSource,
    filter: CalibrationFilter,
    engine: MiningEngine,
    window: VecDeque<SignalFrame>,
    window_session: Option<u64>,
    frames_since_cycle: usize,
    learning: bool,
    auto_mining: bool,
    mining_config: MiningConfig,
    last_run: Option<RunHandle>,
    stats: SessionStats,
}

impl FeedbackCoordinator {
    /// Coordinator over the built-in simulated electrode array
    pub fn new(config: AppConfig) -> Self {
        let bus = EventBus::new(config.coordinator.event_capacity);
        let source = SignalSource::simulated(config.acquisition.clone(), bus.clone());
        Self::assemble(config, bus, source)
    }

    /// Coordinator over a custom electrode backend
    pub fn with_backend(config: AppConfig, backend: Box<dyn ElectrodeBackend>) -> Self {
        let bus = EventBus::new(config.coordinator.event_capacity);
        let source = SignalSource::new(backend, config.acquisition.clone(), bus.clone());
        Self::assemble(config, bus, source)
    }

    fn assemble(config: AppConfig, bus: EventBus, source: SignalSource) -> Self {
        Self {
            filter: CalibrationFilter::new(config.calibration.clone()),
            engine: MiningEngine::new(config.mining.clone(), bus.clone()),
            auto_mining: config.coordinator.auto_mining,
            window: VecDeque::with_capacity(config.calibration.window_frames),
            window_session: None,
            frames_since_cycle: 0,
            learning: false,
            mining_config: MiningConfig::default(),
            last_run: None,
            stats: SessionStats::started_now(),
            config,
            bus,
            source,
        }
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.bus.subscribe()
    }

    // ========================================================================
    // TICK
    // ========================================================================

    /// One pass of the control loop
    pub fn tick(&mut self) {
        self.collect_frames();

        if self.learning && self.frames_since_cycle >= self.config.calibration.min_frames.max(1) {
            // Reported once by calibrate(); retrying every tick would only
            // repeat the same error
            if let Err(err) = self.calibrate() {
                tracing::warn!("[Coordinator] Learning stopped: {}", err);
                self.learning = false;
                self.frames_since_cycle = 0;
            }
        }

        self.apply_feedback();

        if self.auto_mining && !self.engine.is_running() {
            if let Err(err) = self.start_mining() {
                tracing::warn!("[Coordinator] Auto-mining start failed: {}", err);
                self.auto_mining = false;
            }
        }
    }

    fn collect_frames(&mut self) {
        let batch = self.source.drain_frames();
        self.stats.stale_frames_dropped += batch.stale_dropped as u64;

        // Frames of an earlier session never mix with the current window
        let session = match self.source.status() {
            ConnectionStatus::Connected => self.source.session_id(),
            _ => None,
        };
        if session != self.window_session {
            self.window.clear();
            self.frames_since_cycle = 0;
            self.window_session = session;
        }

        let capacity = self.config.calibration.window_frames.max(1);
        self.stats.frames_processed += batch.frames.len() as u64;
        self.frames_since_cycle += batch.frames.len();
        for frame in batch.frames {
            if self.window.len() == capacity {
                self.window.pop_front();
            }
            self.window.push_back(frame);
        }
    }

    fn apply_feedback(&mut self) {
        let results = self.engine.drain_results();
        if results.is_empty() {
            self.stats.record_hashrate(self.engine.last_hashrate());
            return;
        }

        for result in &results {
            let factor = self.filter.apply_mining_feedback(result);
            self.stats.record_result(result);
            self.bus.publish(CoreEvent::CalibrationChanged { factor });
        }
        self.stats.record_hashrate(self.engine.last_hashrate());
        self.bus.publish(CoreEvent::Statistics(self.stats.clone()));
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    pub fn connect(&mut self, device: Option<DeviceConfig>) -> Result<(), CoreError> {
        let device = device.unwrap_or_else(|| self.config.device.clone());
        self.source
            .connect(&device)
            .map_err(|err| self.report(err.into()))
    }

    pub fn disconnect(&mut self) {
        self.source.disconnect();
        self.window.clear();
        self.window_session = None;
        self.frames_since_cycle = 0;
    }

    pub fn start_acquisition(&mut self) -> Result<(), CoreError> {
        self.source
            .start_acquisition()
            .map_err(|err| self.report(err.into()))
    }

    pub fn stop_acquisition(&mut self) {
        self.source.stop_acquisition();
    }

    pub fn start_learning(&mut self) {
        self.learning = true;
        self.frames_since_cycle = self.window.len();
        tracing::info!("[Coordinator] Learning enabled");
    }

    pub fn stop_learning(&mut self) {
        self.learning = false;
        tracing::info!("[Coordinator] Learning disabled");
    }

    /// Run one calibration cycle on the buffered window
    pub fn calibrate(&mut self) -> Result<CalibrationFactor, CoreError> {
        self.collect_frames();
        let frames: Vec<SignalFrame> = self.window.iter().cloned().collect();
        let factor = self
            .filter
            .run_calibration_cycle(&frames)
            .map_err(|err| self.report(err.into()))?;

        self.frames_since_cycle = 0;
        self.stats.calibration_cycles += 1;
        self.bus.publish(CoreEvent::CalibrationChanged { factor });
        Ok(factor)
    }

    pub fn save_calibration(&mut self, path: &Path) -> Result<(), CoreError> {
        self.filter
            .save(path)
            .map_err(|err| self.report(CalibrationError::Persistence(err).into()))
    }

    /// Restore a saved state; on failure the current factor is kept.
    ///
    /// While connected, a state learned on another electrode count is
    /// rejected.
    pub fn load_calibration(&mut self, path: &Path) -> Result<CalibrationFactor, CoreError> {
        let loaded = match self.source.electrode_count() {
            Some(count) => self.filter.load_matching(path, count),
            None => self.filter.load(path).map_err(CalibrationError::Persistence),
        };
        let factor = loaded.map_err(|err| self.report(err.into()))?;
        self.bus.publish(CoreEvent::CalibrationChanged { factor });
        Ok(factor)
    }

    /// Set the configuration of subsequent runs
    pub fn configure_mining(&mut self, config: MiningConfig) -> Result<(), CoreError> {
        config
            .validate()
            .map_err(|err| self.report(err.into()))?;
        self.mining_config = config;
        Ok(())
    }

    /// Single run with the current calibration snapshot
    pub fn start_mining(&mut self) -> Result<u64, CoreError> {
        let handle = self
            .engine
            .start(self.mining_config.clone(), self.filter.factor())
            .map_err(|err| self.report(err.into()))?;
        let run_id = handle.run_id();
        self.last_run = Some(handle);
        Ok(run_id)
    }

    pub fn start_continuous_mining(&mut self, auto_retarget: bool) -> Result<u64, CoreError> {
        let handle = self
            .engine
            .start_continuous(
                self.mining_config.clone(),
                self.filter.factor_cell(),
                auto_retarget,
            )
            .map_err(|err| self.report(err.into()))?;
        let run_id = handle.run_id();
        self.last_run = Some(handle);
        Ok(run_id)
    }

    /// Stop the active run; results completed before the stop still count
    pub fn stop_mining(&mut self) -> Result<(), CoreError> {
        self.auto_mining = false;
        self.engine.stop().map_err(|err| self.report(err.into()))?;
        self.last_run = None;
        self.apply_feedback();
        Ok(())
    }

    pub fn adjust_difficulty(&mut self, difficulty: Difficulty) -> Result<(), CoreError> {
        self.engine
            .adjust_difficulty(difficulty)
            .map_err(|err| self.report(err.into()))
    }

    pub fn set_auto_mining(&mut self, enabled: bool) {
        self.auto_mining = enabled;
    }

    /// Reset session totals
    pub fn start_session(&mut self) {
        self.stats = SessionStats::started_now();
        self.bus.publish(CoreEvent::Statistics(self.stats.clone()));
        tracing::info!("[Coordinator] New session started");
    }

    pub fn statistics(&self) -> SessionStats {
        self.stats.clone()
    }

    /// Stop mining and acquisition and disconnect
    pub fn shutdown(&mut self) {
        if let Err(err) = self.engine.stop() {
            self.report(err.into());
        }
        self.source.stop_acquisition();
        self.disconnect();
        tracing::info!("[Coordinator] Shut down");
    }

    /// Apply a command from the command contract
    pub fn execute(&mut self, command: Command) -> Result<CommandOutcome, CoreError> {
        match command {
            Command::Connect(device) => self.connect(device).map(|_| CommandOutcome::Done),
            Command::Disconnect => {
                self.disconnect();
                Ok(CommandOutcome::Done)
            }
            Command::StartAcquisition => self.start_acquisition().map(|_| CommandOutcome::Done),
            Command::StopAcquisition => {
                self.stop_acquisition();
                Ok(CommandOutcome::Done)
            }
            Command::StartLearning => {
                self.start_learning();
                Ok(CommandOutcome::Done)
            }
            Command::StopLearning => {
                self.stop_learning();
                Ok(CommandOutcome::Done)
            }
            Command::Calibrate => self.calibrate().map(CommandOutcome::Factor),
            Command::SaveCalibration(path) => {
                self.save_calibration(&path).map(|_| CommandOutcome::Done)
            }
            Command::LoadCalibration(path) => {
                self.load_calibration(&path).map(CommandOutcome::Factor)
            }
            Command::ConfigureMining(config) => {
                self.configure_mining(config).map(|_| CommandOutcome::Done)
            }
            Command::StartMining => self
                .start_mining()
                .map(|run_id| CommandOutcome::RunStarted { run_id }),
            Command::StartContinuousMining { auto_retarget } => self
                .start_continuous_mining(auto_retarget)
                .map(|run_id| CommandOutcome::RunStarted { run_id }),
            Command::StopMining => self.stop_mining().map(|_| CommandOutcome::Done),
            Command::AdjustDifficulty(difficulty) => self
                .adjust_difficulty(difficulty)
                .map(|_| CommandOutcome::Done),
            Command::SetAutoMining(enabled) => {
                self.set_auto_mining(enabled);
                Ok(CommandOutcome::Done)
            }
            Command::StartSession => {
                self.start_session();
                Ok(CommandOutcome::Done)
            }
            Command::GetStatistics => {
                let stats = self.statistics();
                self.bus.publish(CoreEvent::Statistics(stats.clone()));
                Ok(CommandOutcome::Statistics(stats))
            }
            Command::Shutdown => {
                self.shutdown();
                Ok(CommandOutcome::Done)
            }
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn status(&self) -> ConnectionStatus {
        self.source.status()
    }

    pub fn factor(&self) -> CalibrationFactor {
        self.filter.factor()
    }

    pub fn filter(&self) -> &CalibrationFilter {
        &self.filter
    }

    pub fn engine(&self) -> &MiningEngine {
        &self.engine
    }

    pub fn source(&self) -> &SignalSource {
        &self.source
    }

    pub fn is_learning(&self) -> bool {
        self.learning
    }

    pub fn is_auto_mining(&self) -> bool {
        self.auto_mining
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn last_run_id(&self) -> Option<u64> {
        self.last_run.as_ref().map(RunHandle::run_id)
    }

    pub fn mining_config(&self) -> &MiningConfig {
        &self.mining_config
    }

    // ========================================================================
    // THREAD
    // ========================================================================

    /// Run the tick loop on a dedicated thread.
    ///
    /// The thread hosts a current-thread tokio runtime that multiplexes the
    /// tick interval with incoming commands.
    pub fn spawn(self) -> Result<CoordinatorHandle, CoreError> {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let bus = self.bus.clone();

        let thread = thread::Builder::new()
            .name("feedback-coordinator".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        tracing::error!("[Coordinator] Failed to build runtime: {}", err);
                        return;
                    }
                };
                runtime.block_on(self.run(rx));
            })
            .map_err(|err| {
                tracing::error!("[Coordinator] Failed to spawn thread: {}", err);
                CoreError::CoordinatorUnavailable
            })?;

        Ok(CoordinatorHandle::new(tx, bus, thread))
    }

    async fn run(mut self, mut commands: mpsc::Receiver<CommandEnvelope>) {
        let period = Duration::from_millis(self.config.coordinator.tick_interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "[Coordinator] Loop started (tick every {} ms)",
            period.as_millis()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                envelope = commands.recv() => {
                    let Some(envelope) = envelope else {
                        self.shutdown();
                        break;
                    };
                    let shutdown = matches!(envelope.command, Command::Shutdown);
                    let outcome = self.execute(envelope.command);
                    let _ = envelope.reply.send(outcome);
                    if shutdown {
                        break;
                    }
                }
            }
        }
    }

    /// Publish an error notification and hand the error back
    fn report(&self, err: CoreError) -> CoreError {
        let severity = err.severity();
        match severity {
            Severity::Fatal => tracing::error!("[Coordinator] {}", err),
            Severity::Recoverable => tracing::warn!("[Coordinator] {}", err),
        }
        self.bus.publish(CoreEvent::Error {
            code: err.code(),
            message: err.message(),
            severity,
        });
        err
    }
}

impl Drop for FeedbackCoordinator {
    fn drop(&mut self) {
        let _ = self.engine.stop();
        self.source.stop_acquisition();
    }
}
