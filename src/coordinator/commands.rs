// Command contract between an external collaborator and the coordinator
//
// Commands travel over a tokio mpsc channel to the coordinator thread; each
// carries a oneshot sender for its reply, so callers get the result of the
// command synchronously while the tick loop keeps running.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::calibration::CalibrationFactor;
use crate::config::DeviceConfig;
use crate::error::CoreError;
use crate::events::{EventBus, EventEnvelope, EventReceiver};
use crate::mining::{Difficulty, MiningConfig};

use super::stats::SessionStats;

/// Commands accepted by the coordinator
#[derive(Debug, Clone)]
pub enum Command {
    /// Connect with the given device, or the configured one
    Connect(Option<DeviceConfig>),
    Disconnect,
    StartAcquisition,
    StopAcquisition,
    StartLearning,
    StopLearning,
    /// Run one calibration cycle on the buffered window now
    Calibrate,
    SaveCalibration(PathBuf),
    LoadCalibration(PathBuf),
    ConfigureMining(MiningConfig),
    StartMining,
    StartContinuousMining { auto_retarget: bool },
    StopMining,
    AdjustDifficulty(Difficulty),
    SetAutoMining(bool),
    StartSession,
    GetStatistics,
    Shutdown,
}

/// Successful command reply
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Done,
    Factor(CalibrationFactor),
    RunStarted { run_id: u64 },
    Statistics(SessionStats),
}

pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub reply: oneshot::Sender<Result<CommandOutcome, CoreError>>,
}

/// Handle to a coordinator running on its own thread
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CommandEnvelope>,
    bus: EventBus,
    thread: Option<JoinHandle<()>>,
}

impl CoordinatorHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<CommandEnvelope>,
        bus: EventBus,
        thread: JoinHandle<()>,
    ) -> Self {
        Self {
            tx,
            bus,
            thread: Some(thread),
        }
    }

    /// Send a command and block until the coordinator replies.
    ///
    /// Inside an async runtime the round trip runs on a scoped helper
    /// thread, since blocking channel calls panic on runtime threads. Async
    /// callers should prefer `execute_async`.
    pub fn execute(&self, command: Command) -> Result<CommandOutcome, CoreError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return self.execute_blocking(command);
        }
        thread::scope(|scope| {
            scope
                .spawn(|| self.execute_blocking(command))
                .join()
                .unwrap_or(Err(CoreError::CoordinatorUnavailable))
        })
    }

    fn execute_blocking(&self, command: Command) -> Result<CommandOutcome, CoreError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .blocking_send(CommandEnvelope { command, reply })
            .map_err(|_| CoreError::CoordinatorUnavailable)?;
        response
            .blocking_recv()
            .map_err(|_| CoreError::CoordinatorUnavailable)?
    }

    pub async fn execute_async(&self, command: Command) -> Result<CommandOutcome, CoreError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(CommandEnvelope { command, reply })
            .await
            .map_err(|_| CoreError::CoordinatorUnavailable)?;
        response
            .await
            .map_err(|_| CoreError::CoordinatorUnavailable)?
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.bus.subscribe()
    }

    pub fn events(&self) -> impl Stream<Item = EventEnvelope> + Unpin {
        self.bus.stream()
    }

    /// Stop mining and acquisition, disconnect, and join the thread
    pub fn shutdown(mut self) -> Result<(), CoreError> {
        let result = self.execute(Command::Shutdown).map(|_| ());
        if let Some(worker) = self.thread.take() {
            join_coordinator(worker);
        }
        result
    }

    /// `shutdown` for async callers; the join runs on the blocking pool
    pub async fn shutdown_async(mut self) -> Result<(), CoreError> {
        let result = self.execute_async(Command::Shutdown).await.map(|_| ());
        if let Some(worker) = self.thread.take() {
            if let Err(err) = tokio::task::spawn_blocking(move || join_coordinator(worker)).await {
                tracing::error!("[Coordinator] Join task failed: {}", err);
            }
        }
        result
    }
}

fn join_coordinator(worker: JoinHandle<()>) {
    if worker.join().is_err() {
        tracing::error!("[Coordinator] Coordinator thread panicked");
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        let Some(worker) = self.thread.take() else {
            return;
        };

        if tokio::runtime::Handle::try_current().is_err() {
            let _ = self.execute_blocking(Command::Shutdown);
            join_coordinator(worker);
            return;
        }

        // On a runtime thread: never block. The loop also shuts down once
        // the command channel closes with this handle.
        let (reply, _) = oneshot::channel();
        if self
            .tx
            .try_send(CommandEnvelope {
                command: Command::Shutdown,
                reply,
            })
            .is_err()
        {
            tracing::debug!("[Coordinator] Shutdown not queued; loop ends on channel close");
        }
        let joiner = thread::Builder::new()
            .name("feedback-coordinator-join".to_string())
            .spawn(move || join_coordinator(worker));
        if let Err(err) = joiner {
            tracing::warn!("[Coordinator] Coordinator thread left detached: {}", err);
        }
    }
}
