// SignalSource - connection state machine and acquisition thread
//
// The source owns the connection status and the raw frames. Frames travel
// from a dedicated acquisition thread to the coordinator through the SPSC
// FrameQueue; every frame is also announced on the event bus.
//
// Ordering rules:
// - StatusChanged(Connected) is published before the acquisition thread can
//   exist, so no frame precedes the status it depends on.
// - disconnect() joins the acquisition thread before flushing the queue and
//   publishing StatusChanged(Disconnected), so no frame follows it.
// - drain_frames() returns nothing unless the status is Connected, and drops
//   frames from earlier sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{AcquisitionConfig, DeviceConfig};
use crate::error::{
    log_signal_error, AcquisitionError, ConnectionError, ErrorCode, Severity,
};
use crate::events::{CoreEvent, EventBus};

use super::backend::{ElectrodeBackend, SimulatedMea};
use super::frame::{ConnectionStatus, SignalFrame};
use super::frame_queue::{FrameConsumer, FrameProducer, FrameQueue};

/// Largest electrode array the source accepts
pub const MAX_ELECTRODES: usize = 256;

/// Upper bound on a single sleep of the acquisition thread, which bounds
/// stop latency independently of the sampling interval
const SLEEP_SLICE: Duration = Duration::from_millis(10);

type SharedBackend = Arc<Mutex<Box<dyn ElectrodeBackend>>>;

/// Frames handed to the coordinator by one drain
#[derive(Debug, Default)]
pub struct FrameBatch {
    /// Valid frames of the current session, in acquisition order
    pub frames: Vec<SignalFrame>,
    /// Frames discarded because they belong to an earlier session or the
    /// source is no longer connected
    pub stale_dropped: usize,
}

/// Status shared between the source and its acquisition thread.
///
/// Every transition is published while the lock is held, so status events
/// appear on the bus in transition order.
#[derive(Clone)]
struct StatusCell {
    status: Arc<Mutex<ConnectionStatus>>,
    bus: EventBus,
}

impl StatusCell {
    fn new(bus: EventBus) -> Self {
        Self {
            status: Arc::new(Mutex::new(ConnectionStatus::Disconnected)),
            bus,
        }
    }

    fn get(&self) -> ConnectionStatus {
        *self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Transition and publish; a no-op when the status is unchanged
    fn set(&self, next: ConnectionStatus) {
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *status == next {
            return;
        }
        tracing::info!(
            "[SignalSource] {} -> {}",
            status.display_name(),
            next.display_name()
        );
        *status = next;
        self.bus.publish(CoreEvent::StatusChanged { status: next });
    }
}

/// Running acquisition thread. The thread hands the queue producer back
/// through its join handle when it exits.
struct AcquisitionWorker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<FrameProducer>,
}

/// Electrode signal source
pub struct SignalSource {
    backend: SharedBackend,
    config: AcquisitionConfig,
    bus: EventBus,
    status: StatusCell,
    device: Option<DeviceConfig>,
    session_id: Option<u64>,
    next_session: u64,
    consumer: FrameConsumer,
    producer: Option<FrameProducer>,
    worker: Option<AcquisitionWorker>,
}

impl SignalSource {
    pub fn new(backend: Box<dyn ElectrodeBackend>, config: AcquisitionConfig, bus: EventBus) -> Self {
        let (producer, consumer) = FrameQueue::new(config.frame_queue_capacity.max(1));
        Self {
            backend: Arc::new(Mutex::new(backend)),
            config,
            status: StatusCell::new(bus.clone()),
            bus,
            device: None,
            session_id: None,
            next_session: 1,
            consumer,
            producer: Some(producer),
            worker: None,
        }
    }

    /// Source backed by the built-in simulated array
    pub fn simulated(config: AcquisitionConfig, bus: EventBus) -> Self {
        Self::new(Box::new(SimulatedMea::default()), config, bus)
    }

    /// Connect to the device.
    ///
    /// Disconnected/Error -> Connecting -> Connected | Error. Calling while
    /// already Connected is a no-op success. May block for the duration of
    /// the device handshake.
    pub fn connect(&mut self, device: &DeviceConfig) -> Result<(), ConnectionError> {
        if self.status.get() == ConnectionStatus::Connected {
            tracing::debug!("[SignalSource] Already connected, ignoring connect");
            return Ok(());
        }

        validate_device(device).map_err(|err| {
            log_signal_error(&err, "connect");
            err
        })?;

        // A faulted session may still have a finished worker to reclaim
        self.join_worker();
        self.consumer.clear();

        self.status.set(ConnectionStatus::Connecting);

        let handshake = match self.backend.lock() {
            Ok(mut backend) => backend
                .handshake(device)
                .map(|_| backend.name().to_string()),
            Err(_) => Err(ConnectionError::LockPoisoned),
        };

        let backend_name = match handshake {
            Ok(name) => name,
            Err(err) => {
                log_signal_error(&err, "connect");
                self.session_id = None;
                self.status.set(ConnectionStatus::Error);
                return Err(err);
            }
        };

        let session = self.next_session;
        self.next_session += 1;
        self.session_id = Some(session);
        self.device = Some(device.clone());

        tracing::info!(
            "[SignalSource] Connected to {} via {} ({} electrodes, session {})",
            device.name,
            backend_name,
            device.electrode_count,
            session
        );
        self.status.set(ConnectionStatus::Connected);
        Ok(())
    }

    /// Disconnect from any state. Stops acquisition and flushes every
    /// buffered frame.
    pub fn disconnect(&mut self) {
        self.join_worker();

        if let Ok(mut backend) = self.backend.lock() {
            backend.release();
        }

        let flushed = self.consumer.clear();
        if flushed > 0 {
            tracing::debug!("[SignalSource] Flushed {} buffered frames", flushed);
        }

        self.session_id = None;
        self.status.set(ConnectionStatus::Disconnected);
    }

    /// Start the acquisition thread. Requires a Connected source.
    pub fn start_acquisition(&mut self) -> Result<(), AcquisitionError> {
        if self.status.get() != ConnectionStatus::Connected {
            let err = AcquisitionError::NotConnected;
            log_signal_error(&err, "start_acquisition");
            return Err(err);
        }
        if self.is_acquiring() {
            let err = AcquisitionError::AlreadyAcquiring;
            log_signal_error(&err, "start_acquisition");
            return Err(err);
        }

        self.join_worker();

        let (device, session) = match (self.device.clone(), self.session_id) {
            (Some(device), Some(session)) => (device, session),
            _ => {
                let err = AcquisitionError::NotConnected;
                log_signal_error(&err, "start_acquisition");
                return Err(err);
            }
        };

        let producer = match self.producer.take() {
            Some(producer) => producer,
            None => self.rebuild_queue(),
        };

        let running = Arc::new(AtomicBool::new(true));
        let context = AcquisitionContext {
            backend: Arc::clone(&self.backend),
            status: self.status.clone(),
            bus: self.bus.clone(),
            running: Arc::clone(&running),
            session_id: session,
            electrode_count: device.electrode_count,
            interval: Duration::from_millis(device.sample_interval_ms.max(1)),
            log_every_n_frames: self.config.log_every_n_frames,
        };

        let handle = thread::Builder::new()
            .name("signal-acquisition".to_string())
            .spawn(move || context.run(producer));

        match handle {
            Ok(handle) => {
                tracing::info!(
                    "[SignalSource] Acquisition started (session {}, every {} ms)",
                    session,
                    device.sample_interval_ms
                );
                self.worker = Some(AcquisitionWorker { running, handle });
                Ok(())
            }
            Err(spawn_err) => {
                // The producer moved into the failed closure; start over with a fresh queue
                let producer = self.rebuild_queue();
                self.producer = Some(producer);
                let err = AcquisitionError::HardwareFault {
                    details: format!("failed to spawn acquisition thread: {}", spawn_err),
                };
                log_signal_error(&err, "start_acquisition");
                Err(err)
            }
        }
    }

    /// Stop the acquisition thread. Safe to call when not acquiring.
    /// Frames already queued stay available to drain_frames().
    pub fn stop_acquisition(&mut self) {
        if self.worker.is_some() {
            self.join_worker();
            tracing::info!("[SignalSource] Acquisition stopped");
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn is_acquiring(&self) -> bool {
        self.worker
            .as_ref()
            .map(|worker| !worker.handle.is_finished())
            .unwrap_or(false)
    }

    /// Current connection session, if connected
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// Electrode count of the current session
    pub fn electrode_count(&self) -> Option<usize> {
        self.session_id
            .and(self.device.as_ref())
            .map(|device| device.electrode_count)
    }

    /// Take every buffered frame that is valid for the current session
    pub fn drain_frames(&mut self) -> FrameBatch {
        let current = match (self.status.get(), self.session_id) {
            (ConnectionStatus::Connected, Some(session)) => session,
            _ => {
                return FrameBatch {
                    frames: Vec::new(),
                    stale_dropped: self.consumer.clear(),
                };
            }
        };

        let mut batch = FrameBatch::default();
        for frame in self.consumer.pop_all() {
            if frame.session_id == current && frame.is_consistent() {
                batch.frames.push(frame);
            } else {
                batch.stale_dropped += 1;
            }
        }
        if batch.stale_dropped > 0 {
            tracing::debug!(
                "[SignalSource] Discarded {} stale frames",
                batch.stale_dropped
            );
        }
        batch
    }

    /// Frames lost because the queue was full
    pub fn dropped_frames(&self) -> u64 {
        self.consumer.dropped()
    }

    /// Signal the worker to stop, wait for it, and take the producer back
    fn join_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.running.store(false, Ordering::Release);
        match worker.handle.join() {
            Ok(producer) => self.producer = Some(producer),
            Err(_) => {
                tracing::warn!("[SignalSource] Acquisition thread panicked, rebuilding queue");
                let producer = self.rebuild_queue();
                self.producer = Some(producer);
            }
        }
    }

    fn rebuild_queue(&mut self) -> FrameProducer {
        let (producer, consumer) = FrameQueue::new(self.config.frame_queue_capacity.max(1));
        self.consumer = consumer;
        producer
    }
}

impl Drop for SignalSource {
    fn drop(&mut self) {
        self.join_worker();
    }
}

fn validate_device(device: &DeviceConfig) -> Result<(), ConnectionError> {
    if device.electrode_count == 0 || device.electrode_count > MAX_ELECTRODES {
        return Err(ConnectionError::InvalidDeviceConfig {
            reason: format!(
                "electrode_count must be in 1..={}, got {}",
                MAX_ELECTRODES, device.electrode_count
            ),
        });
    }
    if device.sample_interval_ms == 0 {
        return Err(ConnectionError::InvalidDeviceConfig {
            reason: "sample_interval_ms must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Everything the acquisition thread needs, moved into it at spawn
struct AcquisitionContext {
    backend: SharedBackend,
    status: StatusCell,
    bus: EventBus,
    running: Arc<AtomicBool>,
    session_id: u64,
    electrode_count: usize,
    interval: Duration,
    log_every_n_frames: u64,
}

impl AcquisitionContext {
    fn run(self, mut producer: FrameProducer) -> FrameProducer {
        let mut sequence: u64 = 0;
        let mut dropped: u64 = 0;
        let mut voltages = Vec::with_capacity(self.electrode_count);

        while self.running.load(Ordering::Acquire) {
            let read = match self.backend.lock() {
                Ok(mut backend) => backend.read_frame(self.electrode_count, &mut voltages),
                Err(_) => Err(AcquisitionError::LockPoisoned),
            };

            if let Err(err) = read {
                self.fail(err);
                break;
            }

            let frame = SignalFrame::now(self.session_id, sequence, voltages.clone());
            sequence += 1;

            if !producer.push(frame.clone()) {
                dropped += 1;
            }
            self.bus.publish(CoreEvent::SignalsReceived(frame));

            if self.log_every_n_frames > 0 && sequence % self.log_every_n_frames == 0 {
                tracing::debug!(
                    "[SignalSource] {} frames acquired, {} dropped (queue full)",
                    sequence,
                    dropped
                );
            }

            self.sleep_interval();
        }

        producer
    }

    /// Mid-stream fault: status goes to Error and the thread exits
    fn fail(&self, err: AcquisitionError) {
        log_signal_error(&err, "acquisition_thread");
        self.status.set(ConnectionStatus::Error);
        self.bus.publish(CoreEvent::Error {
            code: err.code(),
            message: err.message(),
            severity: Severity::Fatal,
        });
    }

    fn sleep_interval(&self) {
        let deadline = Instant::now() + self.interval;
        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorConfig;

    fn device() -> DeviceConfig {
        DeviceConfig {
            electrode_count: 4,
            sample_interval_ms: 1,
            simulator: SimulatorConfig {
                handshake_delay_ms: 0,
                ..SimulatorConfig::default()
            },
            ..DeviceConfig::default()
        }
    }

    fn source(bus: &EventBus) -> SignalSource {
        SignalSource::simulated(AcquisitionConfig::default(), bus.clone())
    }

    fn statuses(events: &[crate::events::EventEnvelope]) -> Vec<ConnectionStatus> {
        events
            .iter()
            .filter_map(|e| match e.event {
                CoreEvent::StatusChanged { status } => Some(status),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_connect_publishes_transitions() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut source = source(&bus);

        source.connect(&device()).unwrap();
        assert_eq!(source.status(), ConnectionStatus::Connected);
        assert_eq!(source.session_id(), Some(1));
        assert_eq!(source.electrode_count(), Some(4));

        assert_eq!(
            statuses(&rx.drain()),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
        );
    }

    #[test]
    fn test_connect_is_idempotent() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut source = source(&bus);

        source.connect(&device()).unwrap();
        source.connect(&device()).unwrap();

        assert_eq!(source.session_id(), Some(1));
        assert_eq!(statuses(&rx.drain()).len(), 2);
    }

    #[test]
    fn test_invalid_device_is_rejected() {
        let bus = EventBus::new(16);
        let mut source = source(&bus);
        let config = DeviceConfig {
            electrode_count: 0,
            ..device()
        };

        assert!(matches!(
            source.connect(&config),
            Err(ConnectionError::InvalidDeviceConfig { .. })
        ));
        assert_eq!(source.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_failed_handshake_leaves_error_status() {
        let bus = EventBus::new(16);
        let mut source = source(&bus);
        let mut config = device();
        config.simulator.fail_handshake = true;

        assert!(source.connect(&config).is_err());
        assert_eq!(source.status(), ConnectionStatus::Error);
        assert!(source.start_acquisition().is_err());
    }

    #[test]
    fn test_start_requires_connection() {
        let bus = EventBus::new(16);
        let mut source = source(&bus);
        assert_eq!(
            source.start_acquisition(),
            Err(AcquisitionError::NotConnected)
        );
    }

    #[test]
    fn test_frames_flow_and_double_start_fails() {
        let bus = EventBus::new(4096);
        let mut source = source(&bus);
        source.connect(&device()).unwrap();
        source.start_acquisition().unwrap();
        assert_eq!(
            source.start_acquisition(),
            Err(AcquisitionError::AlreadyAcquiring)
        );

        thread::sleep(Duration::from_millis(40));
        source.stop_acquisition();
        assert!(!source.is_acquiring());

        let batch = source.drain_frames();
        assert!(!batch.frames.is_empty());
        assert_eq!(batch.stale_dropped, 0);
        for (i, frame) in batch.frames.iter().enumerate() {
            assert_eq!(frame.sequence, i as u64);
            assert_eq!(frame.electrode_count, 4);
            assert_eq!(frame.session_id, 1);
        }
    }

    #[test]
    fn test_disconnect_flushes_and_ends_frames() {
        let bus = EventBus::new(8192);
        let mut rx = bus.subscribe();
        let mut source = source(&bus);
        source.connect(&device()).unwrap();
        source.start_acquisition().unwrap();
        thread::sleep(Duration::from_millis(30));

        source.disconnect();
        assert_eq!(source.status(), ConnectionStatus::Disconnected);
        assert!(source.drain_frames().frames.is_empty());

        let events = rx.drain();
        let disconnected_at = events
            .iter()
            .position(|e| {
                matches!(
                    e.event,
                    CoreEvent::StatusChanged {
                        status: ConnectionStatus::Disconnected
                    }
                )
            })
            .unwrap();
        assert!(events[disconnected_at + 1..]
            .iter()
            .all(|e| !matches!(e.event, CoreEvent::SignalsReceived(_))));

        thread::sleep(Duration::from_millis(20));
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_reconnect_starts_new_session() {
        let bus = EventBus::new(4096);
        let mut source = source(&bus);
        source.connect(&device()).unwrap();
        source.disconnect();
        source.connect(&device()).unwrap();
        assert_eq!(source.session_id(), Some(2));
    }

    #[test]
    fn test_hardware_fault_moves_to_error() {
        let bus = EventBus::new(4096);
        let mut rx = bus.subscribe();
        let mut source = source(&bus);
        let mut config = device();
        config.simulator.fault_after_frames = Some(3);

        source.connect(&config).unwrap();
        source.start_acquisition().unwrap();

        let fault = rx.wait_for(Duration::from_secs(2), |event| {
            matches!(event, CoreEvent::Error { .. })
        });
        assert!(matches!(
            fault.map(|e| e.event),
            Some(CoreEvent::Error {
                severity: Severity::Fatal,
                ..
            })
        ));
        assert_eq!(source.status(), ConnectionStatus::Error);

        // Frames from the faulted session are never handed out
        let batch = source.drain_frames();
        assert!(batch.frames.is_empty());
        assert_eq!(batch.stale_dropped, 3);
    }
}
