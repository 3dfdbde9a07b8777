//! Notification bus between the core components and external consumers.
//!
//! Every component publishes onto one `tokio::sync::broadcast` channel, so all
//! consumers observe a single total order (the envelope `seq`). Publishing
//! never blocks: when a consumer falls more than `capacity` events behind, the
//! oldest events are overwritten and the consumer sees a lag count instead.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::Stream;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_stream::wrappers::BroadcastStream;

pub mod types;

pub use types::{CoreEvent, EventEnvelope};

/// Default capacity of the notification bus
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Many-producer notification bus with drop-oldest backpressure.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    next_seq: Arc<Mutex<u64>>,
    epoch: Instant,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_seq: Arc::new(Mutex::new(0)),
            epoch: Instant::now(),
        }
    }

    /// Publish an event. Fire-and-forget; returns the assigned sequence number.
    ///
    /// Sequence assignment and send happen under one lock so `seq` order is
    /// the delivery order even with concurrent producers.
    pub fn publish(&self, event: CoreEvent) -> u64 {
        let mut next = self
            .next_seq
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let seq = *next;
        *next += 1;

        let envelope = EventEnvelope {
            seq,
            timestamp_ms: self.epoch.elapsed().as_millis() as u64,
            event,
        };
        // No subscribers is not an error for a fire-and-forget bus
        let _ = self.tx.send(envelope);
        seq
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.tx.subscribe(),
            lagged: 0,
        }
    }

    /// Async adapter for consumers living on a runtime; lag gaps are skipped.
    pub fn stream(&self) -> impl Stream<Item = EventEnvelope> + Unpin {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|item| futures::future::ready(item.ok()))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Synchronous consumer handle for the bus
pub struct EventReceiver {
    rx: broadcast::Receiver<EventEnvelope>,
    lagged: u64,
}

impl EventReceiver {
    /// Next buffered event, if any. Lag gaps are counted and skipped.
    pub fn try_next(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(TryRecvError::Lagged(missed)) => {
                    self.lagged += missed;
                    tracing::warn!("[EventBus] Consumer lagged, {} events dropped", missed);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<EventEnvelope> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(envelope) = self.try_next() {
                return Some(envelope);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Wait up to `timeout` for the first event matching `predicate`,
    /// discarding everything before it
    pub fn wait_for<F>(&mut self, timeout: Duration, mut predicate: F) -> Option<EventEnvelope>
    where
        F: FnMut(&CoreEvent) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match self.recv_timeout(remaining) {
                Some(envelope) if predicate(&envelope.event) => return Some(envelope),
                Some(_) => continue,
                None => return None,
            }
        }
        None
    }

    /// Everything currently buffered
    pub fn drain(&mut self) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Some(envelope) = self.try_next() {
            events.push(envelope);
        }
        events
    }

    /// Total events this consumer lost to lag
    pub fn lagged(&self) -> u64 {
        self.lagged
    }
}
