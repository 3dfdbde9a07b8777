// FrameQueue - bounded lock-free frame transfer
//
// The acquisition thread is the single producer and the coordinator is the
// single consumer, so a wait-free SPSC ring buffer carries the frames.
//
// Backpressure: the producer never blocks. When the ring is full the newest
// frame is dropped and counted; the coordinator sees the count through
// `dropped()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

use super::frame::SignalFrame;

pub const DEFAULT_FRAME_QUEUE_CAPACITY: usize = 1024;

/// Producer half, owned by the acquisition thread while it runs
pub struct FrameProducer {
    inner: Producer<SignalFrame>,
    dropped: Arc<AtomicU64>,
}

/// Consumer half, owned by the signal source
pub struct FrameConsumer {
    inner: Consumer<SignalFrame>,
    dropped: Arc<AtomicU64>,
}

pub struct FrameQueue;

impl FrameQueue {
    /// Create a queue pair holding at most `capacity` frames
    ///
    /// # Panics
    /// Panics if capacity is 0
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize) -> (FrameProducer, FrameConsumer) {
        assert!(capacity > 0, "frame queue capacity must be greater than 0");

        let (producer, consumer) = RingBuffer::new(capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        (
            FrameProducer {
                inner: producer,
                dropped: Arc::clone(&dropped),
            },
            FrameConsumer {
                inner: consumer,
                dropped,
            },
        )
    }
}

impl FrameProducer {
    /// Push a frame; returns false when the frame was dropped
    pub fn push(&mut self, frame: SignalFrame) -> bool {
        match self.inner.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

impl FrameConsumer {
    /// Pop every buffered frame in acquisition order
    pub fn pop_all(&mut self) -> Vec<SignalFrame> {
        let mut frames = Vec::with_capacity(self.inner.slots());
        while let Ok(frame) = self.inner.pop() {
            frames.push(frame);
        }
        frames
    }

    /// Discard every buffered frame, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let mut cleared = 0;
        while self.inner.pop().is_ok() {
            cleared += 1;
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.inner.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Frames dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
