//! Electrode signal acquisition.
//!
//! `SignalSource` owns the connection state and the raw frames; the
//! coordinator pulls frames out of it with `drain_frames`.

pub mod backend;
pub mod frame;
pub mod frame_queue;
pub mod source;

pub use crate::config::DeviceConfig;
pub use backend::{ElectrodeBackend, SimulatedMea};
pub use frame::{ConnectionStatus, SignalFrame};
pub use frame_queue::{FrameConsumer, FrameProducer, FrameQueue, DEFAULT_FRAME_QUEUE_CAPACITY};
pub use source::{FrameBatch, SignalSource, MAX_ELECTRODES};
