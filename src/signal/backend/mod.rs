//! Hardware abstraction for electrode arrays.

use crate::config::DeviceConfig;
use crate::error::{AcquisitionError, ConnectionError};

mod simulated;

pub use simulated::SimulatedMea;

/// Trait implemented by electrode array drivers.
///
/// The signal source owns the connection state machine; a backend only
/// performs the device-level steps.
pub trait ElectrodeBackend: Send {
    /// Open the device and complete the handshake. May block briefly.
    fn handshake(&mut self, config: &DeviceConfig) -> Result<(), ConnectionError>;

    /// Read one frame of `electrode_count` voltages into `out` (cleared first).
    fn read_frame(
        &mut self,
        electrode_count: usize,
        out: &mut Vec<f32>,
    ) -> Result<(), AcquisitionError>;

    /// Release the device. Must be safe to call in any state.
    fn release(&mut self);

    /// Identifier used in logs
    fn name(&self) -> &str;
}
