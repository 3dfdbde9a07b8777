use std::f32::consts::PI;
use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::config::{DeviceConfig, SimulatorConfig};
use crate::error::{AcquisitionError, ConnectionError};

use super::ElectrodeBackend;

/// Simulated multi-electrode array used for testing and CLI runs.
///
/// Each electrode carries a sine wave with a per-electrode phase plus uniform
/// noise from a seeded RNG. The RNG is reseeded on every handshake, so every
/// session of the same configuration yields the same frame sequence.
pub struct SimulatedMea {
    config: SimulatorConfig,
    rng: StdRng,
    frames_read: u64,
    open: bool,
}

impl SimulatedMea {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            frames_read: 0,
            open: false,
        }
    }

    /// Flat zero signal on every electrode
    pub fn silent() -> Self {
        Self::new(SimulatorConfig {
            amplitude_uv: 0.0,
            noise_uv: 0.0,
            handshake_delay_ms: 0,
            ..SimulatorConfig::default()
        })
    }

    fn sample(&mut self, electrode: usize) -> f32 {
        let period = self.config.carrier_period_frames.max(1) as f32;
        let phase = electrode as f32 * PI / 8.0;
        let carrier =
            self.config.amplitude_uv * (2.0 * PI * self.frames_read as f32 / period + phase).sin();
        let noise = if self.config.noise_uv > 0.0 {
            self.rng.gen_range(-1.0_f32..=1.0) * self.config.noise_uv
        } else {
            0.0
        };
        carrier + noise
    }
}

impl Default for SimulatedMea {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl ElectrodeBackend for SimulatedMea {
    fn handshake(&mut self, config: &DeviceConfig) -> Result<(), ConnectionError> {
        // The device config carries its own simulator section; it wins over
        // the constructor's so a reconnect can change behaviour.
        self.config = config.simulator.clone();

        if self.config.handshake_delay_ms > config.handshake_timeout_ms {
            return Err(ConnectionError::DeviceUnreachable {
                device: format!(
                    "{} (no answer within {} ms)",
                    config.name, config.handshake_timeout_ms
                ),
            });
        }
        if self.config.handshake_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.handshake_delay_ms));
        }
        if self.config.fail_handshake {
            return Err(ConnectionError::HandshakeFailed {
                reason: format!("{} rejected the handshake", config.name),
            });
        }

        self.rng = StdRng::seed_from_u64(self.config.seed);
        self.frames_read = 0;
        self.open = true;
        Ok(())
    }

    fn read_frame(
        &mut self,
        electrode_count: usize,
        out: &mut Vec<f32>,
    ) -> Result<(), AcquisitionError> {
        if !self.open {
            return Err(AcquisitionError::NotConnected);
        }
        if let Some(limit) = self.config.fault_after_frames {
            if self.frames_read >= limit {
                return Err(AcquisitionError::HardwareFault {
                    details: format!("simulated fault after {} frames", limit),
                });
            }
        }

        out.clear();
        for electrode in 0..electrode_count {
            let value = self.sample(electrode);
            out.push(value);
        }
        self.frames_read += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.open = false;
    }

    fn name(&self) -> &str {
        "simulated-mea"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(simulator: SimulatorConfig) -> DeviceConfig {
        DeviceConfig {
            simulator,
            ..DeviceConfig::default()
        }
    }

    fn quick() -> SimulatorConfig {
        SimulatorConfig {
            handshake_delay_ms: 0,
            ..SimulatorConfig::default()
        }
    }

    #[test]
    fn test_read_before_handshake_fails() {
        let mut mea = SimulatedMea::default();
        let mut out = Vec::new();
        assert_eq!(
            mea.read_frame(8, &mut out),
            Err(AcquisitionError::NotConnected)
        );
    }

    #[test]
    fn test_sessions_are_reproducible() {
        let config = device(quick());
        let mut mea = SimulatedMea::default();
        let mut first = Vec::new();
        let mut second = Vec::new();
        let mut out = Vec::new();

        mea.handshake(&config).unwrap();
        for _ in 0..10 {
            mea.read_frame(8, &mut out).unwrap();
            first.extend_from_slice(&out);
        }
        mea.release();

        mea.handshake(&config).unwrap();
        for _ in 0..10 {
            mea.read_frame(8, &mut out).unwrap();
            second.extend_from_slice(&out);
        }

        assert_eq!(first, second);
    }

    #[test]
    fn test_silent_array_reads_zero() {
        let mut mea = SimulatedMea::silent();
        let config = DeviceConfig {
            simulator: SimulatorConfig {
                amplitude_uv: 0.0,
                noise_uv: 0.0,
                handshake_delay_ms: 0,
                ..SimulatorConfig::default()
            },
            ..DeviceConfig::default()
        };
        mea.handshake(&config).unwrap();

        let mut out = Vec::new();
        mea.read_frame(4, &mut out).unwrap();
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn test_handshake_failure_injection() {
        let mut mea = SimulatedMea::default();
        let config = device(SimulatorConfig {
            fail_handshake: true,
            ..quick()
        });
        assert!(matches!(
            mea.handshake(&config),
            Err(ConnectionError::HandshakeFailed { .. })
        ));
    }

    #[test]
    fn test_slow_device_is_unreachable() {
        let mut mea = SimulatedMea::default();
        let mut config = device(SimulatorConfig {
            handshake_delay_ms: 50,
            ..quick()
        });
        config.handshake_timeout_ms = 10;
        assert!(matches!(
            mea.handshake(&config),
            Err(ConnectionError::DeviceUnreachable { .. })
        ));
    }

    #[test]
    fn test_fault_after_frames() {
        let mut mea = SimulatedMea::default();
        mea.handshake(&device(SimulatorConfig {
            fault_after_frames: Some(2),
            ..quick()
        }))
        .unwrap();

        let mut out = Vec::new();
        assert!(mea.read_frame(2, &mut out).is_ok());
        assert!(mea.read_frame(2, &mut out).is_ok());
        assert!(matches!(
            mea.read_frame(2, &mut out),
            Err(AcquisitionError::HardwareFault { .. })
        ));
    }
}
