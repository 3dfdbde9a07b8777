//! Configuration management for the bio-feedback mining core
//!
//! This module provides runtime configuration loading from JSON files.
//! Every section has defaults so a missing or broken file never blocks
//! startup; the core only ever consumes the typed sections.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::signal::DEFAULT_FRAME_QUEUE_CAPACITY;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub mining: EngineConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

/// Electrode array connection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Human-readable device identifier used in logs and errors
    pub name: String,
    /// Number of electrodes; fixed for the lifetime of a connection session
    pub electrode_count: usize,
    /// Interval between frames in milliseconds
    pub sample_interval_ms: u64,
    /// Upper bound for the connect handshake
    pub handshake_timeout_ms: u64,
    /// Simulator parameters (used by the built-in simulated array)
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "sim-mea".to_string(),
            electrode_count: 8,
            sample_interval_ms: 4,
            handshake_timeout_ms: 500,
            simulator: SimulatorConfig::default(),
        }
    }
}

/// Parameters of the simulated electrode array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// RNG seed; identical seeds produce identical frame sequences
    pub seed: u64,
    /// Carrier amplitude in microvolts
    pub amplitude_uv: f32,
    /// Noise amplitude in microvolts (0 gives a pure carrier)
    pub noise_uv: f32,
    /// Carrier period measured in frames
    pub carrier_period_frames: u32,
    /// Simulated handshake delay
    pub handshake_delay_ms: u64,
    /// Make every handshake fail
    #[serde(default)]
    pub fail_handshake: bool,
    /// Report a hardware fault after this many frames
    #[serde(default)]
    pub fault_after_frames: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            amplitude_uv: 40.0,
            noise_uv: 5.0,
            carrier_period_frames: 64,
            handshake_delay_ms: 5,
            fail_handshake: false,
            fault_after_frames: None,
        }
    }
}

/// Acquisition pipeline parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Capacity of the SPSC frame queue between acquisition and coordinator
    pub frame_queue_capacity: usize,
    /// Log queue statistics every N frames (0 disables)
    pub log_every_n_frames: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            frame_queue_capacity: DEFAULT_FRAME_QUEUE_CAPACITY,
            log_every_n_frames: 2500,
        }
    }
}

/// Calibration filter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Frames required before a learning cycle runs
    pub min_frames: usize,
    /// Maximum frames kept in the coordinator's calibration window
    pub window_frames: usize,
    /// Weight of a new cycle's aggregate against the previous factor
    pub smoothing: f64,
    /// Pull toward 1.0 after a successful run
    pub success_gain: f64,
    /// Pull toward 0.0 after an unsuccessful run
    pub failure_decay: f64,
    /// Lower bound for per-electrode weights
    pub weight_min: f64,
    /// Upper bound for per-electrode weights
    pub weight_max: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_frames: 64,
            window_frames: 256,
            smoothing: 0.5,
            success_gain: 0.1,
            failure_decay: 0.05,
            weight_min: 0.1,
            weight_max: 4.0,
        }
    }
}

/// Mining engine timing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Difficulty used until the first explicit adjustment
    pub initial_difficulty: u64,
    /// Workers check the cancellation token every N hashes
    pub cancel_check_interval: u64,
    /// Minimum spacing between progress events
    pub progress_interval_ms: u64,
    /// Spacing between hashrate events
    pub hashrate_interval_ms: u64,
    /// Trailing window for the hashrate moving average
    pub hashrate_window_ms: u64,
    /// Continuous mode: how long to wait for feedback before the next run
    pub feedback_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_difficulty: 1 << 16,
            cancel_check_interval: 1024,
            progress_interval_ms: 100,
            hashrate_interval_ms: 1000,
            hashrate_window_ms: 5000,
            feedback_wait_ms: 250,
        }
    }
}

/// Feedback coordinator parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Tick interval of the coordination loop
    pub tick_interval_ms: u64,
    /// Start a run automatically when idle
    pub auto_mining: bool,
    /// Capacity of the notification bus before lagging consumers lose events
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 20,
            auto_mining: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or defaults if the file doesn't exist or
    /// the JSON is invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default location
    pub fn load() -> Self {
        Self::load_from_file("config/biominer.json")
    }
}
