//! Controller configuration
//!
//! Every struct has a `Default` and deserializes with missing fields filled
//! from it, so a JSON file only needs the settings it changes.

use std::time::Duration;

use rxctl_protocol::OutputProtocol;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::module::tod::TodMode;

/// Default UDP control port
pub const DEFAULT_PORT: u16 = 8617;

/// Default transport receive timeout (ms)
pub const DEFAULT_TIMEOUT_MS: u64 = 250;

/// Optional channel compositions built during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Insert a free SWDDC between every NBDDC and its output
    pub enable_inline_swddc: bool,
    /// Turn the remaining SWDDCs into secondary channels of the NBDDCs
    pub enable_secondary_tuners: bool,
    /// Pair FFT engines with outputs and park them in the FFT pool
    pub enable_fft_channels: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_inline_swddc: false,
            enable_secondary_tuners: false,
            enable_fft_channels: true,
        }
    }
}

/// Retry policy and tolerances of validated setters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Set/readback attempts before giving up
    pub retries: u32,
    /// Pause between attempts (ms)
    pub interval_ms: u64,
    /// Tolerance for frequency requests (percent)
    pub frequency_tolerance_percent: f64,
    /// Tolerance for every other request (percent)
    pub tolerance_percent: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            interval_ms: 80,
            frequency_tolerance_percent: 100.0,
            tolerance_percent: 1.0,
        }
    }
}

impl ValidationConfig {
    /// Pause between attempts
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Time-variance monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Start the monitor after construction
    pub enabled: bool,
    /// Sampling period (ms)
    pub interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 1_000,
        }
    }
}

impl MonitorConfig {
    /// Sampling period
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Time-of-day setup applied at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Set radio time from the host clock when the mode allows it
    pub initialize: bool,
    /// Mode to select before initializing; `None` keeps the radio's mode
    pub mode: Option<TodMode>,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            initialize: true,
            mode: None,
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Radio host name or address
    pub host: String,
    /// Radio control port
    pub port: u16,
    /// Transport receive timeout (ms)
    pub timeout_ms: u64,
    /// Consecutive empty reads that end a flush
    pub flush_retries: u32,
    /// Optional channel compositions
    pub features: FeatureFlags,
    /// Validated-setter policy
    pub validation: ValidationConfig,
    /// Minimum NIC bit rate required at connect time
    pub min_bit_rate: Option<u64>,
    /// Output protocol the client will configure; selects the time format
    pub output_protocol: OutputProtocol,
    /// Time-of-day setup
    pub time: TimeConfig,
    /// Time-variance monitor
    pub monitor: MonitorConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            flush_retries: 2,
            features: FeatureFlags::default(),
            validation: ValidationConfig::default(),
            min_bit_rate: None,
            output_protocol: OutputProtocol::default(),
            time: TimeConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Configuration for `host:port` with every other setting defaulted
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Transport receive timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load from JSON
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
    }
}
