//! Declarative channel configuration.
//!
//! A [`ChannelConfig`] describes everything needed to bring a channel up:
//! which backend to use, bit timing, frame flags, reception filters and the
//! hardware trace settings. It is plain data; validation happens when the
//! config is handed to [`CanChannel::new`](crate::CanChannel::new).
//!
//! With the `serde` feature (enabled by default) configurations can be loaded
//! from JSON. Every field has a default, so a document only lists what it
//! changes:
//!
//! ```
//! use can_channel::{Backend, ChannelConfig};
//!
//! let config = ChannelConfig::from_json_str(
//!     r#"{ "remote_id": 1280, "trace": { "path": "traces/run.trc" } }"#,
//! )?;
//! assert_eq!(config.remote_id, Some(0x500));
//! assert!(matches!(config.backend, Backend::Pcan(_)));
//! # Ok::<(), can_channel::Error>(())
//! ```

use std::time::Duration;

use crate::trace::DEFAULT_TRACE_SIZE_MB;

#[cfg(feature = "serde")]
use crate::{Error, Result};

/// Error state the controller is put in when the bus is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum BusState {
    #[default]
    Active,
    Passive,
    Error,
}

/// Bit timing of one phase of a CAN FD frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseTiming {
    /// Clock prescaler for the time quantum
    pub brp: u32,
    /// Quanta from the sync segment to the sample point
    pub tseg1: u32,
    /// Quanta from the sample point to the end of the bit
    pub tseg2: u32,
    /// Synchronization jump width
    pub sjw: u32,
}

impl PhaseTiming {
    pub const fn new(brp: u32, tseg1: u32, tseg2: u32, sjw: u32) -> Self {
        Self {
            brp,
            tseg1,
            tseg2,
            sjw,
        }
    }

    /// Resulting bitrate for the given controller clock, in bit/s.
    ///
    /// Returns `None` when the prescaler is zero.
    pub fn bitrate(&self, f_clock_mhz: u32) -> Option<u32> {
        let quanta = 1 + self.tseg1 + self.tseg2;
        let divisor = self.brp.checked_mul(quanta).filter(|d| *d != 0)?;
        Some((f_clock_mhz as u64 * 1_000_000 / divisor as u64) as u32)
    }
}

/// Full bit timing: controller clock plus nominal and data phase timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BitTiming {
    /// Controller clock in MHz
    pub f_clock_mhz: u32,
    /// Arbitration phase timing
    pub nominal: PhaseTiming,
    /// Data phase timing (CAN FD only)
    pub data: PhaseTiming,
}

impl Default for BitTiming {
    fn default() -> Self {
        Self {
            f_clock_mhz: 80,
            nominal: PhaseTiming::new(2, 63, 16, 16),
            data: PhaseTiming::new(4, 7, 2, 2),
        }
    }
}

/// A reception filter: frames pass when `id & can_mask == can_id & can_mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanFilter {
    pub can_id: u32,
    pub can_mask: u32,
    /// Restrict the filter to extended (`Some(true)`) or standard
    /// (`Some(false)`) frames
    #[cfg_attr(feature = "serde", serde(default))]
    pub extended: Option<bool>,
}

impl CanFilter {
    pub const fn new(can_id: u32, can_mask: u32) -> Self {
        Self {
            can_id,
            can_mask,
            extended: None,
        }
    }

    /// Returns true if a frame with this identifier passes the filter.
    pub fn matches(&self, id: u32, extended: bool) -> bool {
        if let Some(want) = self.extended {
            if want != extended {
                return false;
            }
        }
        id & self.can_mask == self.can_id & self.can_mask
    }
}

/// Hardware trace (diagnostic logger) settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TraceSettings {
    /// Empty, a directory, or a path ending in `.trc`
    pub path: String,
    /// Maximum segment size in MB, valid range `(0, 100]`
    pub size_mb: i64,
    /// Whether the hardware trace is activated at all
    pub enabled: bool,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            path: String::new(),
            size_mb: DEFAULT_TRACE_SIZE_MB as i64,
            enabled: true,
        }
    }
}

/// Parameters specific to PCAN-style interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PcanSettings {
    /// Interface module name
    pub interface: String,
    /// Channel name, e.g. `PCAN_USBBUS1`
    pub channel: String,
    /// Bitrate in bit/s, ignored in FD mode
    pub bitrate: u32,
}

impl Default for PcanSettings {
    fn default() -> Self {
        Self {
            interface: "pcan".into(),
            channel: "PCAN_USBBUS1".into(),
            bitrate: 500_000,
        }
    }
}

/// How the Vector device is selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum VectorSerial {
    /// Let the driver pick (global channel index)
    #[default]
    Unset,
    /// Use the connected box with the lowest serial number
    Auto,
    /// Use the box with this serial number
    Number(u32),
}

/// Parameters specific to Vector-style interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VectorSettings {
    /// Driver poll interval
    pub poll_interval: Duration,
    /// Number of messages in the receive queue
    pub rx_queue_size: u32,
    pub serial: VectorSerial,
    /// Channel index on the device
    pub channel: u32,
    /// Application name in the hardware configuration
    pub app_name: Option<String>,
    /// Nominal bitrate in bit/s
    pub bitrate: u32,
    /// Data phase bitrate in bit/s
    pub data_bitrate: u32,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            rx_queue_size: 524_288,
            serial: VectorSerial::Unset,
            channel: 3,
            app_name: None,
            bitrate: 500_000,
            data_bitrate: 2_000_000,
        }
    }
}

/// Backend selection with its backend-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "lowercase"))]
pub enum Backend {
    Pcan(PcanSettings),
    Vector(VectorSettings),
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Pcan(PcanSettings::default())
    }
}

impl Backend {
    /// Human readable channel name used in log messages.
    pub fn channel_name(&self) -> String {
        match self {
            Backend::Pcan(p) => p.channel.clone(),
            Backend::Vector(v) => format!("vector channel {}", v.channel),
        }
    }
}

/// Complete configuration of a CAN channel.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ChannelConfig {
    pub backend: Backend,
    pub state: BusState,
    pub timing: BitTiming,
    /// Initialize the bus in CAN FD mode
    pub is_fd: bool,
    /// Transmit FD frames with bitrate switching
    pub enable_brs: bool,
    /// Use 29-bit identifiers
    pub is_extended_id: bool,
    /// Default destination identifier for `send`
    pub remote_id: Option<u32>,
    pub can_filters: Vec<CanFilter>,
    pub trace: TraceSettings,
    /// Receive timeout used when the caller passes none (or zero)
    pub receive_timeout: Duration,
    /// Suppress the driver's "error counter" bus error messages
    pub bus_error_warning_filter: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            state: BusState::Active,
            timing: BitTiming::default(),
            is_fd: true,
            enable_brs: false,
            is_extended_id: false,
            remote_id: None,
            can_filters: Vec::new(),
            trace: TraceSettings::default(),
            receive_timeout: Duration::from_micros(1),
            bus_error_warning_filter: false,
        }
    }
}

impl ChannelConfig {
    /// Default configuration for a Vector interface.
    pub fn vector() -> Self {
        Self {
            backend: Backend::Vector(VectorSettings::default()),
            trace: TraceSettings {
                enabled: false,
                ..TraceSettings::default()
            },
            ..Self::default()
        }
    }

    /// Parse a configuration from a JSON document.
    ///
    /// Requires the `serde` feature.
    #[cfg(feature = "serde")]
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("Failed to parse channel config: {}", e)))
    }

    /// Load a configuration from a JSON file.
    ///
    /// Requires the `serde` feature.
    #[cfg(feature = "serde")]
    pub fn load_from_file(path: &str) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read {}: {}", path, e)))?;
        Self::from_json_str(&json)
    }

    /// Serialize the configuration to pretty-printed JSON.
    ///
    /// Requires the `serde` feature.
    #[cfg(feature = "serde")]
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize channel config: {}", e)))
    }
}
