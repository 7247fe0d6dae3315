//! Boundary to the vendor bus SDKs.
//!
//! The channel never talks to hardware directly. It translates its
//! [`ChannelConfig`] into [`BusParams`] and hands those to a [`BusDriver`],
//! which yields a [`CanBus`] session. Implementations wrap the vendor SDK of
//! the selected backend; [`crate::sim`] provides an in-memory one.

pub mod pcan;
pub mod vector;

use core::fmt;
use std::time::Duration;

use log::warn;

use crate::config::{Backend, ChannelConfig};
use crate::frame::{Frame, ReceivedFrame};

pub use pcan::PcanBusParams;
pub use vector::{VectorBusParams, detect_serial_number};

/// Failure reported by a bus driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A bus-level condition such as an error counter warning, lost
    /// arbitration or a momentary disconnect.
    Can(String),
    /// Any other failure of the driver or device.
    Device(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Can(msg) => write!(f, "{msg}"),
            BusError::Device(msg) => write!(f, "device failure: {msg}"),
        }
    }
}

impl std::error::Error for BusError {}

/// Construction request for a bus session, one variant per backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BusParams {
    Pcan(PcanBusParams),
    Vector(VectorBusParams),
}

impl BusParams {
    /// Translate a channel configuration into the backend's construction call.
    ///
    /// This performs no I/O. Settings that have no effect for the chosen
    /// backend are reported with a warning.
    pub fn from_config(config: &ChannelConfig) -> Self {
        if config.enable_brs && !config.is_fd {
            warn!("Bitrate switch will have no effect because option is_fd is set to false.");
        }
        match &config.backend {
            Backend::Pcan(settings) => BusParams::Pcan(PcanBusParams::new(settings, config)),
            Backend::Vector(settings) => {
                BusParams::Vector(VectorBusParams::new(settings, config))
            }
        }
    }

    /// Whether the bus is created in CAN FD mode.
    pub fn is_fd(&self) -> bool {
        match self {
            BusParams::Pcan(p) => p.fd,
            BusParams::Vector(v) => v.fd,
        }
    }
}

/// An open bus session.
///
/// Dropping a session without calling [`CanBus::shutdown`] is allowed but
/// leaves the release of the hardware to the implementation's `Drop`.
pub trait CanBus {
    /// Submit a frame for transmission.
    fn send(&mut self, frame: &Frame) -> Result<(), BusError>;

    /// Wait up to `timeout` for a frame.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn recv(&mut self, timeout: Duration) -> Result<Option<ReceivedFrame>, BusError>;

    /// Release the hardware.
    fn shutdown(&mut self);
}

/// Factory for bus sessions of one backend.
pub trait BusDriver {
    type Bus: CanBus;

    /// Construct a bus session.
    fn open(&mut self, params: &BusParams) -> Result<Self::Bus, BusError>;

    /// Serial numbers of the connected devices, used for automatic device
    /// selection. Zero means "virtual / no serial".
    fn detected_serials(&self) -> Vec<u32> {
        Vec::new()
    }
}
