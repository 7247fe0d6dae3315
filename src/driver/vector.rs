//! Vector-style bus construction parameters and device selection.

use std::time::Duration;

use log::info;

use crate::config::{CanFilter, ChannelConfig, VectorSerial, VectorSettings};
use crate::{Error, Result};

/// Everything a Vector-style driver needs to create a bus.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorBusParams {
    pub poll_interval: Duration,
    pub rx_queue_size: u32,
    /// Device serial number; `None` addresses a global channel index
    pub serial: Option<u32>,
    pub app_name: Option<String>,
    pub channel: u32,
    pub bitrate: u32,
    pub data_bitrate: u32,
    pub fd: bool,
    pub can_filters: Vec<CanFilter>,
    /// Serial selection still to be resolved against the connected devices
    pub(crate) auto_serial: bool,
}

impl VectorBusParams {
    pub fn new(settings: &VectorSettings, config: &ChannelConfig) -> Self {
        let (serial, auto_serial) = match settings.serial {
            VectorSerial::Unset => (None, false),
            VectorSerial::Auto => (None, true),
            VectorSerial::Number(n) => (Some(n), false),
        };
        Self {
            poll_interval: settings.poll_interval,
            rx_queue_size: settings.rx_queue_size,
            serial,
            app_name: settings.app_name.clone(),
            channel: settings.channel,
            bitrate: settings.bitrate,
            data_bitrate: settings.data_bitrate,
            fd: config.is_fd,
            can_filters: config.can_filters.clone(),
            auto_serial,
        }
    }

    /// True when the serial number must be detected before opening.
    pub fn needs_detection(&self) -> bool {
        self.auto_serial
    }

    /// Fix the serial number chosen by automatic detection.
    pub fn with_detected_serial(mut self, serials: &[u32]) -> Result<Self> {
        if self.auto_serial {
            self.serial = Some(detect_serial_number(serials)?);
            self.auto_serial = false;
        }
        Ok(self)
    }
}

/// Pick the device to use among the detected serial numbers.
///
/// Serial number zero denotes virtual channels and is ignored. When several
/// devices are connected the lowest serial number wins.
pub fn detect_serial_number(serials: &[u32]) -> Result<u32> {
    let serial = serials
        .iter()
        .copied()
        .filter(|s| *s != 0)
        .min()
        .ok_or(Error::NoDeviceAvailable)?;
    info!("Using Vector Box with serial number {}", serial);
    Ok(serial)
}
