//! PCAN-style bus construction parameters.

use crate::config::{BitTiming, BusState, CanFilter, ChannelConfig, PcanSettings};

/// Everything a PCAN-style driver needs to create a bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcanBusParams {
    pub interface: String,
    pub channel: String,
    pub state: BusState,
    /// Nominal bitrate in bit/s, ignored by the driver in FD mode
    pub bitrate: u32,
    pub fd: bool,
    pub timing: BitTiming,
    pub can_filters: Vec<CanFilter>,
}

impl PcanBusParams {
    pub fn new(settings: &PcanSettings, config: &ChannelConfig) -> Self {
        Self {
            interface: settings.interface.clone(),
            channel: settings.channel.clone(),
            state: config.state,
            bitrate: settings.bitrate,
            fd: config.is_fd,
            timing: config.timing,
            can_filters: config.can_filters.clone(),
        }
    }
}
