//! CAN and CAN FD frames exchanged with the bus driver.
//!
//! CAN FD uses a non-linear DLC to data length mapping for values > 8:
//! - DLC 0-8: data length = DLC
//! - DLC 9: 12 bytes
//! - DLC 10: 16 bytes
//! - DLC 11: 20 bytes
//! - DLC 12: 24 bytes
//! - DLC 13: 32 bytes
//! - DLC 14: 48 bytes
//! - DLC 15: 64 bytes
//!
//! Outbound FD payloads whose length has no exact DLC are zero-padded up to
//! the next valid length, as the controller would do on the wire.

use embedded_can::{ExtendedId, Id, StandardId};

use crate::{Error, Result};

/// Maximum classic CAN data length in bytes.
pub const MAX_CLASSIC_DATA_LEN: usize = 8;

/// Maximum CAN FD data length in bytes.
pub const MAX_FD_DATA_LEN: usize = 64;

/// CAN FD DLC to data length mapping.
#[inline]
pub const fn dlc_to_len(dlc: u8) -> usize {
    match dlc {
        0..=8 => dlc as usize,
        9 => 12,
        10 => 16,
        11 => 20,
        12 => 24,
        13 => 32,
        14 => 48,
        _ => 64,
    }
}

/// Data length to CAN FD DLC mapping.
///
/// Returns the minimum DLC that can hold the given data length.
#[inline]
pub const fn len_to_dlc(len: usize) -> u8 {
    match len {
        0..=8 => len as u8,
        9..=12 => 9,
        13..=16 => 10,
        17..=20 => 11,
        21..=24 => 12,
        25..=32 => 13,
        33..=48 => 14,
        _ => 15,
    }
}

/// Build an [`Id`] from a raw identifier, checking it fits the requested width.
pub fn make_id(raw: u32, extended: bool) -> Result<Id> {
    let id = if extended {
        ExtendedId::new(raw).map(Id::Extended)
    } else {
        u16::try_from(raw)
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard)
    };
    id.ok_or(Error::InvalidIdentifier { id: raw, extended })
}

/// Raw numeric value of an identifier.
#[inline]
pub fn raw_id(id: Id) -> u32 {
    match id {
        Id::Standard(id) => id.as_raw() as u32,
        Id::Extended(id) => id.as_raw(),
    }
}

/// A classic CAN or CAN FD data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    id: Id,
    data: [u8; MAX_FD_DATA_LEN],
    len: usize,
    is_fd: bool,
    bitrate_switch: bool,
}

impl Frame {
    /// Create a classic CAN frame (up to 8 bytes).
    pub fn new_classic(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_CLASSIC_DATA_LEN {
            return None;
        }
        let mut frame_data = [0u8; MAX_FD_DATA_LEN];
        frame_data[..data.len()].copy_from_slice(data);
        Some(Self {
            id: id.into(),
            data: frame_data,
            len: data.len(),
            is_fd: false,
            bitrate_switch: false,
        })
    }

    /// Create a CAN FD frame (up to 64 bytes).
    ///
    /// The data length is rounded up to the nearest length a DLC can express.
    pub fn new_fd(id: impl Into<Id>, data: &[u8], bitrate_switch: bool) -> Option<Self> {
        if data.len() > MAX_FD_DATA_LEN {
            return None;
        }
        let mut frame_data = [0u8; MAX_FD_DATA_LEN];
        frame_data[..data.len()].copy_from_slice(data);
        Some(Self {
            id: id.into(),
            data: frame_data,
            len: dlc_to_len(len_to_dlc(data.len())),
            is_fd: true,
            bitrate_switch,
        })
    }

    /// Build an outbound frame from a raw identifier and the channel's flags.
    ///
    /// `bitrate_switch` is ignored for classic frames.
    pub fn from_payload(
        raw_id: u32,
        payload: &[u8],
        extended: bool,
        fd: bool,
        bitrate_switch: bool,
    ) -> Result<Self> {
        let id = make_id(raw_id, extended)?;
        let frame = if fd {
            Self::new_fd(id, payload, bitrate_switch)
        } else {
            Self::new_classic(id, payload)
        };
        frame.ok_or(Error::PayloadTooLong {
            len: payload.len(),
            max: if fd {
                MAX_FD_DATA_LEN
            } else {
                MAX_CLASSIC_DATA_LEN
            },
        })
    }

    /// Returns the frame identifier.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Returns the raw numeric identifier.
    pub fn raw_id(&self) -> u32 {
        raw_id(self.id)
    }

    /// Returns the frame payload.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Returns true if this is a CAN FD frame.
    pub fn is_fd(&self) -> bool {
        self.is_fd
    }

    /// Returns true if the data phase uses the switched bitrate.
    pub fn bitrate_switch(&self) -> bool {
        self.bitrate_switch
    }

    /// Returns true if this frame carries a 29-bit identifier.
    pub fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    /// Returns the data length code.
    pub fn dlc(&self) -> u8 {
        len_to_dlc(self.len)
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Self::new_classic(id, data)
    }

    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        // Remote frames are not part of the channel contract.
        None
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.len.min(MAX_CLASSIC_DATA_LEN)
    }

    fn data(&self) -> &[u8] {
        &self.data[..self.len.min(MAX_CLASSIC_DATA_LEN)]
    }
}

/// A frame delivered by the bus together with its reception timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFrame {
    /// The received frame
    pub frame: Frame,
    /// Reception timestamp in seconds, as reported by the driver
    pub timestamp: f64,
}

impl ReceivedFrame {
    pub fn new(frame: Frame, timestamp: f64) -> Self {
        Self { frame, timestamp }
    }
}

/// Outcome of [`CanChannel::receive`](crate::CanChannel::receive).
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveResult {
    /// A frame arrived within the timeout.
    Frame(ReceivedFrame),
    /// Nothing arrived, or the bus reported a transient failure.
    Nothing,
    /// The channel could not attempt a reception at all.
    Error(String),
}

impl ReceiveResult {
    /// Payload and source identifier, if a frame was received.
    pub fn message(&self) -> Option<(&[u8], u32)> {
        match self {
            ReceiveResult::Frame(rx) => Some((rx.frame.data(), rx.frame.raw_id())),
            _ => None,
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, ReceiveResult::Nothing)
    }
}
