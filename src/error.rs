//! Error types for channel operations.
//!
//! This module defines the [`Error`] enum returned by the fallible parts of the
//! channel API. Only construction-time validation, [`CanChannel::open`] and
//! [`CanChannel::send`] surface errors to the caller; receive, close and trace
//! handling degrade to log messages instead.
//!
//! # Example
//!
//! ```no_run
//! use can_channel::{ChannelConfig, Error, Result};
//!
//! fn load(path: &str) -> Result<ChannelConfig> {
//!     match ChannelConfig::load_from_file(path) {
//!         Ok(config) => Ok(config),
//!         Err(Error::ConfigError(msg)) => {
//!             eprintln!("Bad channel configuration: {}", msg);
//!             Err(Error::ConfigError(msg))
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! ```
//!
//! [`CanChannel::open`]: crate::CanChannel::open
//! [`CanChannel::send`]: crate::CanChannel::send

use core::fmt;

use crate::driver::BusError;

/// Errors that can occur while building or driving a CAN channel.
#[derive(Debug)]
pub enum Error {
    /// The configured trace path ends in an extension other than `.trc`.
    InvalidTracePath(String),

    /// An I/O error occurred while touching the trace directory or files.
    IOError(std::io::Error),

    /// A configuration document could not be read or parsed.
    ConfigError(String),

    /// `open` was called while a bus session is already live.
    AlreadyOpen,

    /// A frame operation was attempted without an open bus.
    NotOpen,

    /// No destination identifier was passed and none is configured.
    MissingDestination,

    /// The identifier does not fit the configured identifier width.
    InvalidIdentifier {
        /// The rejected identifier
        id: u32,
        /// Whether the channel is configured for 29-bit identifiers
        extended: bool,
    },

    /// The payload is longer than the frame format allows.
    PayloadTooLong {
        /// Length of the rejected payload
        len: usize,
        /// Maximum length for the configured frame format
        max: usize,
    },

    /// The bus driver refused an operation.
    Bus(BusError),

    /// Automatic device detection found no usable interface.
    NoDeviceAvailable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidTracePath(name) => write!(
                f,
                "Trace name {name} is incorrect, it should be a trc file"
            ),
            Error::IOError(e) => write!(f, "I/O error: {e}"),
            Error::ConfigError(s) => write!(f, "Configuration error: {s}"),
            Error::AlreadyOpen => write!(f, "Channel is already open"),
            Error::NotOpen => write!(f, "Channel is not open"),
            Error::MissingDestination => {
                write!(f, "No destination identifier given and no remote id configured")
            }
            Error::InvalidIdentifier { id, extended } => {
                let width = if *extended { 29 } else { 11 };
                write!(f, "Identifier {id:#x} does not fit in {width} bits")
            }
            Error::PayloadTooLong { len, max } => {
                write!(f, "Payload of {len} bytes exceeds the maximum of {max} bytes")
            }
            Error::Bus(e) => write!(f, "Bus error: {e}"),
            Error::NoDeviceAvailable => write!(f, "No interface device is currently available"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IOError(e) => Some(e),
            Error::Bus(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IOError(err)
    }
}

impl From<BusError> for Error {
    fn from(err: BusError) -> Self {
        Error::Bus(err)
    }
}

/// A specialized Result type for channel operations.
pub type Result<T> = core::result::Result<T, Error>;
