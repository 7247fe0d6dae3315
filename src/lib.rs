#![forbid(unsafe_code)]

//! # can-channel
//!
//! A CAN / CAN FD channel adapter for test benches. It puts PCAN-style and
//! Vector-style interfaces behind one open / send / receive / close contract
//! and takes care of the hardware trace those interfaces can record.
//!
//! ## Features
//!
//! - **Configuration**: declarative [`ChannelConfig`] (JSON loadable with the
//!   `serde` feature), translated into backend construction parameters
//! - **Lifecycle**: at most one bus session per channel, close that never fails
//! - **Frame I/O**: classic and FD frames, standard and extended identifiers,
//!   receive that always resolves to a [`ReceiveResult`]
//! - **Tracing**: hardware trace bring-up on open, release on close
//! - **Trace merging**: the segments of all open/close cycles are merged into
//!   one renumbered `.trc` file by [`CanChannel::finalize`]
//!
//! The vendor SDKs stay outside the crate. A backend implements
//! [`driver::BusDriver`] (and [`diagnostics::DiagnosticDriver`] for tracing);
//! [`sim`] ships an in-memory implementation of both.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use can_channel::sim::{SimDiagnostics, SimDriver};
//! use can_channel::{CanChannel, ChannelConfig, ReceiveResult, Result};
//!
//! fn main() -> Result<()> {
//!     let mut config = ChannelConfig::default();
//!     config.trace.path = "traces/run.trc".into();
//!
//!     let mut channel =
//!         CanChannel::new(config, SimDriver::new())?.with_diagnostics(SimDiagnostics::new());
//!     channel.open()?;
//!     channel.send(&[0x10, 0x01], Some(0x7E0))?;
//!     if let ReceiveResult::Frame(rx) = channel.receive(Some(Duration::from_millis(50))) {
//!         println!("{:#x}: {:02X?}", rx.frame.raw_id(), rx.frame.data());
//!     }
//!     channel.close();
//!
//!     if let Some(merged) = channel.finalize() {
//!         println!("trace written to {}", merged.target.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Channel configuration |
//! | [`driver`] | Bus SDK boundary and parameter translation |
//! | [`diagnostics`] | Trace logger SDK boundary and trace bring-up |
//! | [`trace`] | Trace path handling and segment merging |
//! | [`sim`] | Simulated backend |
//! | [`error`] | Error types and [`Result`] alias |
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and installs no logger itself.

mod channel;
mod frame;

pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod sim;
pub mod trace;

// Re-export commonly used types at the crate root
pub use channel::{BUS_ERROR_COUNTER_PREFIX, CanChannel, ChannelState, LogFilter};
pub use config::{
    Backend, BitTiming, BusState, CanFilter, ChannelConfig, PcanSettings, PhaseTiming,
    TraceSettings, VectorSerial, VectorSettings,
};
pub use error::{Error, Result};
pub use frame::{
    Frame, MAX_CLASSIC_DATA_LEN, MAX_FD_DATA_LEN, ReceiveResult, ReceivedFrame, dlc_to_len,
    len_to_dlc,
};
pub use trace::{MergeOutcome, TraceTarget, merge_segments};
