//! The CAN channel: lifecycle, frame I/O and trace handling.
//!
//! A [`CanChannel`] moves through `Closed → Opening → Open → Closing →
//! Closed`. Frames can only be exchanged while it is `Open`. Hardware tracing
//! is brought up on open and torn down on close; neither may ever make the
//! bus unusable or a close fail. Once the owner is done with the channel it
//! calls [`CanChannel::finalize`], which consolidates the trace segments of
//! all open/close cycles into one file.

use core::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::{Backend, ChannelConfig};
use crate::diagnostics::{self, DiagnosticDriver, DiagnosticInterface, configure_trace};
use crate::driver::{BusDriver, BusError, BusParams, CanBus};
use crate::frame::{Frame, ReceiveResult};
use crate::trace::{MergeOutcome, TraceTarget, merge_segments};
use crate::{Error, Result};

/// Prefix of the driver's error-counter bus error messages.
pub const BUS_ERROR_COUNTER_PREFIX: &str = "Bus error: an error counter";

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Decides which bus error messages of one channel get logged.
pub struct LogFilter(Box<dyn Fn(&str) -> bool>);

impl LogFilter {
    /// Log a message only when `allow` returns true for it.
    pub fn new(allow: impl Fn(&str) -> bool + 'static) -> Self {
        Self(Box::new(allow))
    }

    /// Drop the "error counter" messages drivers emit on every bus error.
    pub fn bus_error_counter() -> Self {
        Self::new(|msg| !msg.starts_with(BUS_ERROR_COUNTER_PREFIX))
    }

    /// Returns true if `msg` should be logged.
    pub fn allows(&self, msg: &str) -> bool {
        (self.0)(msg)
    }
}

impl fmt::Debug for LogFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogFilter")
    }
}

/// A CAN / CAN FD channel on top of a bus driver.
///
/// # Example
///
/// ```
/// use can_channel::sim::SimDriver;
/// use can_channel::{CanChannel, ChannelConfig, ReceiveResult};
///
/// let config = ChannelConfig {
///     remote_id: Some(0x123),
///     ..ChannelConfig::vector()
/// };
/// let mut channel = CanChannel::new(config, SimDriver::new())?;
/// channel.open()?;
/// channel.send(&[0x01, 0x02], None)?;
/// assert_eq!(channel.receive(None), ReceiveResult::Nothing);
/// channel.close();
/// channel.finalize();
/// # Ok::<(), can_channel::Error>(())
/// ```
pub struct CanChannel<D: BusDriver> {
    config: ChannelConfig,
    params: BusParams,
    channel_name: String,
    driver: D,
    bus: Option<D::Bus>,
    state: ChannelState,
    /// Resolved trace settings, `None` when tracing is disabled
    trace: Option<TraceTarget>,
    diagnostics: Option<Box<dyn DiagnosticDriver>>,
    diagnostic: Option<Box<dyn DiagnosticInterface>>,
    /// Successful trace configurations over the channel's lifetime
    trace_count: usize,
    finalized: bool,
    log_filter: Option<LogFilter>,
}

impl<D: BusDriver> CanChannel<D> {
    /// Validate `config` and create a closed channel.
    ///
    /// Fails with [`Error::InvalidTracePath`] when the trace path does not
    /// name a directory or a `.trc` file. No hardware is touched.
    pub fn new(config: ChannelConfig, driver: D) -> Result<Self> {
        let target = TraceTarget::resolve(&config.trace)?;
        let trace = match (&config.backend, config.trace.enabled) {
            (Backend::Pcan(_), true) => Some(target),
            (Backend::Vector(_), true) => {
                warn!("Hardware trace is not available on Vector interfaces, tracing disabled.");
                None
            }
            (_, false) => None,
        };
        let params = BusParams::from_config(&config);
        let log_filter = config
            .bus_error_warning_filter
            .then(LogFilter::bus_error_counter);

        Ok(Self {
            channel_name: config.backend.channel_name(),
            config,
            params,
            driver,
            bus: None,
            state: ChannelState::Closed,
            trace,
            diagnostics: None,
            diagnostic: None,
            trace_count: 0,
            finalized: false,
            log_filter,
        })
    }

    /// Attach the diagnostic interface used for hardware tracing.
    pub fn with_diagnostics(mut self, driver: impl DiagnosticDriver + 'static) -> Self {
        self.diagnostics = Some(Box::new(driver));
        self
    }

    /// Replace the filter applied to bus error log messages.
    pub fn with_log_filter(mut self, filter: LogFilter) -> Self {
        self.log_filter = Some(filter);
        self
    }

    /// The configuration the channel was built from.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Bus construction parameters derived from the configuration.
    pub fn bus_params(&self) -> &BusParams {
        &self.params
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Returns true while a bus session is live.
    pub fn is_open(&self) -> bool {
        self.bus.is_some()
    }

    /// Resolved trace settings, if tracing is enabled.
    pub fn trace_target(&self) -> Option<&TraceTarget> {
        self.trace.as_ref()
    }

    /// Number of successful trace configurations so far.
    pub fn trace_count(&self) -> usize {
        self.trace_count
    }

    /// Open the bus and, if tracing is enabled, start the hardware trace.
    ///
    /// Trace failures are logged and never fail the open. Opening an already
    /// open channel is refused with [`Error::AlreadyOpen`].
    pub fn open(&mut self) -> Result<()> {
        if self.bus.is_some() {
            return Err(Error::AlreadyOpen);
        }
        self.state = ChannelState::Opening;

        let bus = self
            .resolve_params()
            .and_then(|params| self.driver.open(&params).map_err(Error::Bus));
        match bus {
            Ok(bus) => self.bus = Some(bus),
            Err(e) => {
                self.state = ChannelState::Closed;
                return Err(e);
            }
        }
        let mode = if self.params.is_fd() { "CAN FD" } else { "CAN" };
        info!("{} bus channel open: {}", mode, self.channel_name);

        if self.trace.is_some() && self.diagnostic.is_none() {
            self.start_trace();
        }
        self.state = ChannelState::Open;
        Ok(())
    }

    /// Shut the bus down and release the diagnostic interface.
    ///
    /// Never fails; calling it on a closed channel only retries the
    /// diagnostic release.
    pub fn close(&mut self) {
        self.state = ChannelState::Closing;
        match self.bus.take() {
            Some(mut bus) => {
                bus.shutdown();
                info!("CAN bus channel closed: {}", self.channel_name);
            }
            None => debug!("No open bus on {}", self.channel_name),
        }

        if self.trace.is_some() {
            match self.diagnostic.take() {
                Some(iface) => diagnostics::release(iface),
                None => debug!("No diagnostic interface to release on {}", self.channel_name),
            }
        }
        self.state = ChannelState::Closed;
    }

    /// Send `payload` to `destination`, or to the configured remote id.
    ///
    /// Frame format follows the configuration (FD, extended id, bitrate
    /// switch). Driver failures are returned as [`Error::Bus`].
    pub fn send(&mut self, payload: &[u8], destination: Option<u32>) -> Result<()> {
        let id = destination
            .or(self.config.remote_id)
            .ok_or(Error::MissingDestination)?;
        let frame = Frame::from_payload(
            id,
            payload,
            self.config.is_extended_id,
            self.config.is_fd,
            self.config.enable_brs,
        )?;
        let bus = self.bus.as_mut().ok_or(Error::NotOpen)?;
        bus.send(&frame)?;

        debug!(
            "{} sent CAN Message: id={:#x}, data={:02X?}",
            self.channel_name, id, payload
        );
        Ok(())
    }

    /// Wait up to `timeout` for a frame.
    ///
    /// `None` or a zero timeout uses the configured receive timeout. Bus and
    /// driver failures are logged and reported as [`ReceiveResult::Nothing`];
    /// [`ReceiveResult::Error`] only signals that no bus is open.
    pub fn receive(&mut self, timeout: Option<Duration>) -> ReceiveResult {
        let timeout = match timeout {
            Some(t) if !t.is_zero() => t,
            _ => self.config.receive_timeout,
        };
        let Some(bus) = self.bus.as_mut() else {
            return ReceiveResult::Error(Error::NotOpen.to_string());
        };

        let received = catch_unwind(AssertUnwindSafe(|| bus.recv(timeout)));
        match received {
            Err(_) => {
                error!(
                    "Bus driver panicked while receiving message via {}",
                    self.channel_name
                );
                ReceiveResult::Nothing
            }
            Ok(Ok(Some(rx))) => {
                debug!(
                    "received CAN Message: {:#x}, {:02X?}, {}",
                    rx.frame.raw_id(),
                    rx.frame.data(),
                    rx.timestamp
                );
                ReceiveResult::Frame(rx)
            }
            Ok(Ok(None)) => ReceiveResult::Nothing,
            Ok(Err(BusError::Can(msg))) => {
                if self.log_filter.as_ref().is_none_or(|f| f.allows(&msg)) {
                    debug!("encountered can error: {}", msg);
                }
                ReceiveResult::Nothing
            }
            Ok(Err(e)) => {
                error!(
                    "encountered error while receiving message via {}: {}",
                    self.channel_name, e
                );
                ReceiveResult::Nothing
            }
        }
    }

    /// Close the channel if needed and merge the trace segments it produced.
    ///
    /// Runs at most once per channel. Merge failures are logged, not
    /// returned.
    pub fn finalize(&mut self) -> Option<MergeOutcome> {
        if self.finalized {
            return None;
        }
        if self.bus.is_some() {
            self.close();
        }
        self.finalized = true;

        let target = self.trace.as_ref()?;
        match merge_segments(
            &target.directory,
            self.trace_count,
            target.file_name.as_deref(),
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "Failed to merge trace segments in {}: {}",
                    target.directory.display(),
                    e
                );
                None
            }
        }
    }

    fn resolve_params(&self) -> Result<BusParams> {
        match &self.params {
            BusParams::Vector(v) if v.needs_detection() => Ok(BusParams::Vector(
                v.clone()
                    .with_detected_serial(&self.driver.detected_serials())?,
            )),
            params => Ok(params.clone()),
        }
    }

    fn start_trace(&mut self) {
        let Some(target) = self.trace.as_ref() else {
            return;
        };
        let Some(factory) = self.diagnostics.as_mut() else {
            warn!(
                "No diagnostic interface attached, logging for {} not activated",
                self.channel_name
            );
            return;
        };

        let mut iface = match catch_unwind(AssertUnwindSafe(|| factory.initialize())) {
            Ok(Ok(iface)) => iface,
            Ok(Err(e)) => {
                error!("Could not initialize diagnostic interface: {}", e);
                error!("Logging for {} not activated", self.channel_name);
                return;
            }
            Err(_) => {
                error!("Diagnostic driver panicked in Initialize");
                error!("Logging for {} not activated", self.channel_name);
                return;
            }
        };
        let configured = catch_unwind(AssertUnwindSafe(|| {
            configure_trace(iface.as_mut(), &self.channel_name, target)
        }));
        match configured {
            Ok(Ok(())) => {
                if let Some(path) = target.target_path() {
                    debug!("Trace segments will be merged into {}", path.display());
                }
                self.trace_count += 1;
            }
            Ok(Err(e)) => {
                error!("{}", e);
                error!("Logging for {} not activated", self.channel_name);
            }
            Err(_) => {
                error!("Diagnostic driver panicked in SetValue");
                error!("Logging for {} not activated", self.channel_name);
            }
        }
        // Kept even after a failure so close still releases it.
        self.diagnostic = Some(iface);
    }
}

impl<D: BusDriver> Drop for CanChannel<D> {
    fn drop(&mut self) {
        if self.bus.is_some() {
            warn!("{} dropped while open, closing it", self.channel_name);
            self.close();
        }
        if self.trace.is_some() && !self.finalized && self.trace_count > 0 {
            warn!(
                "{} dropped without finalize, {} trace segment(s) left unmerged",
                self.channel_name, self.trace_count
            );
        }
    }
}
