//! In-memory simulated backend.
//!
//! [`SimDriver`] and [`SimDiagnostics`] implement the driver traits without
//! hardware. Both are cheap handles onto shared state, so a test keeps a clone
//! to script failures and inspect what the channel did after handing the other
//! clone to [`CanChannel::new`](crate::CanChannel::new).
//!
//! [`trace_segment`] renders a segment file the way the hardware logger lays
//! it out, for feeding the merger.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use crate::config::CanFilter;
use crate::diagnostics::{
    DiagnosticDriver, DiagnosticError, DiagnosticInterface, StatusCode, TraceParameter,
};
use crate::driver::{BusDriver, BusError, BusParams, CanBus};
use crate::frame::{Frame, ReceivedFrame};
use crate::trace::{MESSAGE_NUMBER_WIDTH, TRACE_HEADER_LINES};

#[derive(Default)]
struct BusLog {
    opened: Vec<BusParams>,
    sent: Vec<Frame>,
    rx: VecDeque<Result<Option<ReceivedFrame>, BusError>>,
    timeouts: Vec<Duration>,
    shutdowns: usize,
    fail_open: Option<BusError>,
    fail_send: Option<BusError>,
    panic_recv: bool,
    serials: Vec<u32>,
}

/// Simulated bus driver.
#[derive(Clone, Default)]
pub struct SimDriver {
    state: Rc<RefCell<BusLog>>,
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for the next `recv`.
    pub fn push_frame(&self, frame: Frame, timestamp: f64) {
        self.state
            .borrow_mut()
            .rx
            .push_back(Ok(Some(ReceivedFrame::new(frame, timestamp))));
    }

    /// Queue a failure for the next `recv`.
    pub fn push_error(&self, error: BusError) {
        self.state.borrow_mut().rx.push_back(Err(error));
    }

    /// Make every following `open` fail.
    pub fn fail_open(&self, error: Option<BusError>) {
        self.state.borrow_mut().fail_open = error;
    }

    /// Make every following `send` fail.
    pub fn fail_send(&self, error: Option<BusError>) {
        self.state.borrow_mut().fail_send = error;
    }

    /// Make every following `recv` panic, like a crashing vendor library.
    pub fn panic_on_recv(&self, panic: bool) {
        self.state.borrow_mut().panic_recv = panic;
    }

    /// Serial numbers reported as connected.
    pub fn set_serials(&self, serials: Vec<u32>) {
        self.state.borrow_mut().serials = serials;
    }

    /// Parameters of every successful `open`, in order.
    pub fn opened(&self) -> Vec<BusParams> {
        self.state.borrow().opened.clone()
    }

    /// Every frame handed to `send`.
    pub fn sent(&self) -> Vec<Frame> {
        self.state.borrow().sent.clone()
    }

    /// Timeouts passed to `recv`, in order.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.state.borrow().timeouts.clone()
    }

    pub fn shutdowns(&self) -> usize {
        self.state.borrow().shutdowns
    }
}

impl BusDriver for SimDriver {
    type Bus = SimBus;

    fn open(&mut self, params: &BusParams) -> Result<SimBus, BusError> {
        let mut state = self.state.borrow_mut();
        if let Some(e) = state.fail_open.clone() {
            return Err(e);
        }
        let can_filters = match params {
            BusParams::Pcan(p) => {
                let timing = &p.timing;
                let data_ok = !p.fd || timing.data.bitrate(timing.f_clock_mhz).is_some();
                if timing.nominal.bitrate(timing.f_clock_mhz).is_none() || !data_ok {
                    return Err(BusError::Device("invalid bit timing".into()));
                }
                p.can_filters.clone()
            }
            BusParams::Vector(v) => v.can_filters.clone(),
        };
        state.opened.push(params.clone());
        Ok(SimBus {
            state: Rc::clone(&self.state),
            can_filters,
        })
    }

    fn detected_serials(&self) -> Vec<u32> {
        self.state.borrow().serials.clone()
    }
}

/// Bus session handed out by [`SimDriver`].
///
/// Queued frames that pass none of the session's reception filters are
/// dropped, as the controller would.
pub struct SimBus {
    state: Rc<RefCell<BusLog>>,
    can_filters: Vec<CanFilter>,
}

impl SimBus {
    fn accepts(&self, frame: &Frame) -> bool {
        self.can_filters.is_empty()
            || self
                .can_filters
                .iter()
                .any(|f| f.matches(frame.raw_id(), frame.is_extended()))
    }
}

impl CanBus for SimBus {
    fn send(&mut self, frame: &Frame) -> Result<(), BusError> {
        let mut state = self.state.borrow_mut();
        if let Some(e) = state.fail_send.clone() {
            return Err(e);
        }
        state.sent.push(frame.clone());
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<ReceivedFrame>, BusError> {
        let mut state = self.state.borrow_mut();
        state.timeouts.push(timeout);
        if state.panic_recv {
            drop(state);
            panic!("simulated driver crash in recv");
        }
        while let Some(next) = state.rx.pop_front() {
            match next {
                Ok(Some(rx)) if !self.accepts(&rx.frame) => continue,
                other => return other,
            }
        }
        Ok(None)
    }

    fn shutdown(&mut self) {
        self.state.borrow_mut().shutdowns += 1;
    }
}

/// How the simulated interface answers `uninitialize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Uninitialize {
    #[default]
    Ok,
    /// Return a non-OK status code
    Status(StatusCode),
    /// Fail the call
    Error,
    /// Panic inside the driver
    Panic,
}

#[derive(Default)]
struct DiagState {
    calls: Vec<(String, TraceParameter)>,
    initializations: usize,
    uninitializations: usize,
    fail_initialize: bool,
    panic_initialize: bool,
    panic_set_value: bool,
    reject: Option<(fn(&TraceParameter) -> bool, StatusCode)>,
    no_segmentation: bool,
    uninitialize: Uninitialize,
    active_location: Option<PathBuf>,
}

/// Simulated diagnostic driver and interface.
#[derive(Clone, Default)]
pub struct SimDiagnostics {
    state: Rc<RefCell<DiagState>>,
}

impl SimDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `initialize` fail.
    pub fn fail_initialize(&self, fail: bool) {
        self.state.borrow_mut().fail_initialize = fail;
    }

    /// Make `initialize` panic.
    pub fn panic_on_initialize(&self, panic: bool) {
        self.state.borrow_mut().panic_initialize = panic;
    }

    /// Make every `set_value` panic.
    pub fn panic_on_set_value(&self, panic: bool) {
        self.state.borrow_mut().panic_set_value = panic;
    }

    /// Answer `code` to every parameter matching `matches`.
    pub fn reject(&self, matches: fn(&TraceParameter) -> bool, code: StatusCode) {
        self.state.borrow_mut().reject = Some((matches, code));
    }

    /// Report segmentation as unsupported, like the macOS driver.
    pub fn disable_segmentation(&self) {
        self.state.borrow_mut().no_segmentation = true;
    }

    pub fn set_uninitialize(&self, behavior: Uninitialize) {
        self.state.borrow_mut().uninitialize = behavior;
    }

    /// Every parameter written, with its channel name.
    pub fn calls(&self) -> Vec<(String, TraceParameter)> {
        self.state.borrow().calls.clone()
    }

    pub fn initializations(&self) -> usize {
        self.state.borrow().initializations
    }

    pub fn uninitializations(&self) -> usize {
        self.state.borrow().uninitializations
    }

    /// Directory of the running trace, if tracing was activated.
    pub fn active_location(&self) -> Option<PathBuf> {
        self.state.borrow().active_location.clone()
    }
}

impl DiagnosticDriver for SimDiagnostics {
    fn initialize(&mut self) -> Result<Box<dyn DiagnosticInterface>, DiagnosticError> {
        let mut state = self.state.borrow_mut();
        if state.panic_initialize {
            drop(state);
            panic!("simulated driver crash in initialize");
        }
        if state.fail_initialize {
            return Err(DiagnosticError("no diagnostic library".into()));
        }
        state.initializations += 1;
        Ok(Box::new(SimInterface {
            state: Rc::clone(&self.state),
            location: None,
        }))
    }
}

struct SimInterface {
    state: Rc<RefCell<DiagState>>,
    location: Option<PathBuf>,
}

impl DiagnosticInterface for SimInterface {
    fn set_value(
        &mut self,
        channel: &str,
        parameter: &TraceParameter,
    ) -> Result<StatusCode, DiagnosticError> {
        let mut state = self.state.borrow_mut();
        if state.panic_set_value {
            drop(state);
            panic!("simulated driver crash in set_value");
        }
        state.calls.push((channel.to_string(), parameter.clone()));
        if let Some((matches, code)) = state.reject {
            if matches(parameter) {
                return Ok(code);
            }
        }
        match parameter {
            TraceParameter::Location(dir) => self.location = Some(dir.clone()),
            TraceParameter::Status(true) => state.active_location = self.location.clone(),
            TraceParameter::Status(false) => state.active_location = None,
            _ => {}
        }
        Ok(StatusCode::OK)
    }

    fn error_text(&self, code: StatusCode) -> Option<String> {
        Some(format!("simulated error {code}"))
    }

    fn uninitialize(&mut self) -> Result<StatusCode, DiagnosticError> {
        let behavior = {
            let mut state = self.state.borrow_mut();
            state.uninitializations += 1;
            state.active_location = None;
            state.uninitialize
        };
        match behavior {
            Uninitialize::Ok => Ok(StatusCode::OK),
            Uninitialize::Status(code) => Ok(code),
            Uninitialize::Error => Err(DiagnosticError("device gone".into())),
            Uninitialize::Panic => panic!("simulated driver crash"),
        }
    }

    fn supports_segmentation(&self) -> bool {
        !self.state.borrow().no_segmentation
    }
}

/// Render a trace segment: the logger preamble followed by one line per frame,
/// numbered from 1.
pub fn trace_segment(frames: &[ReceivedFrame]) -> String {
    let mut out = String::new();
    let preamble = [
        ";$FILEVERSION=1.1",
        ";$STARTTIME=0",
        ";",
        ";   Simulated trace segment",
        ";",
        ";   Message Number",
        ";   |         Time Offset (ms)",
        ";   |         |        Type",
        ";   |         |        |        ID (hex)",
        ";   |         |        |        |     Data Length",
        ";   |         |        |        |     |   Data Bytes (hex) ...",
        ";   |         |        |        |     |   |",
    ];
    for line in preamble {
        out.push_str(line);
        out.push('\n');
    }
    for _ in preamble.len()..TRACE_HEADER_LINES - 1 {
        out.push_str(";\n");
    }
    out.push_str(";---+--   ----+----  --+--  ----+---  +  -+ -- -- -- -- -- -- --\n");

    for (idx, rx) in frames.iter().enumerate() {
        let data: Vec<String> = rx.frame.data().iter().map(|b| format!("{b:02X}")).collect();
        out.push_str(&format!(
            "{:>width$}){:>14.3}  Rx     {:>8X}  {:<2} {}\n",
            idx + 1,
            rx.timestamp * 1000.0,
            rx.frame.raw_id(),
            data.len(),
            data.join(" "),
            width = MESSAGE_NUMBER_WIDTH,
        ));
    }
    out
}
