//! Boundary to the vendor diagnostic (trace logger) interface and the trace
//! bring-up sequence run against it.
//!
//! Nothing in this module is allowed to take the bus down: every failure is
//! reported back to the channel, which logs it and carries on without a
//! trace.

use core::fmt;
use std::fs;
use std::path::PathBuf;

use log::{error, info, warn};

use crate::trace::{DEFAULT_TRACE_SIZE_MB, TraceTarget};

/// Status code returned by the diagnostic interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// The call succeeded.
    pub const OK: StatusCode = StatusCode(0);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The diagnostic call itself failed (as opposed to returning a non-OK code).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticError(pub String);

impl fmt::Display for DiagnosticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DiagnosticError {}

/// File naming policy of the hardware logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFileMode {
    /// Always write to the same default file.
    Overwrite,
    /// Generate a unique name from the current date and time.
    DateTime,
}

/// A trace parameter written through [`DiagnosticInterface::set_value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceParameter {
    /// Directory the segment files are placed in.
    Location(PathBuf),
    /// Split the trace into size-limited segments.
    Segmented(bool),
    /// Maximum segment size in MB.
    SizeMb(u32),
    /// File naming policy.
    Configure(TraceFileMode),
    /// Start or stop tracing.
    Status(bool),
}

/// Raw diagnostic interface of the hardware.
pub trait DiagnosticInterface {
    /// Write a trace parameter for `channel`.
    fn set_value(
        &mut self,
        channel: &str,
        parameter: &TraceParameter,
    ) -> Result<StatusCode, DiagnosticError>;

    /// Human readable text for a status code.
    fn error_text(&self, code: StatusCode) -> Option<String>;

    /// Release the interface.
    fn uninitialize(&mut self) -> Result<StatusCode, DiagnosticError>;

    /// Whether the logger can split traces into segments on this platform.
    fn supports_segmentation(&self) -> bool {
        !cfg!(target_os = "macos")
    }
}

/// Factory for diagnostic interfaces.
pub trait DiagnosticDriver {
    fn initialize(&mut self) -> Result<Box<dyn DiagnosticInterface>, DiagnosticError>;
}

/// Why a trace bring-up was abandoned.
#[derive(Debug)]
pub enum TraceSetupError {
    /// The interface returned a non-OK status code.
    Status(StatusCode),
    /// The interface call failed.
    Call(DiagnosticError),
    /// The trace directory could not be created.
    Io(std::io::Error),
}

impl fmt::Display for TraceSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceSetupError::Status(code) => {
                write!(f, "Error configuring logging on PCAN: {code}")
            }
            TraceSetupError::Call(e) => write!(f, "Exception in call to SetValue: {e}"),
            TraceSetupError::Io(e) => write!(f, "Can not create log folder: {e}"),
        }
    }
}

impl std::error::Error for TraceSetupError {}

/// Set one parameter, translating non-OK status codes into errors.
fn set_value(
    iface: &mut dyn DiagnosticInterface,
    channel: &str,
    parameter: TraceParameter,
) -> Result<(), TraceSetupError> {
    let code = iface
        .set_value(channel, &parameter)
        .map_err(TraceSetupError::Call)?;
    if !code.is_ok() {
        if let Some(text) = iface.error_text(code) {
            error!("{}", text);
        }
        return Err(TraceSetupError::Status(code));
    }
    Ok(())
}

/// Configure and start the hardware trace for `channel`.
///
/// Stops at the first failing step; on success the trace is running.
pub fn configure_trace(
    iface: &mut dyn DiagnosticInterface,
    channel: &str,
    target: &TraceTarget,
) -> Result<(), TraceSetupError> {
    let mode = if target.overwrite {
        warn!("No trace path specified, an existing trace will be overwritten.");
        TraceFileMode::Overwrite
    } else {
        TraceFileMode::DateTime
    };

    if !target.directory.exists() {
        fs::create_dir_all(&target.directory).map_err(TraceSetupError::Io)?;
        info!("Path {} created", target.directory.display());
    }
    set_value(
        iface,
        channel,
        TraceParameter::Location(target.directory.clone()),
    )?;
    info!(
        "Tracefile path in device configured to {}",
        target.directory.display()
    );

    if iface.supports_segmentation() {
        info!("Segmented option of trace file activated.");
        set_value(iface, channel, TraceParameter::Segmented(true))?;
        if target.size_mb != DEFAULT_TRACE_SIZE_MB {
            info!("Trace size set to {} MB.", target.size_mb);
            set_value(iface, channel, TraceParameter::SizeMb(target.size_mb))?;
        }
    } else {
        warn!("Trace file segmentation is not supported on this platform");
    }

    set_value(iface, channel, TraceParameter::Configure(mode))?;
    info!("Tracefile configured");

    set_value(iface, channel, TraceParameter::Status(true))?;
    info!("Trace activated");
    Ok(())
}

/// Release a diagnostic interface, logging every kind of failure.
///
/// Never fails and never panics, even if the driver does.
pub fn release(mut iface: Box<dyn DiagnosticInterface>) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        let result = iface.uninitialize();
        (result, iface)
    }));
    match outcome {
        Ok((Ok(code), _)) if code.is_ok() => {}
        Ok((Ok(code), iface)) => match iface.error_text(code) {
            Some(text) => error!("{}", text),
            None => error!("Uninitialize returned {}", code),
        },
        Ok((Err(e), _)) => error!("Error in call to Uninitialize: {}", e),
        Err(_) => error!("Diagnostic driver panicked in Uninitialize"),
    }
}
