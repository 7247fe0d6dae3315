//! Hardware trace files.
//!
//! The PCAN-style diagnostic logger writes `.trc` text files: a fixed preamble
//! of [`TRACE_HEADER_LINES`] lines followed by one line per logged frame. Each
//! body line starts with a right-aligned message number of
//! [`MESSAGE_NUMBER_WIDTH`] columns:
//!
//! ```text
//! ;$FILEVERSION=1.1
//! ;   ...33 lines of preamble...
//!       1)         0.100  Rx         0100  8  01 02 03 04 05 06 07 08
//!       2)         0.200  Tx         0200  2  0A 0B
//! ```
//!
//! When segmentation is active the logger rolls over into a new file once the
//! configured size is reached, and every open/close cycle starts a new file.
//! [`merge`] consolidates those segments back into one trace.

pub mod merge;

use std::path::{Path, PathBuf};

use log::warn;

use crate::config::TraceSettings;
use crate::{Error, Result};

pub use merge::{MergeOutcome, list_segments, merge_segments, renumber_trace};

/// File extension of trace files written by the hardware logger.
pub const TRACE_EXTENSION: &str = "trc";

/// Number of preamble lines at the start of every trace segment.
pub const TRACE_HEADER_LINES: usize = 33;

/// Width of the right-aligned message number at the start of each body line.
pub const MESSAGE_NUMBER_WIDTH: usize = 7;

/// Segment size the logger uses when none is configured, in MB.
pub const DEFAULT_TRACE_SIZE_MB: u32 = 10;

/// Largest segment size the logger accepts, in MB.
pub const MAX_TRACE_SIZE_MB: u32 = 100;

/// Where and how the hardware logger writes its segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceTarget {
    /// Directory that receives the segment files.
    pub directory: PathBuf,
    /// Fixed name of the merged trace, if one was configured.
    pub file_name: Option<String>,
    /// True when no trace path was configured at all; the logger then
    /// overwrites its default file instead of generating unique names.
    pub overwrite: bool,
    /// Maximum segment size in MB, always within `(0, MAX_TRACE_SIZE_MB]`.
    pub size_mb: u32,
}

impl TraceTarget {
    /// Validate trace settings and split the path into directory and name.
    ///
    /// Fails with [`Error::InvalidTracePath`] when the path has an extension
    /// other than `.trc`. Out-of-range sizes are replaced by
    /// [`DEFAULT_TRACE_SIZE_MB`].
    pub fn resolve(settings: &TraceSettings) -> Result<Self> {
        let path = Path::new(&settings.path);

        let (directory, file_name, overwrite) = if settings.path.is_empty() {
            (std::env::current_dir()?, None, true)
        } else {
            match path.extension() {
                None => (path.to_path_buf(), None, false),
                Some(ext) if ext == TRACE_EXTENSION => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned());
                    let parent = path
                        .parent()
                        .filter(|p| !p.as_os_str().is_empty())
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| PathBuf::from("."));
                    (parent, name, false)
                }
                Some(_) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| settings.path.clone());
                    return Err(Error::InvalidTracePath(name));
                }
            }
        };

        Ok(Self {
            directory,
            file_name,
            overwrite,
            size_mb: clamp_trace_size(settings.size_mb),
        })
    }

    /// Full path of the merged trace when a fixed name was configured.
    pub fn target_path(&self) -> Option<PathBuf> {
        self.file_name.as_ref().map(|n| self.directory.join(n))
    }
}

/// Keep sizes in `(0, MAX_TRACE_SIZE_MB]`, fall back to the default otherwise.
pub fn clamp_trace_size(size_mb: i64) -> u32 {
    if size_mb > 0 && size_mb <= MAX_TRACE_SIZE_MB as i64 {
        size_mb as u32
    } else {
        warn!(
            "Make sure trace size is between 1 and {} MB. Setting trace size to default value: {}.",
            MAX_TRACE_SIZE_MB, DEFAULT_TRACE_SIZE_MB
        );
        DEFAULT_TRACE_SIZE_MB
    }
}
