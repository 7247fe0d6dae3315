//! Consolidation of trace segments.
//!
//! Every open/close cycle of a traced channel, and every size rollover of the
//! logger, leaves a separate `.trc` segment behind. [`merge_segments`] glues
//! the newest segments back together in modification-time order and rewrites
//! the message numbers so the result reads as one continuous trace.
//!
//! The merge is destructive: consumed segments are deleted. It is also atomic
//! with respect to the target: the merged content is staged in a temporary
//! file next to the segments and renamed into place, and segments are only
//! deleted once that rename succeeded. A failure before that point leaves
//! every segment untouched.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info, warn};

use super::{MESSAGE_NUMBER_WIDTH, TRACE_EXTENSION, TRACE_HEADER_LINES};
use crate::Result;

/// Summary of a completed merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The consolidated trace file.
    pub target: PathBuf,
    /// Number of segments that went into the target.
    pub segments_merged: usize,
    /// Number of renumbered body lines in the target.
    pub body_lines: usize,
}

/// List the trace segments in `dir`, oldest first.
///
/// Only regular files with the exact `.trc` extension are returned. Files
/// with identical modification times are ordered by name.
pub fn list_segments(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut segments: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_trace = path
            .extension()
            .map(|ext| ext == TRACE_EXTENSION)
            .unwrap_or(false);
        if !is_trace {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        segments.push((metadata.modified()?, path));
    }
    segments.sort();
    Ok(segments.into_iter().map(|(_, path)| path).collect())
}

/// Merge the `count` most recent segments in `dir` into one trace.
///
/// With `target_name` set, the result is written to `dir/target_name`;
/// otherwise the oldest selected segment becomes the result. Segments other
/// than the result are deleted afterwards.
///
/// Returns `Ok(None)` without touching the directory when `count` is zero or
/// no segment exists.
pub fn merge_segments(
    dir: &Path,
    count: usize,
    target_name: Option<&str>,
) -> Result<Option<MergeOutcome>> {
    if count == 0 {
        warn!("No trace to merge");
        return Ok(None);
    }
    let segments = list_segments(dir)?;
    let selected = &segments[segments.len().saturating_sub(count)..];
    let Some((first, rest)) = selected.split_first() else {
        warn!("No trace to merge in {}", dir.display());
        return Ok(None);
    };

    let target = match target_name {
        Some(name) => dir.join(name),
        None => first.clone(),
    };

    let mut merged = fs::read(first)?;
    for segment in rest {
        let data = fs::read(segment)?;
        if !merged.is_empty() && !merged.ends_with(b"\n") {
            merged.push(b'\n');
        }
        merged.extend_from_slice(skip_lines(&data, TRACE_HEADER_LINES));
        debug!("Appended {} to {}", segment.display(), target.display());
    }

    let (renumbered, body_lines) = renumber_body(&merged);
    replace_file(&target, &renumbered)?;

    for segment in selected {
        if *segment == target {
            continue;
        }
        if let Err(e) = fs::remove_file(segment) {
            warn!("Could not remove merged segment {}: {}", segment.display(), e);
        }
    }

    info!(
        "Merged {} trace segment(s) into {} ({} messages)",
        selected.len(),
        target.display(),
        body_lines
    );
    Ok(Some(MergeOutcome {
        target,
        segments_merged: selected.len(),
        body_lines,
    }))
}

/// Rewrite the message numbers of a single trace file in place.
///
/// Returns the number of body lines.
pub fn renumber_trace(path: &Path) -> Result<usize> {
    let data = fs::read(path)?;
    let (renumbered, body_lines) = renumber_body(&data);
    replace_file(path, &renumbered)?;
    Ok(body_lines)
}

/// Number every line after the header from 1, keeping everything but the
/// message number column intact.
///
/// Returns the rewritten bytes and the number of body lines.
pub fn renumber_body(data: &[u8]) -> (Vec<u8>, usize) {
    let mut out = Vec::with_capacity(data.len());
    let mut body_lines = 0;
    for (idx, line) in data.split_inclusive(|b| *b == b'\n').enumerate() {
        if idx < TRACE_HEADER_LINES {
            out.extend_from_slice(line);
            continue;
        }
        body_lines += 1;
        let content_len = line.len() - terminator_len(line);
        let keep_from = MESSAGE_NUMBER_WIDTH.min(content_len);
        let number = format!("{:>width$}", body_lines, width = MESSAGE_NUMBER_WIDTH);
        out.extend_from_slice(number.as_bytes());
        out.extend_from_slice(&line[keep_from..]);
    }
    (out, body_lines)
}

/// Slice of `data` after its first `n` lines.
fn skip_lines(data: &[u8], n: usize) -> &[u8] {
    let mut offset = 0;
    for _ in 0..n {
        match data[offset..].iter().position(|b| *b == b'\n') {
            Some(pos) => offset += pos + 1,
            None => return &[],
        }
    }
    &data[offset..]
}

fn terminator_len(line: &[u8]) -> usize {
    if line.ends_with(b"\r\n") {
        2
    } else if line.ends_with(b"\n") {
        1
    } else {
        0
    }
}

/// Write `data` to a temporary sibling of `path`, then rename it over `path`.
fn replace_file(path: &Path, data: &[u8]) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = path.with_file_name(format!(".{}.merging", name));

    let written = fs::write(&staging, data).and_then(|_| fs::rename(&staging, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&staging);
        return Err(e.into());
    }
    Ok(())
}
