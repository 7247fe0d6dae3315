//! Example: Merging trace segments
//!
//! This example demonstrates how to:
//! 1. Run a traced channel through several open/close cycles
//! 2. Let each cycle leave a `.trc` segment behind
//! 3. Merge the segments into one renumbered trace with `finalize`
//! 4. Merge an existing directory of segments directly
//!
//! Run with: cargo run --example merge_traces [DIR] [COUNT]

use std::time::Duration;

use can_channel::sim::{SimDiagnostics, SimDriver, trace_segment};
use can_channel::{CanChannel, ChannelConfig, Frame, ReceiveResult, merge_segments};

fn main() -> can_channel::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    if let Some(dir) = args.next() {
        let count = args.next().and_then(|c| c.parse().ok()).unwrap_or(usize::MAX);
        return merge_directory(&dir, count);
    }

    let dir = std::env::temp_dir().join("merge_traces_example");
    let _ = std::fs::remove_dir_all(&dir);

    println!("=== Trace Merge Example ===\n");

    let mut config = ChannelConfig::default();
    config.remote_id = Some(0x7E0);
    config.trace.path = dir.join("session.trc").to_string_lossy().into_owned();

    let driver = SimDriver::new();
    let diagnostics = SimDiagnostics::new();
    let mut channel =
        CanChannel::new(config, driver.clone())?.with_diagnostics(diagnostics.clone());

    for cycle in 1..=3u32 {
        println!("{}. Open/close cycle {}", cycle, cycle);
        channel.open()?;

        let mut frames = Vec::new();
        for i in 0..4u32 {
            channel.send(&[0x22, 0xF1, i as u8], None)?;
            let response = Frame::from_payload(0x7E8, &[0x62, 0xF1, i as u8], false, true, false)?;
            driver.push_frame(response, cycle as f64 + i as f64 * 0.01);
            if let ReceiveResult::Frame(rx) = channel.receive(Some(Duration::from_millis(10))) {
                frames.push(rx);
            }
        }

        // The simulated logger does not write files itself.
        if let Some(location) = diagnostics.active_location() {
            let segment = location.join(format!("PCAN_USBBUS1_{cycle}.trc"));
            std::fs::write(&segment, trace_segment(&frames))?;
            println!("   Wrote {} ({} messages)", segment.display(), frames.len());
        }
        channel.close();
        // Keep modification times apart so the segment order is stable.
        std::thread::sleep(Duration::from_millis(20));
    }

    println!("\nMerging {} segment(s)...", channel.trace_count());
    match channel.finalize() {
        Some(outcome) => println!(
            "   {} segment(s) -> {} ({} messages)",
            outcome.segments_merged,
            outcome.target.display(),
            outcome.body_lines
        ),
        None => println!("   Nothing merged"),
    }

    Ok(())
}

fn merge_directory(dir: &str, count: usize) -> can_channel::Result<()> {
    match merge_segments(std::path::Path::new(dir), count, None)? {
        Some(outcome) => println!(
            "Merged {} segment(s) into {} ({} messages)",
            outcome.segments_merged,
            outcome.target.display(),
            outcome.body_lines
        ),
        None => println!("No trace segments in {}", dir),
    }
    Ok(())
}
