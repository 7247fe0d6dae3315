use std::path::PathBuf;
use std::time::Duration;

use can_channel::diagnostics::{StatusCode, TraceFileMode, TraceParameter};
use can_channel::driver::{BusError, BusParams};
use can_channel::sim::{SimDiagnostics, SimDriver, Uninitialize};
use can_channel::{
    BitTiming, CanChannel, CanFilter, ChannelConfig, ChannelState, Error, Frame, LogFilter,
    PhaseTiming, ReceiveResult, Result, TraceSettings, VectorSerial, VectorSettings,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("can_channel_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn pcan_config(trace_path: &str) -> ChannelConfig {
    ChannelConfig {
        remote_id: Some(0x123),
        trace: TraceSettings {
            path: trace_path.into(),
            ..TraceSettings::default()
        },
        ..ChannelConfig::default()
    }
}

fn untraced_config() -> ChannelConfig {
    ChannelConfig {
        trace: TraceSettings {
            enabled: false,
            ..TraceSettings::default()
        },
        ..pcan_config("")
    }
}

#[test]
fn invalid_trace_suffix_fails_construction() {
    let driver = SimDriver::new();
    match CanChannel::new(pcan_config("out/trace.log"), driver.clone()) {
        Err(Error::InvalidTracePath(name)) => assert_eq!(name, "trace.log"),
        other => panic!("expected InvalidTracePath, got {:?}", other.err()),
    }
    assert!(driver.opened().is_empty());
}

#[test]
fn open_send_receive_close() -> Result<()> {
    init_logger();
    let driver = SimDriver::new();
    let mut channel = CanChannel::new(untraced_config(), driver.clone())?;
    assert_eq!(channel.state(), ChannelState::Closed);

    channel.open()?;
    assert_eq!(channel.state(), ChannelState::Open);
    assert!(matches!(channel.open(), Err(Error::AlreadyOpen)));
    assert_eq!(driver.opened().len(), 1);

    channel.send(&[1, 2, 3], None)?;
    channel.send(&[4; 20], Some(0x456))?;
    let sent = driver.sent();
    assert_eq!(sent[0].raw_id(), 0x123);
    assert!(sent[0].is_fd());
    assert_eq!(sent[0].data(), &[1, 2, 3]);
    assert_eq!(sent[1].raw_id(), 0x456);
    assert_eq!(sent[1].data().len(), 24);

    let frame = Frame::from_payload(0x321, &[0xCA, 0xFE], false, true, false)?;
    driver.push_frame(frame, 12.5);
    match channel.receive(Some(Duration::from_millis(5))) {
        ReceiveResult::Frame(rx) => {
            assert_eq!(rx.frame.raw_id(), 0x321);
            assert_eq!(rx.frame.data(), &[0xCA, 0xFE]);
            assert_eq!(rx.timestamp, 12.5);
        }
        other => panic!("expected a frame, got {other:?}"),
    }
    assert_eq!(channel.receive(None), ReceiveResult::Nothing);
    assert_eq!(
        driver.timeouts(),
        vec![Duration::from_millis(5), Duration::from_micros(1)]
    );

    channel.close();
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(driver.shutdowns(), 1);
    assert!(matches!(channel.send(&[1], None), Err(Error::NotOpen)));
    assert!(matches!(channel.receive(None), ReceiveResult::Error(_)));
    Ok(())
}

#[test]
fn send_validates_destination_and_payload() -> Result<()> {
    let driver = SimDriver::new();
    let config = ChannelConfig {
        remote_id: None,
        is_fd: false,
        ..untraced_config()
    };
    let mut channel = CanChannel::new(config, driver.clone())?;
    channel.open()?;

    assert!(matches!(channel.send(&[1], None), Err(Error::MissingDestination)));
    assert!(matches!(
        channel.send(&[0; 9], Some(0x10)),
        Err(Error::PayloadTooLong { len: 9, max: 8 })
    ));
    assert!(matches!(
        channel.send(&[1], Some(0x800)),
        Err(Error::InvalidIdentifier { id: 0x800, extended: false })
    ));
    assert!(driver.sent().is_empty());
    Ok(())
}

#[test]
fn extended_ids_and_bitrate_switch_follow_config() -> Result<()> {
    let driver = SimDriver::new();
    let config = ChannelConfig {
        is_extended_id: true,
        enable_brs: true,
        remote_id: Some(0x18DA_F110),
        ..untraced_config()
    };
    let mut channel = CanChannel::new(config, driver.clone())?;
    channel.open()?;
    channel.send(&[0x02, 0x10, 0x03], None)?;

    let sent = driver.sent();
    assert!(sent[0].is_extended());
    assert!(sent[0].bitrate_switch());
    assert_eq!(sent[0].raw_id(), 0x18DA_F110);
    Ok(())
}

#[test]
fn send_failure_reaches_the_caller() -> Result<()> {
    let driver = SimDriver::new();
    let mut channel = CanChannel::new(untraced_config(), driver.clone())?;
    channel.open()?;
    driver.fail_send(Some(BusError::Device("tx queue full".into())));

    match channel.send(&[1], None) {
        Err(Error::Bus(BusError::Device(msg))) => assert_eq!(msg, "tx queue full"),
        other => panic!("expected bus error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn receive_degrades_bus_errors_to_nothing() -> Result<()> {
    init_logger();
    let driver = SimDriver::new();
    let mut channel = CanChannel::new(
        ChannelConfig {
            bus_error_warning_filter: true,
            ..untraced_config()
        },
        driver.clone(),
    )?;
    channel.open()?;

    driver.push_error(BusError::Can("Bus error: an error counter reached the limit".into()));
    driver.push_error(BusError::Can("arbitration lost".into()));
    driver.push_error(BusError::Device("driver crashed".into()));

    for _ in 0..3 {
        assert_eq!(channel.receive(None), ReceiveResult::Nothing);
    }
    assert_eq!(channel.state(), ChannelState::Open);
    Ok(())
}

#[test]
fn custom_log_filter_is_accepted() -> Result<()> {
    let driver = SimDriver::new();
    let mut channel = CanChannel::new(untraced_config(), driver.clone())?
        .with_log_filter(LogFilter::new(|msg| !msg.contains("arbitration")));
    channel.open()?;
    driver.push_error(BusError::Can("arbitration lost".into()));
    assert!(channel.receive(None).is_nothing());
    Ok(())
}

#[test]
fn panicking_recv_reports_nothing() -> Result<()> {
    init_logger();
    let driver = SimDriver::new();
    let mut channel = CanChannel::new(untraced_config(), driver.clone())?;
    channel.open()?;

    driver.panic_on_recv(true);
    assert_eq!(channel.receive(None), ReceiveResult::Nothing);
    assert_eq!(channel.state(), ChannelState::Open);

    driver.panic_on_recv(false);
    let frame = Frame::from_payload(0x42, &[1], false, true, false)?;
    driver.push_frame(frame, 0.5);
    assert!(matches!(channel.receive(None), ReceiveResult::Frame(_)));
    channel.close();
    assert_eq!(driver.shutdowns(), 1);
    Ok(())
}

#[test]
fn reception_filters_drop_other_frames() -> Result<()> {
    let driver = SimDriver::new();
    let config = ChannelConfig {
        can_filters: vec![CanFilter::new(0x100, 0x7F0)],
        ..untraced_config()
    };
    let mut channel = CanChannel::new(config, driver.clone())?;
    channel.open()?;

    for id in [0x105, 0x200, 0x10A] {
        driver.push_frame(Frame::from_payload(id, &[0], false, true, false)?, 0.0);
    }
    assert_eq!(channel.receive(None).message().map(|(_, id)| id), Some(0x105));
    assert_eq!(channel.receive(None).message().map(|(_, id)| id), Some(0x10A));
    assert_eq!(channel.receive(None), ReceiveResult::Nothing);
    Ok(())
}

#[test]
fn invalid_bit_timing_fails_open() -> Result<()> {
    let driver = SimDriver::new();
    let config = ChannelConfig {
        timing: BitTiming {
            nominal: PhaseTiming::new(0, 63, 16, 16),
            ..BitTiming::default()
        },
        ..untraced_config()
    };
    let mut channel = CanChannel::new(config, driver.clone())?;

    assert!(matches!(channel.open(), Err(Error::Bus(BusError::Device(_)))));
    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(driver.opened().is_empty());
    Ok(())
}

#[test]
fn failed_open_leaves_channel_closed() -> Result<()> {
    let driver = SimDriver::new();
    let diagnostics = SimDiagnostics::new();
    let mut channel = CanChannel::new(pcan_config(""), driver.clone())?
        .with_diagnostics(diagnostics.clone());
    driver.fail_open(Some(BusError::Device("no such channel".into())));

    assert!(matches!(channel.open(), Err(Error::Bus(_))));
    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(!channel.is_open());
    assert_eq!(diagnostics.initializations(), 0);

    driver.fail_open(None);
    channel.open()?;
    assert!(channel.is_open());
    channel.close();
    Ok(())
}

#[test]
fn trace_bring_up_sequence() -> Result<()> {
    init_logger();
    let dir = scratch_dir("bring_up");
    let path = dir.join("run.trc");
    let config = ChannelConfig {
        trace: TraceSettings {
            path: path.to_string_lossy().into_owned(),
            size_mb: 25,
            enabled: true,
        },
        ..pcan_config("")
    };
    let diagnostics = SimDiagnostics::new();
    let mut channel =
        CanChannel::new(config, SimDriver::new())?.with_diagnostics(diagnostics.clone());
    channel.open()?;

    assert!(dir.is_dir());
    let params: Vec<TraceParameter> = diagnostics.calls().into_iter().map(|(_, p)| p).collect();
    let expected_mode = TraceFileMode::DateTime;
    if cfg!(target_os = "macos") {
        assert_eq!(
            params,
            vec![
                TraceParameter::Location(dir.clone()),
                TraceParameter::Configure(expected_mode),
                TraceParameter::Status(true),
            ]
        );
    } else {
        assert_eq!(
            params,
            vec![
                TraceParameter::Location(dir.clone()),
                TraceParameter::Segmented(true),
                TraceParameter::SizeMb(25),
                TraceParameter::Configure(expected_mode),
                TraceParameter::Status(true),
            ]
        );
    }
    assert!(diagnostics.calls().iter().all(|(ch, _)| ch == "PCAN_USBBUS1"));
    assert_eq!(channel.trace_count(), 1);
    assert_eq!(diagnostics.active_location(), Some(dir.clone()));

    channel.close();
    assert_eq!(diagnostics.uninitializations(), 1);
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn unspecified_trace_path_overwrites() -> Result<()> {
    let diagnostics = SimDiagnostics::new();
    let mut channel =
        CanChannel::new(pcan_config(""), SimDriver::new())?.with_diagnostics(diagnostics.clone());
    channel.open()?;

    let cwd = std::env::current_dir()?;
    let calls = diagnostics.calls();
    assert_eq!(calls[0].1, TraceParameter::Location(cwd));
    assert!(
        calls
            .iter()
            .any(|(_, p)| *p == TraceParameter::Configure(TraceFileMode::Overwrite))
    );
    // Default segment size is not written explicitly.
    assert!(!calls.iter().any(|(_, p)| matches!(p, TraceParameter::SizeMb(_))));
    channel.close();
    Ok(())
}

#[test]
fn rejected_trace_parameter_keeps_bus_usable() -> Result<()> {
    let dir = scratch_dir("rejected");
    let driver = SimDriver::new();
    let diagnostics = SimDiagnostics::new();
    diagnostics.reject(
        |p| matches!(p, TraceParameter::Configure(_)),
        StatusCode(0x40),
    );
    let mut channel = CanChannel::new(pcan_config(&dir.to_string_lossy()), driver.clone())?
        .with_diagnostics(diagnostics.clone());

    channel.open()?;
    assert_eq!(channel.trace_count(), 0);
    assert!(
        !diagnostics
            .calls()
            .iter()
            .any(|(_, p)| matches!(p, TraceParameter::Status(_)))
    );
    channel.send(&[0xAA], None)?;
    assert_eq!(driver.sent().len(), 1);

    channel.close();
    // The handle existed, so it is released even though tracing never started.
    assert_eq!(diagnostics.uninitializations(), 1);
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn missing_segmentation_support_still_traces() -> Result<()> {
    let dir = scratch_dir("no_segments");
    let diagnostics = SimDiagnostics::new();
    diagnostics.disable_segmentation();
    let mut channel = CanChannel::new(pcan_config(&dir.to_string_lossy()), SimDriver::new())?
        .with_diagnostics(diagnostics.clone());

    channel.open()?;
    assert_eq!(channel.trace_count(), 1);
    assert!(
        !diagnostics
            .calls()
            .iter()
            .any(|(_, p)| matches!(p, TraceParameter::Segmented(_)))
    );
    channel.close();
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn diagnostic_initialization_failure_is_swallowed() -> Result<()> {
    let diagnostics = SimDiagnostics::new();
    diagnostics.fail_initialize(true);
    let mut channel =
        CanChannel::new(pcan_config(""), SimDriver::new())?.with_diagnostics(diagnostics.clone());

    channel.open()?;
    assert!(channel.is_open());
    assert_eq!(channel.trace_count(), 0);
    channel.close();
    assert_eq!(channel.finalize(), None);
    Ok(())
}

#[test]
fn panicking_trace_setup_keeps_bus_usable() -> Result<()> {
    init_logger();
    let driver = SimDriver::new();
    let diagnostics = SimDiagnostics::new();
    diagnostics.panic_on_set_value(true);
    let mut channel = CanChannel::new(pcan_config(""), driver.clone())?
        .with_diagnostics(diagnostics.clone());

    channel.open()?;
    assert_eq!(channel.state(), ChannelState::Open);
    assert!(channel.is_open());
    assert_eq!(channel.trace_count(), 0);
    channel.send(&[0x55], None)?;
    assert_eq!(driver.sent().len(), 1);

    channel.close();
    // The handle survived the panic and is released on close.
    assert_eq!(diagnostics.uninitializations(), 1);

    diagnostics.panic_on_set_value(false);
    channel.open()?;
    assert_eq!(channel.trace_count(), 1);
    channel.close();
    Ok(())
}

#[test]
fn panicking_diagnostic_initialization_is_swallowed() -> Result<()> {
    let diagnostics = SimDiagnostics::new();
    diagnostics.panic_on_initialize(true);
    let mut channel =
        CanChannel::new(pcan_config(""), SimDriver::new())?.with_diagnostics(diagnostics.clone());

    channel.open()?;
    assert_eq!(channel.state(), ChannelState::Open);
    assert_eq!(channel.trace_count(), 0);
    assert_eq!(diagnostics.initializations(), 0);

    channel.close();
    assert_eq!(diagnostics.uninitializations(), 0);
    assert!(matches!(channel.open(), Ok(())));
    channel.close();
    Ok(())
}

#[test]
fn diagnostic_interface_is_created_once_per_open_cycle() -> Result<()> {
    let dir = scratch_dir("once_per_cycle");
    let diagnostics = SimDiagnostics::new();
    let mut channel = CanChannel::new(pcan_config(&dir.to_string_lossy()), SimDriver::new())?
        .with_diagnostics(diagnostics.clone());

    for cycle in 1..=3 {
        channel.open()?;
        assert_eq!(diagnostics.initializations(), cycle);
        channel.close();
        assert_eq!(diagnostics.uninitializations(), cycle);
    }
    assert_eq!(channel.trace_count(), 3);
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn close_twice_with_failing_teardown() -> Result<()> {
    init_logger();
    for behavior in [
        Uninitialize::Status(StatusCode(0x8)),
        Uninitialize::Error,
        Uninitialize::Panic,
    ] {
        let driver = SimDriver::new();
        let diagnostics = SimDiagnostics::new();
        diagnostics.set_uninitialize(behavior);
        let mut channel = CanChannel::new(pcan_config(""), driver.clone())?
            .with_diagnostics(diagnostics.clone());
        channel.open()?;

        channel.close();
        channel.close();

        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(driver.shutdowns(), 1);
        assert_eq!(diagnostics.uninitializations(), 1);

        // A fresh handle is created on the next open.
        channel.open()?;
        assert_eq!(diagnostics.initializations(), 2);
        channel.close();
    }
    Ok(())
}

#[test]
fn vector_backend_detects_serial_and_skips_tracing() -> Result<()> {
    let driver = SimDriver::new();
    driver.set_serials(vec![0, 7002, 7001]);
    let diagnostics = SimDiagnostics::new();
    let config = ChannelConfig {
        backend: can_channel::Backend::Vector(VectorSettings {
            serial: VectorSerial::Auto,
            ..VectorSettings::default()
        }),
        trace: TraceSettings::default(),
        remote_id: Some(0x10),
        ..ChannelConfig::default()
    };
    let mut channel =
        CanChannel::new(config, driver.clone())?.with_diagnostics(diagnostics.clone());
    assert!(channel.trace_target().is_none());

    channel.open()?;
    match &driver.opened()[0] {
        BusParams::Vector(params) => {
            assert_eq!(params.serial, Some(7001));
            assert_eq!(params.channel, 3);
            assert_eq!(params.rx_queue_size, 524_288);
        }
        other => panic!("expected vector params, got {other:?}"),
    }
    assert_eq!(diagnostics.initializations(), 0);
    channel.close();
    assert_eq!(channel.finalize(), None);
    Ok(())
}

#[test]
fn vector_auto_serial_without_devices() -> Result<()> {
    let config = ChannelConfig {
        backend: can_channel::Backend::Vector(VectorSettings {
            serial: VectorSerial::Auto,
            ..VectorSettings::default()
        }),
        ..ChannelConfig::vector()
    };
    let mut channel = CanChannel::new(config, SimDriver::new())?;
    assert!(matches!(channel.open(), Err(Error::NoDeviceAvailable)));
    assert_eq!(channel.state(), ChannelState::Closed);
    Ok(())
}

#[test]
fn dropping_an_open_channel_shuts_the_bus_down() -> Result<()> {
    let driver = SimDriver::new();
    {
        let mut channel = CanChannel::new(untraced_config(), driver.clone())?;
        channel.open()?;
    }
    assert_eq!(driver.shutdowns(), 1);
    Ok(())
}
