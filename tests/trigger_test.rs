//! Integration tests for the public trigger interface

use scanner_trigger::device::cedrus::CedrusTrigger;
use scanner_trigger::device::serial::{MemoryLine, SerialPortTrigger};
use scanner_trigger::{
    Clock, DeviceRegistry, PollContext, ScannerTrigger, SessionRecord, TriggerConfig,
    TriggerDevice, TriggerError,
};
use serde_json::json;
use std::thread;
use std::time::Duration;

fn opened(mut trigger: ScannerTrigger) -> ScannerTrigger {
    trigger.open().expect("Failed to open trigger");
    trigger
}

#[test]
fn test_serial_line_counts_sync_bytes() {
    let (line, feeder) = MemoryLine::new();
    let device = Box::new(SerialPortTrigger::with_line(Box::new(line), b'5'));
    let config = TriggerConfig::new("serial").with_timeout(1.0);
    let mut trigger = opened(ScannerTrigger::with_device(device, &config, Clock::new()));

    feeder.push(b"x5y55");
    let third = trigger.wait_for_trigger(2).unwrap();

    assert_eq!(third.index, 2);
    assert_eq!(trigger.trigger_count(), 3);
    assert_eq!(feeder.pending(), 0);
}

#[test]
fn test_serial_pulse_from_another_thread() {
    let (line, feeder) = MemoryLine::new();
    let device = Box::new(SerialPortTrigger::with_line(Box::new(line), b't'));
    let config = TriggerConfig::new("serial").with_timeout(2.0);
    let clock = Clock::new();
    let mut trigger = opened(ScannerTrigger::with_device(device, &config, clock.clone()));

    let pulse = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        feeder.push(b"t");
    });

    let t = trigger.get_trigger_block().unwrap();
    pulse.join().unwrap();
    assert_eq!(t.index, 0);
    assert!(t.time >= 0.05);
    assert!(t.time <= clock.time());
}

#[test]
fn test_reset_clock_keeps_estimated_tr() {
    let (line, feeder) = MemoryLine::new();
    let device = Box::new(SerialPortTrigger::with_line(Box::new(line), b'5'));
    let mut config = TriggerConfig::new("serial").with_timeout(2.0);
    config.reset_clock = true;
    let mut trigger = opened(ScannerTrigger::with_device(device, &config, Clock::new()));

    let scanner = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        feeder.push(b"5");
        thread::sleep(Duration::from_millis(100));
        feeder.push(b"5");
    });

    let first = trigger.wait_for_trigger(0).unwrap();
    let second = trigger.get_trigger_block().unwrap();
    scanner.join().unwrap();

    assert_eq!(first.time, 0.0);
    assert!((second.time - 0.1).abs() < 0.03, "time {}", second.time);
    let stats = trigger.session().interval_stats().unwrap();
    assert!((stats.mean - 0.1).abs() < 0.03, "estimated tr {}", stats.mean);
}

#[test]
fn test_cedrus_pad_through_trigger() {
    let (line, feeder) = MemoryLine::new();
    let device = Box::new(CedrusTrigger::with_line(Box::new(line), 4).unwrap());
    let config = TriggerConfig::new("cedrus").with_timeout(1.0);
    let mut trigger = opened(ScannerTrigger::with_device(device, &config, Clock::new()));

    // key 4 pressed on port 2, then key 1 released
    feeder.push(&[b'k', (4 << 5) | 0x10 | 0x02, 0x10, 0, 0, 0]);
    feeder.push(&[b'k', 1 << 5, 0x20, 0, 0, 0]);
    let t = trigger.get_trigger_block().unwrap();
    assert_eq!(t.index, 0);
    assert!(trigger.get_trigger().unwrap().is_none());
}

#[test]
fn test_cedrus_wait_ignores_stale_presses() {
    let (line, feeder) = MemoryLine::new();
    let device = Box::new(CedrusTrigger::with_line(Box::new(line), 4).unwrap());
    let config = TriggerConfig::new("cedrus").with_timeout(0.05);
    let mut trigger = opened(ScannerTrigger::with_device(device, &config, Clock::new()));

    feeder.push(&[b'k', (4 << 5) | 0x10, 0, 0, 0, 0]);
    assert!(trigger.wait_for_trigger(0).unwrap_err().is_timeout());
}

#[test]
fn test_keyboard_from_config() {
    let config = TriggerConfig::new("Keyboard")
        .with_port_config(json!({"key_list": ["5", "t"]}))
        .with_timeout(1.0);
    let mut trigger = opened(ScannerTrigger::create(&config, Clock::new()).unwrap());

    let sender = trigger.key_sender();
    sender.press("x");
    sender.press("t");

    let t = trigger.wait_for_trigger(0).unwrap();
    assert_eq!(t.index, 0);
    assert!(trigger.keyboard().has_key(&["x"]));
}

#[test]
fn test_launchscan_emulates_volumes() {
    let mut config = TriggerConfig::new("launchscan")
        .with_port_config(json!({
            "settings": {"TR": 0.02, "volumes": 5, "sync": "5"},
            "mode": "Test"
        }))
        .with_timeout(1.0);
    config.reset_clock = true;
    let clock = Clock::new();
    let mut trigger = opened(ScannerTrigger::create(&config, clock.clone()).unwrap());

    let third = trigger.wait_for_trigger(2).unwrap();
    assert_eq!(third.index, 2);
    assert!(trigger.clock_was_reset());
    // Volumes two and three come one TR apart after the reset.
    assert!(third.time > 0.03 && third.time < 0.2, "time {}", third.time);

    trigger.close().unwrap();
}

#[test]
fn test_launchscan_rejects_abort_key_as_sync() {
    let config = TriggerConfig::new("launchscan")
        .with_port_config(json!({"settings": {"tr": 2.0, "volumes": 10, "sync": "q"}}))
        .with_esc_key("q");
    assert!(matches!(
        ScannerTrigger::create(&config, Clock::new()),
        Err(TriggerError::InvalidConfig(_))
    ));
}

#[test]
fn test_dummy_pulses_at_tr() {
    let config = TriggerConfig::new("dummy").with_port_config(json!({"tr": 0.03}));
    let mut trigger = opened(ScannerTrigger::create(&config, Clock::new()).unwrap());

    let first = trigger.wait_for_trigger(0).unwrap();
    let second = trigger.get_trigger_block().unwrap();
    let interval = second.time - first.time;
    assert!((interval - 0.03).abs() < 0.01, "interval {interval}");
}

#[test]
fn test_unknown_port_type() {
    let config = TriggerConfig::new("fibre");
    assert!(matches!(
        ScannerTrigger::create(&config, Clock::new()),
        Err(TriggerError::UnknownPortType(name)) if name == "fibre"
    ));
}

#[test]
fn test_serial_without_port_is_not_found() {
    let config = TriggerConfig::new("serial");
    assert!(matches!(
        ScannerTrigger::create(&config, Clock::new()),
        Err(TriggerError::PortNotFound(_))
    ));
}

/// Triggers on every poll, reporting a fixed time.
struct Metronome;

impl TriggerDevice for Metronome {
    fn port_type(&self) -> &str {
        "metronome"
    }

    fn describe(&self) -> String {
        "always".to_string()
    }

    fn open(&mut self) -> scanner_trigger::Result<()> {
        Ok(())
    }

    fn poll(&mut self, ctx: &mut PollContext<'_>) -> scanner_trigger::Result<Option<f64>> {
        Ok(Some(ctx.clock.time()))
    }
}

#[test]
fn test_custom_device_in_registry() {
    let mut registry = DeviceRegistry::with_builtins();
    registry.register("metronome", |_| Ok(Box::new(Metronome)));

    let config = TriggerConfig::new("METRONOME");
    let mut trigger =
        opened(ScannerTrigger::from_registry(&registry, &config, Clock::new()).unwrap());
    assert_eq!(trigger.wait_for_trigger(4).unwrap().index, 4);
}

#[test]
fn test_abort_during_wait() {
    let config = TriggerConfig::new("keyboard").with_esc_key("escape");
    let mut trigger = opened(ScannerTrigger::create(&config, Clock::new()).unwrap());
    let sender = trigger.key_sender();

    let abort = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        sender.press("escape");
    });

    let err = trigger.wait_for_trigger(0).unwrap_err();
    abort.join().unwrap();
    assert!(matches!(err, TriggerError::Aborted));
    assert_eq!(trigger.trigger_count(), 0);
}

#[test]
fn test_timeout_reports_seconds() {
    let config = TriggerConfig::new("keyboard").with_timeout(0.05);
    let mut trigger = opened(ScannerTrigger::create(&config, Clock::new()).unwrap());

    match trigger.wait_for_trigger(0) {
        Err(TriggerError::Timeout(secs)) => assert!((secs - 0.05).abs() < 1e-9),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[test]
fn test_session_export() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let config = TriggerConfig::new("dummy").with_port_config(json!({"tr": 0.01}));
    let mut trigger = opened(ScannerTrigger::create(&config, Clock::new()).unwrap());
    trigger.wait_for_trigger(3).unwrap();
    trigger.session().save(&path).unwrap();

    let record = SessionRecord::load(&path).unwrap();
    assert_eq!(record.port_type, "dummy");
    assert_eq!(record.triggers.len(), 4);
    assert_eq!(record.first_trigger_time, Some(record.triggers[0].time));
    let stats = record.interval_stats().unwrap();
    assert_eq!(stats.count, 3);
    assert!((stats.mean - 0.01).abs() < 0.005, "mean {}", stats.mean);
}

#[test]
fn test_config_file_drives_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{"port_type": "dummy", "port_config": {"tr": 0.01}, "timeout_secs": 1.0}"#,
    )
    .unwrap();

    let config = TriggerConfig::load_from(&path).unwrap();
    let trigger = ScannerTrigger::create(&config, Clock::new()).unwrap();
    assert_eq!(trigger.port_type(), "dummy");
    assert_eq!(trigger.esc_key(), "escape");
}
