//! Demonstration of waiting for a scanner and time-stamping volumes.
//!
//! This example shows how to:
//! 1. Build a trigger from a configuration
//! 2. Wait for the scanner, skipping dummy scans
//! 3. Record the following volumes relative to the first trigger
//! 4. Print the session summary
//!
//! Run with: cargo run --example wait_demo
//!
//! The default uses the `launchscan` emulator, so no scanner is needed.
//! Pass a port type and a JSON port config to try real hardware, e.g.
//! `cargo run --example wait_demo -- serial '{"port": "/dev/ttyUSB0"}'`.

use scanner_trigger::{Clock, ScannerTrigger, TriggerConfig, TriggerError};
use serde_json::json;

const DUMMY_SCANS: u32 = 2;
const VOLUMES: u64 = 6;

fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let mut args = std::env::args().skip(1);
    let port_type = args.next().unwrap_or_else(|| "launchscan".to_string());
    let port_config = match args.next() {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                eprintln!("Invalid port config: {e}");
                std::process::exit(2);
            }
        },
        None => json!({"settings": {"TR": 0.5, "volumes": 12, "sync": "5"}, "mode": "test"}),
    };

    let mut config = TriggerConfig::new(port_type)
        .with_port_config(port_config)
        .with_timeout(30.0);
    config.reset_clock = true;

    let clock = Clock::new();
    let mut trigger = match ScannerTrigger::create(&config, clock.clone()) {
        Ok(trigger) => trigger,
        Err(e) => {
            eprintln!("Could not create trigger: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = trigger.open() {
        eprintln!("Could not open {trigger}: {e}");
        std::process::exit(1);
    }

    println!("Waiting for {trigger}, skipping {DUMMY_SCANS} dummy scans...");
    match trigger.wait_for_trigger(DUMMY_SCANS) {
        Ok(t) => println!("Start at volume {} ({:.3}s after first trigger)", t.index, t.time),
        Err(TriggerError::Timeout(secs)) => {
            eprintln!("No trigger within {secs}s");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Wait failed: {e}");
            std::process::exit(1);
        }
    }

    while trigger.trigger_count() < VOLUMES {
        match trigger.get_trigger_block() {
            Ok(t) => println!("  volume {:>3} at {:>8.3}s", t.index, t.time),
            Err(e) => {
                eprintln!("Stopped: {e}");
                break;
            }
        }
    }

    let _ = trigger.close();
    println!();
    println!("{}", trigger.session().summary());
}
