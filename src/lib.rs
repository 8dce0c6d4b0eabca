//! Scanner Trigger - uniform detection of MRI scanner sync pulses.
//!
//! MRI scanners emit a pulse at every volume. Depending on the site it
//! reaches the stimulus computer as a serial byte, a parallel port pin, a
//! Cedrus response pad event or an emulated key press. This crate hides the
//! transport behind one [`ScannerTrigger`] so a paradigm can wait for the
//! scanner, count volumes and time-stamp them the same way everywhere.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ScannerTrigger                        │
//! │   counter · time stamps · timeout · abort key · clock reset  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌────────────────┐   ┌───────────────────┐   │
//! │  │ Registry │──▶│ TriggerDevice  │◀──│ Keyboard (buffer) │   │
//! │  └──────────┘   │ dummy serial   │   └───────────────────┘   │
//! │                 │ parallel cedrus│     ▲             ▲       │
//! │                 │ keyboard       │     │             │       │
//! │                 │ launchscan     │  terminal    sync pulse   │
//! │                 └────────────────┘  listener    generator    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use scanner_trigger::{Clock, ScannerTrigger, TriggerConfig};
//! use serde_json::json;
//!
//! let clock = Clock::new();
//! let config = TriggerConfig::new("serial")
//!     .with_port_config(json!({"port": "/dev/ttyUSB0", "baudrate": 115200, "sync": "5"}))
//!     .with_timeout(60.0);
//!
//! let mut trigger = ScannerTrigger::create(&config, clock.clone()).expect("bad config");
//! trigger.open().expect("could not open port");
//!
//! // Skip the dummy scans, continue at the sixth volume.
//! match trigger.wait_for_trigger(5) {
//!     Ok(t) => println!("volume {} at {:.3}s", t.index, t.time),
//!     Err(e) if e.is_timeout() => eprintln!("scanner did not start"),
//!     Err(e) => eprintln!("scanner error: {e}"),
//! }
//! clock.reset();
//! ```

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod input;
pub mod session;
pub mod trigger;

// Re-export key types at crate root for convenience
pub use clock::Clock;
pub use config::{ConfigError, LogLevel, TriggerConfig};
pub use device::{DeviceRegistry, Edge, PollContext, TriggerDevice};
pub use error::{Result, TriggerError};
pub use input::{KeyEvent, KeySender, Keyboard, TerminalListener};
pub use session::{IntervalStats, SessionRecord, Trigger};
pub use trigger::ScannerTrigger;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
