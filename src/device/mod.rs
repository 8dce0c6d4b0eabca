//! Trigger devices.
//!
//! Every transport implements [`TriggerDevice`]: a non-blocking `poll` that
//! reports the clock time of a detected trigger. The blocking wait, counting
//! and logging live in [`crate::trigger::ScannerTrigger`] and are shared by
//! all devices.

pub mod cedrus;
pub mod dummy;
pub mod keyboard;
pub mod launchscan;
pub mod parallel;
pub mod registry;
pub mod serial;

use crate::clock::Clock;
use crate::error::Result;
use crate::input::Keyboard;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use cedrus::CedrusTrigger;
pub use dummy::DummyTrigger;
pub use keyboard::KeyboardTrigger;
pub use launchscan::LaunchScanTrigger;
pub use parallel::ParallelPortTrigger;
pub use registry::{DeviceFactory, DeviceRegistry};
pub use serial::SerialPortTrigger;

/// What a device may touch while polling.
pub struct PollContext<'a> {
    /// Experiment clock used for time stamps
    pub clock: &'a Clock,
    /// Shared key buffer
    pub keyboard: &'a mut Keyboard,
    /// Key reserved for aborting a wait
    pub esc_key: &'a str,
}

/// A transport delivering scanner triggers.
pub trait TriggerDevice: Send {
    /// Lower-case name the device is registered under.
    fn port_type(&self) -> &str;

    /// Human-readable settings, used in logs.
    fn describe(&self) -> String;

    /// Acquire the underlying port.
    fn open(&mut self) -> Result<()>;

    /// Release the underlying port.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called at the start of every blocking wait.
    fn prepare_wait(&mut self, _ctx: &mut PollContext<'_>) -> Result<()> {
        Ok(())
    }

    /// One non-blocking tick. Returns the trigger time in clock seconds when
    /// a trigger was detected.
    fn poll(&mut self, ctx: &mut PollContext<'_>) -> Result<Option<f64>>;
}

/// Which signal transitions count as a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Edge {
    #[default]
    Rising,
    Falling,
    Both,
}

impl Edge {
    /// Numeric form: 1 rising, -1 falling, 0 both.
    pub fn as_i8(self) -> i8 {
        match self {
            Edge::Rising => 1,
            Edge::Falling => -1,
            Edge::Both => 0,
        }
    }

    /// Whether a transition to `new_state` counts.
    pub fn accepts(self, new_state: bool) -> bool {
        match self {
            Edge::Rising => new_state,
            Edge::Falling => !new_state,
            Edge::Both => true,
        }
    }
}

impl TryFrom<i64> for Edge {
    type Error = String;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        match value {
            v if v > 0 => Ok(Edge::Rising),
            v if v < 0 => Ok(Edge::Falling),
            _ => Ok(Edge::Both),
        }
    }
}

impl std::str::FromStr for Edge {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rising" | "1" => Ok(Edge::Rising),
            "falling" | "-1" => Ok(Edge::Falling),
            "both" | "0" => Ok(Edge::Both),
            other => Err(format!("unknown edge '{other}'")),
        }
    }
}

impl Serialize for Edge {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.as_i8())
    }
}

impl<'de> Deserialize<'de> for Edge {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Edge::try_from(n).map_err(serde::de::Error::custom),
            Raw::Name(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
