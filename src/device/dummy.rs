//! Dummy trigger emitting a pulse every TR.

use crate::clock::sleep_until;
use crate::config::TriggerConfig;
use crate::device::{PollContext, TriggerDevice};
use crate::error::{Result, TriggerError};
use serde::Deserialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Deserialize)]
pub struct DummyConfig {
    /// Simulated repetition time in seconds
    #[serde(default = "default_tr")]
    pub tr: f64,
}

fn default_tr() -> f64 {
    1.0
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self { tr: default_tr() }
    }
}

/// Emulates a scanner pulse every `tr` seconds with sub-millisecond accuracy.
///
/// Each poll blocks until the next pulse is due, so a poll always detects.
#[derive(Debug)]
pub struct DummyTrigger {
    tr: Duration,
    next_due: Instant,
}

impl DummyTrigger {
    pub fn new(config: DummyConfig) -> Result<Self> {
        let tr = Duration::try_from_secs_f64(config.tr)
            .ok()
            .filter(|tr| !tr.is_zero())
            .ok_or_else(|| {
                TriggerError::InvalidConfig(format!(
                    "dummy tr must be a positive number of seconds, got {}",
                    config.tr
                ))
            })?;
        Ok(Self {
            tr,
            next_due: Instant::now(),
        })
    }

    pub fn from_config(config: &TriggerConfig) -> Result<Box<dyn TriggerDevice>> {
        Ok(Box::new(Self::new(config.device_config()?)?))
    }

    pub fn tr(&self) -> Duration {
        self.tr
    }
}

impl TriggerDevice for DummyTrigger {
    fn port_type(&self) -> &str {
        "dummy"
    }

    fn describe(&self) -> String {
        format!("tr={:.3}s", self.tr.as_secs_f64())
    }

    fn open(&mut self) -> Result<()> {
        self.next_due = Instant::now();
        Ok(())
    }

    fn prepare_wait(&mut self, _ctx: &mut PollContext<'_>) -> Result<()> {
        self.next_due = Instant::now();
        Ok(())
    }

    fn poll(&mut self, ctx: &mut PollContext<'_>) -> Result<Option<f64>> {
        self.next_due = self.next_due.checked_add(self.tr).ok_or_else(|| {
            TriggerError::Device(format!("next dummy pulse is out of reach (tr={:?})", self.tr))
        })?;
        sleep_until(self.next_due);
        Ok(Some(ctx.clock.time_at(self.next_due)))
    }
}
