//! Scanner emulation.
//!
//! In `test` mode a background generator "types" the sync key into the
//! trigger's key buffer once per TR, so a paradigm can be run end to end without
//! a scanner. In `scan` mode the same keyboard path waits for the real
//! scanner's key pulses.

use crate::config::TriggerConfig;
use crate::device::keyboard::{KeyboardConfig, KeyboardTrigger};
use crate::device::{PollContext, TriggerDevice};
use crate::error::{Result, TriggerError};
use crate::input::{KeyEvent, KeySender};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use serde::Deserialize;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Left for spinning before each emulated pulse.
const SPIN_MARGIN: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Emulate sync pulses
    #[default]
    #[serde(alias = "Test")]
    Test,
    /// Wait for the scanner
    #[serde(alias = "Scan")]
    Scan,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanSettings {
    /// Repetition time in seconds
    #[serde(alias = "TR")]
    pub tr: f64,
    /// Number of volumes to emulate
    pub volumes: u32,
    /// Key sent at every volume
    #[serde(default = "default_sync_key")]
    pub sync: String,
}

fn default_sync_key() -> String {
    "5".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LaunchScanConfig {
    pub settings: Option<ScanSettings>,
    #[serde(default)]
    pub mode: ScanMode,
}

/// Keyboard trigger on the sync key, with an optional pulse generator.
pub struct LaunchScanTrigger {
    settings: ScanSettings,
    tr: Duration,
    mode: ScanMode,
    keyboard: KeyboardTrigger,
    generator: Option<SyncGenerator>,
}

impl LaunchScanTrigger {
    pub fn new(config: LaunchScanConfig) -> Result<Self> {
        let settings = config.settings.ok_or_else(|| {
            tracing::error!("no valid settings parameters defined");
            TriggerError::InvalidConfig("launchscan requires settings with tr and volumes".into())
        })?;
        let tr = Duration::try_from_secs_f64(settings.tr)
            .ok()
            .filter(|tr| !tr.is_zero())
            .ok_or_else(|| {
                TriggerError::InvalidConfig(format!(
                    "launchscan tr must be a positive number of seconds, got {}",
                    settings.tr
                ))
            })?;
        let keyboard = KeyboardTrigger::new(KeyboardConfig {
            key_list: vec![settings.sync.clone()],
        })?;
        Ok(Self {
            settings,
            tr,
            mode: config.mode,
            keyboard,
            generator: None,
        })
    }

    pub fn from_config(config: &TriggerConfig) -> Result<Box<dyn TriggerDevice>> {
        let device = Self::new(config.device_config()?)?;
        if device.settings.sync == config.esc_key {
            return Err(TriggerError::InvalidConfig(
                "launchscan sync key equals the abort key".into(),
            ));
        }
        Ok(Box::new(device))
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Whether the pulse generator is still emitting.
    pub fn is_emulating(&self) -> bool {
        self.generator.as_ref().is_some_and(|g| !g.is_finished())
    }

    fn stop_generator(&mut self) {
        if let Some(generator) = self.generator.take() {
            generator.stop();
        }
    }
}

impl TriggerDevice for LaunchScanTrigger {
    fn port_type(&self) -> &str {
        "launchscan"
    }

    fn describe(&self) -> String {
        format!(
            "mode={:?} tr={:.3}s volumes={} sync={}",
            self.mode, self.settings.tr, self.settings.volumes, self.settings.sync
        )
    }

    fn open(&mut self) -> Result<()> {
        self.keyboard.open()
    }

    fn close(&mut self) -> Result<()> {
        self.stop_generator();
        self.keyboard.close()
    }

    fn prepare_wait(&mut self, ctx: &mut PollContext<'_>) -> Result<()> {
        if self.mode == ScanMode::Test {
            self.stop_generator();
            // Presses left from an earlier run would count as new volumes.
            ctx.keyboard.get_keys(&[self.settings.sync.as_str()]);
            self.generator = Some(SyncGenerator::start(
                ctx.keyboard.sender(),
                self.settings.sync.clone(),
                self.tr,
                self.settings.volumes,
            ));
            tracing::debug!("sync pulse emulation started: {}", self.describe());
        }
        Ok(())
    }

    fn poll(&mut self, ctx: &mut PollContext<'_>) -> Result<Option<f64>> {
        self.keyboard.poll(ctx)
    }
}

impl Drop for LaunchScanTrigger {
    fn drop(&mut self) {
        self.stop_generator();
    }
}

/// Background thread pressing the sync key once per TR.
pub struct SyncGenerator {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl SyncGenerator {
    /// Start emitting `volumes` presses of `key`, the first one immediately.
    pub fn start(sender: KeySender, key: String, tr: Duration, volumes: u32) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::spawn(move || {
            let mut due = Instant::now();
            for _ in 0..volumes {
                let wait = due.saturating_duration_since(Instant::now());
                match stop_rx.recv_timeout(wait.saturating_sub(SPIN_MARGIN)) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                while Instant::now() < due {
                    std::hint::spin_loop();
                }
                if !sender.send(KeyEvent::at(key.as_str(), due)) {
                    tracing::warn!("sync pulse could not be delivered");
                }
                due = match due.checked_add(tr) {
                    Some(next) => next,
                    None => return,
                };
            }
        });

        Self { stop_tx, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop emitting and wait for the thread to exit.
    pub fn stop(self) {
        let _ = self.stop_tx.try_send(());
        let _ = self.handle.join();
    }
}
