//! Uniform trigger interface over every device.
//!
//! [`ScannerTrigger`] owns one [`TriggerDevice`] and adds what all devices
//! share: the trigger counter and time stamps, logging, the blocking waits
//! with timeout and abort key, and the optional clock reset at the first
//! trigger.

use crate::clock::Clock;
use crate::config::{LogLevel, TriggerConfig};
use crate::device::{DeviceRegistry, PollContext, TriggerDevice};
use crate::error::{Result, TriggerError};
use crate::input::{KeySender, Keyboard};
use crate::session::{SessionRecord, Trigger};
use std::time::{Duration, Instant};

/// Log a trigger data line at a level chosen at runtime.
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            LogLevel::Trace => tracing::trace!(target: "scanner_trigger::data", $($arg)+),
            LogLevel::Debug => tracing::debug!(target: "scanner_trigger::data", $($arg)+),
            LogLevel::Info => tracing::info!(target: "scanner_trigger::data", $($arg)+),
            LogLevel::Warn => tracing::warn!(target: "scanner_trigger::data", $($arg)+),
            LogLevel::Error => tracing::error!(target: "scanner_trigger::data", $($arg)+),
        }
    };
}

/// A scanner trigger on one device.
pub struct ScannerTrigger {
    device: Box<dyn TriggerDevice>,
    clock: Clock,
    keyboard: Keyboard,
    esc_key: String,
    timeout: Duration,
    poll_interval: Duration,
    log_level: LogLevel,
    reset_clock: bool,
    clock_was_reset: bool,
    is_open: bool,
    trigger_count: u64,
    last_trigger_time: f64,
    first_trigger_time: f64,
    session: SessionRecord,
}

impl ScannerTrigger {
    /// Build the device named in `config` from the built-in registry.
    pub fn create(config: &TriggerConfig, clock: Clock) -> Result<Self> {
        Self::from_registry(&DeviceRegistry::with_builtins(), config, clock)
    }

    /// Build the device named in `config` from `registry`.
    pub fn from_registry(
        registry: &DeviceRegistry,
        config: &TriggerConfig,
        clock: Clock,
    ) -> Result<Self> {
        config.validate()?;
        let device = registry.create(config)?;
        Ok(Self::with_device(device, config, clock))
    }

    /// Wrap an already constructed device. `config.port_type` is ignored.
    pub fn with_device(
        device: Box<dyn TriggerDevice>,
        config: &TriggerConfig,
        clock: Clock,
    ) -> Self {
        let last_trigger_time = clock.time();
        let session = SessionRecord::new(device.port_type());
        Self {
            device,
            clock,
            keyboard: Keyboard::new(),
            esc_key: config.esc_key.clone(),
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
            log_level: config.log_level,
            reset_clock: config.reset_clock,
            clock_was_reset: false,
            is_open: false,
            trigger_count: 0,
            last_trigger_time,
            first_trigger_time: 0.0,
            session,
        }
    }

    /// Initialize the device.
    pub fn open(&mut self) -> Result<()> {
        self.device.open()?;
        self.is_open = true;
        log_at!(self.log_level, "Initialized trigger {}", self.port_type());
        Ok(())
    }

    /// Close the device.
    pub fn close(&mut self) -> Result<()> {
        self.device.close()?;
        self.is_open = false;
        log_at!(self.log_level, "Closed trigger {}", self.port_type());
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(TriggerError::PortNotOpen(format!(
                "trigger {} used before open",
                self.port_type()
            )))
        }
    }

    fn context(&mut self) -> (&mut Box<dyn TriggerDevice>, PollContext<'_>) {
        (
            &mut self.device,
            PollContext {
                clock: &self.clock,
                keyboard: &mut self.keyboard,
                esc_key: &self.esc_key,
            },
        )
    }

    fn abort_requested(&mut self) -> bool {
        let esc = [self.esc_key.as_str()];
        !self.keyboard.get_keys(&esc).is_empty()
    }

    fn pause(&self) {
        if self.poll_interval.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Check once, without blocking, whether a trigger arrived.
    ///
    /// On detection the counter is incremented, the time recorded and a
    /// `TRIGGER <index> <time>` line logged.
    pub fn get_trigger(&mut self) -> Result<Option<Trigger>> {
        self.ensure_open()?;
        let (device, mut ctx) = self.context();
        let Some(time) = device.poll(&mut ctx)? else {
            return Ok(None);
        };

        let trigger = Trigger {
            index: self.trigger_count,
            time,
        };
        self.trigger_count += 1;
        self.last_trigger_time = time;
        self.session.record_trigger(trigger);
        log_at!(self.log_level, "TRIGGER\t{}\t{:.6}", trigger.index, trigger.time);
        Ok(Some(trigger))
    }

    /// Block until a trigger arrives.
    ///
    /// Fails with [`TriggerError::Aborted`] when the abort key is pressed and
    /// with [`TriggerError::Timeout`] when nothing arrives in time.
    pub fn get_trigger_block(&mut self) -> Result<Trigger> {
        self.ensure_open()?;
        let started = Instant::now();
        loop {
            if self.abort_requested() {
                return Err(self.aborted());
            }
            if let Some(trigger) = self.get_trigger()? {
                return Ok(trigger);
            }
            if started.elapsed() > self.timeout {
                return Err(self.timed_out());
            }
            self.pause();
        }
    }

    /// Wait for the scanner to start, skipping the first `skip` triggers.
    ///
    /// The first detected trigger sets [`first_trigger_time`](Self::first_trigger_time)
    /// and, when configured, resets the clock (once per trigger object, so
    /// later times are relative to that trigger). The timeout only applies
    /// until the first trigger; the abort key applies throughout.
    pub fn wait_for_trigger(&mut self, skip: u32) -> Result<Trigger> {
        self.ensure_open()?;
        log_at!(self.log_level, "Wait for trigger ...");

        let (device, mut ctx) = self.context();
        device.prepare_wait(&mut ctx)?;

        let started = Instant::now();
        let mut remaining = skip;
        let mut triggered = false;
        loop {
            if self.abort_requested() {
                return Err(self.aborted());
            }
            if let Some(mut trigger) = self.get_trigger()? {
                if !triggered {
                    triggered = true;
                    self.first_trigger_time = trigger.time;
                    self.session.first_trigger_time = Some(trigger.time);
                    if self.reset_clock_once(trigger.time) {
                        trigger.time = 0.0;
                    }
                }
                if remaining == 0 {
                    return Ok(trigger);
                }
                remaining -= 1;
            }
            if !triggered && started.elapsed() > self.timeout {
                return Err(self.timed_out());
            }
            self.pause();
        }
    }

    /// Reset the clock at the moment of the trigger detected at `time`, and
    /// move recorded times onto the new origin. Returns whether it reset.
    fn reset_clock_once(&mut self, time: f64) -> bool {
        if !self.reset_clock || self.clock_was_reset {
            return false;
        }
        self.clock.reset_at(time);
        self.session.rebase(time);
        self.last_trigger_time -= time;
        self.clock_was_reset = true;
        log_at!(self.log_level, "Clock reset at first trigger");
        true
    }

    fn aborted(&mut self) -> TriggerError {
        self.session.record_abort();
        tracing::warn!("wait for trigger aborted by the user");
        TriggerError::Aborted
    }

    fn timed_out(&mut self) -> TriggerError {
        self.session.record_timeout();
        let secs = self.timeout.as_secs_f64();
        tracing::error!("waiting for trigger timed out after {secs:.3}s");
        TriggerError::Timeout(secs)
    }

    /// Number of triggers detected so far.
    pub fn trigger_count(&self) -> u64 {
        self.trigger_count
    }

    /// Overwrite the trigger counter. Later indices continue from `count`,
    /// which makes logged indices inconsistent with earlier ones.
    pub fn set_trigger_count(&mut self, count: u64) {
        self.trigger_count = count;
    }

    /// Index of the last trigger, if any.
    pub fn last_index(&self) -> Option<u64> {
        self.trigger_count.checked_sub(1)
    }

    /// Time of the last trigger; the construction time before any trigger.
    pub fn trigger_time(&self) -> f64 {
        self.last_trigger_time
    }

    /// Time of the first trigger of the last `wait_for_trigger`, 0 before.
    /// Read before the clock reset that trigger may cause.
    pub fn first_trigger_time(&self) -> f64 {
        self.first_trigger_time
    }

    /// Whether the clock has been reset by this trigger.
    pub fn clock_was_reset(&self) -> bool {
        self.clock_was_reset
    }

    pub fn port_type(&self) -> &str {
        self.device.port_type()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// The key buffer polled for trigger keys and the abort key.
    pub fn keyboard(&mut self) -> &mut Keyboard {
        &mut self.keyboard
    }

    /// A producer handle for the key buffer (terminal listener, tests).
    pub fn key_sender(&self) -> KeySender {
        self.keyboard.sender()
    }

    pub fn esc_key(&self) -> &str {
        &self.esc_key
    }

    pub fn session(&self) -> &SessionRecord {
        &self.session
    }

    /// The wrapped device.
    pub fn device(&self) -> &dyn TriggerDevice {
        self.device.as_ref()
    }
}

impl std::fmt::Debug for ScannerTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerTrigger")
            .field("port_type", &self.port_type())
            .field("device", &self.device.describe())
            .field("trigger_count", &self.trigger_count)
            .field("is_open", &self.is_open)
            .field("log_level", &self.log_level.as_str())
            .finish()
    }
}

impl std::fmt::Display for ScannerTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.port_type(), self.device.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::dummy::{DummyConfig, DummyTrigger};
    use crate::device::keyboard::{KeyboardConfig, KeyboardTrigger};
    use std::collections::VecDeque;

    /// Detects on the ticks listed in a script.
    struct ScriptedDevice {
        script: VecDeque<bool>,
    }

    impl ScriptedDevice {
        fn boxed(script: &[bool]) -> Box<dyn TriggerDevice> {
            Box::new(Self {
                script: script.iter().copied().collect(),
            })
        }
    }

    impl TriggerDevice for ScriptedDevice {
        fn port_type(&self) -> &str {
            "scripted"
        }

        fn describe(&self) -> String {
            format!("{} ticks left", self.script.len())
        }

        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn poll(&mut self, ctx: &mut PollContext<'_>) -> Result<Option<f64>> {
            let hit = self.script.pop_front().unwrap_or(false);
            Ok(hit.then(|| ctx.clock.time()))
        }
    }

    /// Detects once each scheduled instant has passed, stamped at that instant.
    struct ScheduledDevice {
        due: VecDeque<Instant>,
    }

    impl TriggerDevice for ScheduledDevice {
        fn port_type(&self) -> &str {
            "scheduled"
        }

        fn describe(&self) -> String {
            format!("{} pulses left", self.due.len())
        }

        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn poll(&mut self, ctx: &mut PollContext<'_>) -> Result<Option<f64>> {
            match self.due.front() {
                Some(&at) if at <= Instant::now() => {
                    self.due.pop_front();
                    Ok(Some(ctx.clock.time_at(at)))
                }
                _ => Ok(None),
            }
        }
    }

    fn open_trigger(device: Box<dyn TriggerDevice>, config: &TriggerConfig) -> ScannerTrigger {
        let mut trigger = ScannerTrigger::with_device(device, config, Clock::new());
        trigger.open().unwrap();
        trigger
    }

    #[test]
    fn test_use_before_open_fails() {
        let config = TriggerConfig::new("scripted");
        let mut trigger =
            ScannerTrigger::with_device(ScriptedDevice::boxed(&[true]), &config, Clock::new());
        assert!(matches!(
            trigger.get_trigger(),
            Err(TriggerError::PortNotOpen(_))
        ));
    }

    #[test]
    fn test_get_trigger_counts_and_records() {
        let config = TriggerConfig::new("scripted");
        let mut trigger = open_trigger(ScriptedDevice::boxed(&[false, true, true]), &config);

        assert_eq!(trigger.last_index(), None);
        assert!(trigger.get_trigger().unwrap().is_none());
        let first = trigger.get_trigger().unwrap().unwrap();
        let second = trigger.get_trigger().unwrap().unwrap();

        assert_eq!(first.index, 0);
        assert_eq!(second.index, 1);
        assert_eq!(trigger.trigger_count(), 2);
        assert_eq!(trigger.last_index(), Some(1));
        assert_eq!(trigger.trigger_time(), second.time);
        assert_eq!(trigger.session().triggers.len(), 2);
    }

    #[test]
    fn test_wait_skips_triggers() {
        let config = TriggerConfig::new("scripted");
        let mut trigger =
            open_trigger(ScriptedDevice::boxed(&[false, true, false, true, true, true]), &config);

        let result = trigger.wait_for_trigger(2).unwrap();
        assert_eq!(result.index, 2);
        assert_eq!(trigger.trigger_count(), 3);
        assert_eq!(trigger.first_trigger_time(), trigger.session().triggers[0].time);
    }

    #[test]
    fn test_wait_times_out_before_first_trigger() {
        let config = TriggerConfig::new("scripted").with_timeout(0.05);
        let mut trigger = open_trigger(ScriptedDevice::boxed(&[]), &config);

        let err = trigger.wait_for_trigger(0).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(trigger.session().timeouts, 1);
    }

    #[test]
    fn test_timeout_does_not_apply_after_first_trigger() {
        let config = TriggerConfig::new("dummy").with_timeout(0.0);
        let device = Box::new(DummyTrigger::new(DummyConfig { tr: 0.02 }).unwrap());
        let mut trigger = open_trigger(device, &config);

        let result = trigger.wait_for_trigger(3).unwrap();
        assert_eq!(result.index, 3);
    }

    #[test]
    fn test_block_times_out() {
        let config = TriggerConfig::new("scripted").with_timeout(0.02);
        let mut trigger = open_trigger(ScriptedDevice::boxed(&[]), &config);
        assert!(trigger.get_trigger_block().unwrap_err().is_timeout());
    }

    #[test]
    fn test_escape_aborts_wait() {
        let config = TriggerConfig::new("scripted");
        let mut trigger = open_trigger(ScriptedDevice::boxed(&[]), &config);
        trigger.key_sender().press("escape");

        let err = trigger.wait_for_trigger(0).unwrap_err();
        assert!(matches!(err, TriggerError::Aborted));
        assert!(!err.is_timeout());
        assert_eq!(trigger.session().aborts, 1);
    }

    #[test]
    fn test_escape_aborts_block() {
        let config = TriggerConfig::new("scripted").with_esc_key("q");
        let mut trigger = open_trigger(ScriptedDevice::boxed(&[]), &config);
        trigger.key_sender().press("q");
        assert!(matches!(
            trigger.get_trigger_block(),
            Err(TriggerError::Aborted)
        ));
    }

    #[test]
    fn test_keyboard_wait() {
        let config = TriggerConfig::new("keyboard").with_timeout(1.0);
        let device = Box::new(KeyboardTrigger::new(KeyboardConfig::default()).unwrap());
        let mut trigger = open_trigger(device, &config);
        let sender = trigger.key_sender();
        sender.press("a");
        sender.press("5");
        sender.press("5");

        let result = trigger.wait_for_trigger(1).unwrap();
        assert_eq!(result.index, 1);
    }

    #[test]
    fn test_clock_resets_only_once() {
        let mut config = TriggerConfig::new("scripted");
        config.reset_clock = true;
        let clock = Clock::new();
        let mut trigger = ScannerTrigger::with_device(
            ScriptedDevice::boxed(&[true, true]),
            &config,
            clock.clone(),
        );
        trigger.open().unwrap();

        std::thread::sleep(Duration::from_millis(30));
        trigger.wait_for_trigger(0).unwrap();
        assert!(trigger.clock_was_reset());
        assert!(clock.time() < 0.03);

        std::thread::sleep(Duration::from_millis(30));
        trigger.wait_for_trigger(0).unwrap();
        assert!(clock.time() >= 0.03);
    }

    #[test]
    fn test_clock_reset_keeps_interval_stats() {
        let mut config = TriggerConfig::new("scheduled");
        config.reset_clock = true;
        let start = Instant::now();
        let due = [50, 150, 250]
            .iter()
            .map(|&ms| start + Duration::from_millis(ms))
            .collect();
        let clock = Clock::new();
        let mut trigger = ScannerTrigger::with_device(
            Box::new(ScheduledDevice { due }),
            &config,
            clock.clone(),
        );
        trigger.open().unwrap();

        let first = trigger.wait_for_trigger(0).unwrap();
        assert_eq!(first.time, 0.0);
        assert!(trigger.first_trigger_time() > 0.04);
        trigger.get_trigger_block().unwrap();
        let third = trigger.get_trigger_block().unwrap();
        assert!((third.time - 0.2).abs() < 1e-6, "time {}", third.time);

        let session = trigger.session();
        assert_eq!(session.triggers[0].time, 0.0);
        let stats = session.interval_stats().unwrap();
        assert_eq!(stats.count, 2);
        assert!((stats.mean - 0.1).abs() < 1e-6, "mean {}", stats.mean);
        assert!((stats.min - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_clock_reset_rebases_earlier_triggers() {
        let mut config = TriggerConfig::new("scripted");
        config.reset_clock = true;
        let mut trigger = open_trigger(ScriptedDevice::boxed(&[true, true]), &config);

        let before = trigger.get_trigger().unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        trigger.wait_for_trigger(0).unwrap();

        let session = trigger.session();
        assert!(session.triggers[0].time <= -0.019);
        assert_eq!(session.triggers[1].time, 0.0);
        assert!(before.time >= 0.0);
        assert_eq!(trigger.trigger_time(), 0.0);
    }

    #[test]
    fn test_clock_untouched_by_default() {
        let config = TriggerConfig::new("scripted");
        let clock = Clock::new();
        let mut trigger =
            ScannerTrigger::with_device(ScriptedDevice::boxed(&[true]), &config, clock.clone());
        trigger.open().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        trigger.wait_for_trigger(0).unwrap();
        assert!(!trigger.clock_was_reset());
        assert!(clock.time() >= 0.02);
    }

    #[test]
    fn test_set_trigger_count() {
        let config = TriggerConfig::new("scripted");
        let mut trigger = open_trigger(ScriptedDevice::boxed(&[true]), &config);
        trigger.set_trigger_count(10);
        assert_eq!(trigger.get_trigger().unwrap().unwrap().index, 10);
    }

    #[test]
    fn test_create_from_config() {
        let trigger = ScannerTrigger::create(&TriggerConfig::new("Dummy"), Clock::new()).unwrap();
        assert_eq!(trigger.port_type(), "dummy");
        assert!(!trigger.is_open());
        assert!(trigger.to_string().starts_with("dummy: tr="));
    }

    #[test]
    fn test_create_accepts_unbounded_timeout() {
        let config = TriggerConfig::new("dummy").with_timeout(1e20);
        let trigger = ScannerTrigger::create(&config, Clock::new()).unwrap();
        assert_eq!(trigger.port_type(), "dummy");
    }

    #[test]
    fn test_create_rejects_invalid_config() {
        let config = TriggerConfig::new("dummy").with_timeout(f64::NAN);
        assert!(matches!(
            ScannerTrigger::create(&config, Clock::new()),
            Err(TriggerError::InvalidConfig(_))
        ));
    }
}
