//! Serial port trigger.
//!
//! The scanner (or its trigger interface) writes a sync byte on a serial
//! line at every volume. A trigger is a byte equal to the configured sync
//! value; other bytes are ignored.

use crate::config::TriggerConfig;
use crate::device::{PollContext, TriggerDevice};
use crate::error::{Result, TriggerError};
use serde::{Deserialize, Deserializer};
use serial2::{CharSize, Parity, SerialPort, Settings, StopBits};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upper bound on how long one read may block.
const READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Byte-level access to a serial line.
pub trait SerialLine: Send {
    /// Read what is available, returning 0 when nothing arrived in time.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()>;
}

impl SerialLine for SerialPort {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match Read::read(self, buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(self, data)?;
        Write::flush(self)
    }
}

/// In-memory serial line, fed through a [`LineFeeder`].
#[derive(Debug, Default)]
pub struct MemoryLine {
    incoming: Arc<Mutex<VecDeque<u8>>>,
    written: Arc<Mutex<Vec<u8>>>,
}

/// Handle for pushing bytes into, and inspecting writes to, a [`MemoryLine`].
#[derive(Debug, Clone)]
pub struct LineFeeder {
    incoming: Arc<Mutex<VecDeque<u8>>>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl MemoryLine {
    pub fn new() -> (Self, LineFeeder) {
        let line = Self::default();
        let feeder = LineFeeder {
            incoming: line.incoming.clone(),
            written: line.written.clone(),
        };
        (line, feeder)
    }
}

impl LineFeeder {
    pub fn push(&self, bytes: &[u8]) {
        let mut incoming = self.incoming.lock().unwrap_or_else(|e| e.into_inner());
        incoming.extend(bytes.iter().copied());
    }

    /// Bytes written to the line so far.
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn pending(&self) -> usize {
        self.incoming.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl SerialLine for MemoryLine {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut incoming = self.incoming.lock().unwrap_or_else(|e| e.into_inner());
        let n = buf.len().min(incoming.len());
        for (slot, byte) in buf.iter_mut().zip(incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
        written.extend_from_slice(data);
        Ok(())
    }
}

/// Line settings shared by serial-based devices.
#[derive(Debug, Clone, Deserialize)]
pub struct LineSettings {
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "default_bytesize")]
    pub bytesize: u8,
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default = "default_stopbits")]
    pub stopbits: u8,
}

fn default_baudrate() -> u32 {
    9600
}

fn default_bytesize() -> u8 {
    8
}

fn default_parity() -> String {
    "N".to_string()
}

fn default_stopbits() -> u8 {
    1
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baudrate: default_baudrate(),
            bytesize: default_bytesize(),
            parity: default_parity(),
            stopbits: default_stopbits(),
        }
    }
}

impl LineSettings {
    fn char_size(&self) -> Result<CharSize> {
        match self.bytesize {
            5 => Ok(CharSize::Bits5),
            6 => Ok(CharSize::Bits6),
            7 => Ok(CharSize::Bits7),
            8 => Ok(CharSize::Bits8),
            other => Err(TriggerError::InvalidConfig(format!("bytesize {other}"))),
        }
    }

    fn parity(&self) -> Result<Parity> {
        match self.parity.trim().to_uppercase().as_str() {
            "N" | "NONE" => Ok(Parity::None),
            "E" | "EVEN" => Ok(Parity::Even),
            "O" | "ODD" => Ok(Parity::Odd),
            other => Err(TriggerError::InvalidConfig(format!("parity {other}"))),
        }
    }

    fn stop_bits(&self) -> Result<StopBits> {
        match self.stopbits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(TriggerError::InvalidConfig(format!("stopbits {other}"))),
        }
    }

    /// Check every field before a port is touched.
    pub fn validate(&self) -> Result<()> {
        self.char_size()?;
        self.parity()?;
        self.stop_bits()?;
        Ok(())
    }

    /// Open `path` in raw mode with these settings and a short read timeout.
    pub fn open(&self, path: &str) -> Result<SerialPort> {
        let char_size = self.char_size()?;
        let parity = self.parity()?;
        let stop_bits = self.stop_bits()?;
        let baudrate = self.baudrate;

        let mut port = SerialPort::open(path, move |mut settings: Settings| {
            settings.set_raw();
            settings.set_baud_rate(baudrate)?;
            settings.set_char_size(char_size);
            settings.set_parity(parity);
            settings.set_stop_bits(stop_bits);
            Ok(settings)
        })
        .map_err(|e| TriggerError::PortNotOpen(format!("{path}: {e}")))?;

        port.set_read_timeout(READ_TIMEOUT)
            .map_err(|e| TriggerError::PortNotOpen(format!("{path}: {e}")))?;
        Ok(port)
    }
}

/// Serial trigger settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    #[serde(default)]
    pub port: Option<String>,
    #[serde(flatten)]
    pub line: LineSettings,
    /// Byte value signalling a volume
    #[serde(default = "default_sync", deserialize_with = "deserialize_sync")]
    pub sync: u8,
}

fn default_sync() -> u8 {
    b'5'
}

/// Accept either a byte value (`53`) or a one-character string (`"5"`).
fn deserialize_sync<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<u8, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => u8::try_from(n)
            .map_err(|_| serde::de::Error::custom(format!("sync byte {n} out of range"))),
        Raw::Text(s) => match s.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(serde::de::Error::custom(format!(
                "sync must be a single byte, got '{s}'"
            ))),
        },
    }
}

/// Wrapper around a serial line watching for the sync byte.
pub struct SerialPortTrigger {
    port: Option<String>,
    line_settings: LineSettings,
    sync: u8,
    line: Option<Box<dyn SerialLine>>,
}

impl SerialPortTrigger {
    /// Configure a trigger on a named port. The port is opened by `open`.
    pub fn new(config: SerialConfig) -> Result<Self> {
        let port = config.port.ok_or_else(|| {
            tracing::error!("no serial port defined");
            TriggerError::PortNotFound("no serial port defined".into())
        })?;
        config.line.validate()?;
        Ok(Self {
            port: Some(port),
            line_settings: config.line,
            sync: config.sync,
            line: None,
        })
    }

    /// Use an already configured line instead of opening a port.
    pub fn with_line(line: Box<dyn SerialLine>, sync: u8) -> Self {
        Self {
            port: None,
            line_settings: LineSettings::default(),
            sync,
            line: Some(line),
        }
    }

    pub fn from_config(config: &TriggerConfig) -> Result<Box<dyn TriggerDevice>> {
        Ok(Box::new(Self::new(config.device_config()?)?))
    }

    pub fn sync(&self) -> u8 {
        self.sync
    }
}

impl TriggerDevice for SerialPortTrigger {
    fn port_type(&self) -> &str {
        "serial"
    }

    fn describe(&self) -> String {
        match &self.port {
            Some(port) => format!(
                "port={port} baudrate={} bytesize={} parity={} stopbits={} sync={:#04x}",
                self.line_settings.baudrate,
                self.line_settings.bytesize,
                self.line_settings.parity,
                self.line_settings.stopbits,
                self.sync
            ),
            None => format!("preconfigured line sync={:#04x}", self.sync),
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.line.is_none() {
            let path = self
                .port
                .as_deref()
                .ok_or_else(|| TriggerError::PortNotFound("no serial port defined".into()))?;
            let port = self.line_settings.open(path).map_err(|e| {
                tracing::error!("could not open serial port {path}: {e}");
                e
            })?;
            self.line = Some(Box::new(port));
        }
        tracing::debug!("opened serial port: {}", self.describe());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Injected lines belong to the caller and stay in place.
        if self.port.is_some() {
            self.line = None;
        }
        Ok(())
    }

    fn poll(&mut self, ctx: &mut PollContext<'_>) -> Result<Option<f64>> {
        let line = self
            .line
            .as_mut()
            .ok_or_else(|| TriggerError::PortNotOpen("serial port is not open".into()))?;

        let mut byte = [0u8; 1];
        let n = line.read_available(&mut byte)?;
        let time = ctx.clock.time();
        Ok((n == 1 && byte[0] == self.sync).then_some(time))
    }
}

/// Serial ports present on this machine.
pub fn list_ports() -> Result<Vec<PathBuf>> {
    Ok(SerialPort::available_ports()?)
}
