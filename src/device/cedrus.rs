//! Cedrus XID response pad trigger.
//!
//! XID devices (Lumina, RB-x40, c-pod) report button presses and scanner
//! pulses as 6-byte response packets on a serial line:
//!
//! ```text
//! 'k' | info | rt0 rt1 rt2 rt3
//!       info: bits 0-3 port, bit 4 pressed, bits 5-7 key
//!       rt:   reaction time in ms, little endian
//! ```

use crate::config::TriggerConfig;
use crate::device::serial::{LineSettings, SerialLine};
use crate::device::{PollContext, TriggerDevice};
use crate::error::{Result, TriggerError};
use serde::Deserialize;
use serial2::SerialPort;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const PACKET_LEN: usize = 6;
const PACKET_START: u8 = b'k';
const PROBE_COMMAND: &[u8] = b"_c1";
const PROBE_REPLY_PREFIX: &[u8] = b"_xid";
const PROBE_TIMEOUT: Duration = Duration::from_millis(300);

/// One decoded XID response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XidResponse {
    pub port: u8,
    pub key: u8,
    pub pressed: bool,
    /// Device reaction-time counter in milliseconds
    pub time_ms: u32,
}

impl XidResponse {
    /// Decode a packet starting with `'k'`.
    pub fn decode(packet: &[u8; PACKET_LEN]) -> Option<Self> {
        if packet[0] != PACKET_START {
            return None;
        }
        let info = packet[1];
        Some(Self {
            port: info & 0x0F,
            pressed: info & 0x10 != 0,
            key: (info & 0xE0) >> 5,
            time_ms: u32::from_le_bytes([packet[2], packet[3], packet[4], packet[5]]),
        })
    }
}

/// Incremental packet decoder; bytes before a packet start are skipped.
#[derive(Debug, Default)]
pub struct XidDecoder {
    buf: Vec<u8>,
}

impl XidDecoder {
    pub fn feed(&mut self, bytes: &[u8], out: &mut VecDeque<XidResponse>) {
        self.buf.extend_from_slice(bytes);
        loop {
            match self.buf.iter().position(|&b| b == PACKET_START) {
                Some(0) => {}
                Some(start) => {
                    self.buf.drain(..start);
                }
                None => {
                    self.buf.clear();
                    return;
                }
            }
            if self.buf.len() < PACKET_LEN {
                return;
            }
            let mut packet = [0u8; PACKET_LEN];
            packet.copy_from_slice(&self.buf[..PACKET_LEN]);
            self.buf.drain(..PACKET_LEN);
            if let Some(response) = XidResponse::decode(&packet) {
                out.push_back(response);
            }
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CedrusConfig {
    /// Index among discovered XID devices
    #[serde(default)]
    pub devicenr: usize,
    /// Explicit serial port, skipping discovery
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    /// Key number of the scanner pulse
    #[serde(default = "default_sync")]
    pub sync: u8,
}

fn default_baudrate() -> u32 {
    115_200
}

fn default_sync() -> u8 {
    4
}

/// Wrapper around a Cedrus XID device.
pub struct CedrusTrigger {
    config: CedrusConfig,
    line: Option<Box<dyn SerialLine>>,
    preconfigured: bool,
    decoder: XidDecoder,
    responses: VecDeque<XidResponse>,
}

impl CedrusTrigger {
    pub fn new(config: CedrusConfig) -> Result<Self> {
        if config.sync > 7 {
            return Err(TriggerError::InvalidConfig(format!(
                "cedrus sync key {} out of range 0..=7",
                config.sync
            )));
        }
        Ok(Self {
            config,
            line: None,
            preconfigured: false,
            decoder: XidDecoder::default(),
            responses: VecDeque::new(),
        })
    }

    /// Use an already opened XID line.
    pub fn with_line(line: Box<dyn SerialLine>, sync: u8) -> Result<Self> {
        let mut device = Self::new(CedrusConfig {
            devicenr: 0,
            port: None,
            baudrate: default_baudrate(),
            sync,
        })?;
        device.line = Some(line);
        device.preconfigured = true;
        Ok(device)
    }

    pub fn from_config(config: &TriggerConfig) -> Result<Box<dyn TriggerDevice>> {
        Ok(Box::new(Self::new(config.device_config()?)?))
    }

    fn line_settings(&self) -> LineSettings {
        LineSettings {
            baudrate: self.config.baudrate,
            ..LineSettings::default()
        }
    }

    /// Read everything pending on the line into the response queue.
    fn poll_for_responses(&mut self) -> Result<()> {
        let line = self
            .line
            .as_mut()
            .ok_or_else(|| TriggerError::PortNotOpen("Cedrus XID device is not open".into()))?;
        let mut buf = [0u8; 64];
        loop {
            let n = line.read_available(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            self.decoder.feed(&buf[..n], &mut self.responses);
        }
    }

    /// Drop responses that arrived before now.
    fn clear_responses(&mut self) -> Result<()> {
        self.poll_for_responses()?;
        self.responses.clear();
        self.decoder.reset();
        Ok(())
    }
}

impl TriggerDevice for CedrusTrigger {
    fn port_type(&self) -> &str {
        "cedrus"
    }

    fn describe(&self) -> String {
        match &self.config.port {
            Some(port) => format!("port={port} sync={}", self.config.sync),
            None if self.preconfigured => format!("preconfigured sync={}", self.config.sync),
            None => format!("devicenr={} sync={}", self.config.devicenr, self.config.sync),
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.line.is_none() {
            let settings = self.line_settings();
            let port = match &self.config.port {
                Some(path) => settings.open(path)?,
                None => {
                    tracing::debug!("detecting Cedrus XID devices");
                    let mut found = discover(&settings)?;
                    if self.config.devicenr >= found.len() {
                        tracing::error!(
                            "could not open Cedrus XID device {}",
                            self.config.devicenr
                        );
                        return Err(TriggerError::PortNotOpen(format!(
                            "Cedrus XID device {} not found ({} detected)",
                            self.config.devicenr,
                            found.len()
                        )));
                    }
                    found.swap_remove(self.config.devicenr)
                }
            };
            self.line = Some(Box::new(port));
        }
        tracing::debug!("opened Cedrus XID device: {}", self.describe());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.preconfigured {
            self.line = None;
        }
        self.responses.clear();
        self.decoder.reset();
        Ok(())
    }

    fn prepare_wait(&mut self, _ctx: &mut PollContext<'_>) -> Result<()> {
        self.clear_responses()
    }

    /// Only the first sync press in the queue counts; the rest is discarded.
    fn poll(&mut self, ctx: &mut PollContext<'_>) -> Result<Option<f64>> {
        self.poll_for_responses()?;
        let sync = self.config.sync;
        let detected = self
            .responses
            .iter()
            .any(|response| response.key == sync && response.pressed);
        let time = detected.then(|| ctx.clock.time());
        self.responses.clear();
        Ok(time)
    }
}

/// Probe every serial port for an XID device, in port order.
fn discover(settings: &LineSettings) -> Result<Vec<SerialPort>> {
    let mut devices = Vec::new();
    for path in SerialPort::available_ports()? {
        let Some(path) = path.to_str() else {
            continue;
        };
        let mut port = match settings.open(path) {
            Ok(port) => port,
            Err(e) => {
                tracing::debug!("skipping {path}: {e}");
                continue;
            }
        };
        match probe(&mut port) {
            Ok(true) => {
                tracing::info!("found Cedrus XID device on {path}");
                devices.push(port);
            }
            Ok(false) => {}
            Err(e) => tracing::debug!("probe of {path} failed: {e}"),
        }
    }
    Ok(devices)
}

/// Ask the device for its protocol and check for an XID reply.
fn probe(line: &mut dyn SerialLine) -> std::io::Result<bool> {
    line.write_bytes(PROBE_COMMAND)?;
    let deadline = Instant::now() + PROBE_TIMEOUT;
    let mut reply = Vec::new();
    let mut buf = [0u8; 16];
    while Instant::now() < deadline && reply.len() < PROBE_REPLY_PREFIX.len() + 1 {
        let n = line.read_available(&mut buf)?;
        reply.extend_from_slice(&buf[..n]);
    }
    Ok(reply.starts_with(PROBE_REPLY_PREFIX))
}
