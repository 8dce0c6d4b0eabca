//! Parallel port trigger.
//!
//! Watches one pin of a parallel port and reports a trigger on a state
//! change that matches the configured edge.

use crate::config::TriggerConfig;
use crate::device::{Edge, PollContext, TriggerDevice};
use crate::error::{Result, TriggerError};
use serde::Deserialize;
use std::time::Duration;

/// Time the port needs after opening before pin reads are reliable.
const SETTLE_TIME: Duration = Duration::from_millis(500);

/// Read access to parallel port pins.
pub trait PinReader: Send {
    /// Logical level of `pin` (DB-25 numbering).
    fn read_pin(&mut self, pin: u8) -> std::io::Result<bool>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParallelConfig {
    /// Port device, e.g. `/dev/parport0`
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_pin")]
    pub pin: u8,
    #[serde(default)]
    pub edge: Edge,
}

fn default_pin() -> u8 {
    10
}

/// Pins that can be read: data lines 2..=9 and status lines 10..=13, 15.
pub fn is_readable_pin(pin: u8) -> bool {
    matches!(pin, 2..=13 | 15)
}

/// Wrapper around a parallel port pin.
pub struct ParallelPortTrigger {
    address: Option<String>,
    pin: u8,
    edge: Edge,
    reader: Option<Box<dyn PinReader>>,
    prev_state: bool,
}

impl ParallelPortTrigger {
    pub fn new(config: ParallelConfig) -> Result<Self> {
        let address = config.address.ok_or_else(|| {
            tracing::error!("no parallel port defined");
            TriggerError::PortNotFound("no parallel port defined".into())
        })?;
        Self::check_pin(config.pin)?;
        Ok(Self {
            address: Some(address),
            pin: config.pin,
            edge: config.edge,
            reader: None,
            prev_state: false,
        })
    }

    /// Use an already opened pin reader.
    pub fn with_reader(reader: Box<dyn PinReader>, pin: u8, edge: Edge) -> Result<Self> {
        Self::check_pin(pin)?;
        Ok(Self {
            address: None,
            pin,
            edge,
            reader: Some(reader),
            prev_state: false,
        })
    }

    pub fn from_config(config: &TriggerConfig) -> Result<Box<dyn TriggerDevice>> {
        Ok(Box::new(Self::new(config.device_config()?)?))
    }

    fn check_pin(pin: u8) -> Result<()> {
        if is_readable_pin(pin) {
            Ok(())
        } else {
            Err(TriggerError::InvalidConfig(format!(
                "parallel pin {pin} cannot be read"
            )))
        }
    }

    pub fn edge(&self) -> Edge {
        self.edge
    }
}

impl TriggerDevice for ParallelPortTrigger {
    fn port_type(&self) -> &str {
        "parallel"
    }

    fn describe(&self) -> String {
        format!(
            "address={} pin={} edge={}",
            self.address.as_deref().unwrap_or("<preconfigured>"),
            self.pin,
            self.edge.as_i8()
        )
    }

    fn open(&mut self) -> Result<()> {
        if self.reader.is_none() {
            let address = self
                .address
                .as_deref()
                .ok_or_else(|| TriggerError::PortNotFound("no parallel port defined".into()))?;
            let port = ppdev::open(address).map_err(|e| {
                tracing::error!("could not open parallel port {address}: {e}");
                e
            })?;
            self.reader = Some(port);
            std::thread::sleep(SETTLE_TIME);
        }
        tracing::debug!("opened parallel port: {}", self.describe());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.address.is_some() {
            self.reader = None;
        }
        Ok(())
    }

    fn poll(&mut self, ctx: &mut PollContext<'_>) -> Result<Option<f64>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| TriggerError::PortNotOpen("parallel port is not open".into()))?;

        let state = reader.read_pin(self.pin)?;
        if state == self.prev_state {
            return Ok(None);
        }

        let time = ctx.clock.time();
        self.prev_state = state;
        Ok(self.edge.accepts(state).then_some(time))
    }
}

#[cfg(target_os = "linux")]
mod ppdev {
    //! Linux `ppdev` access (`/dev/parportN`).

    use super::PinReader;
    use crate::error::{Result, TriggerError};
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::fd::AsRawFd;

    const PPCLAIM: libc::c_ulong = 0x708b;
    const PPRELEASE: libc::c_ulong = 0x708c;
    const PPRSTATUS: libc::c_ulong = 0x8001_7081;
    const PPRDATA: libc::c_ulong = 0x8001_7085;

    pub struct PpdevPort {
        file: File,
    }

    pub fn open(address: &str) -> Result<Box<dyn PinReader>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(address)
            .map_err(|e| TriggerError::PortNotOpen(format!("{address}: {e}")))?;
        let port = PpdevPort { file };
        port.ioctl_none(PPCLAIM)
            .map_err(|e| TriggerError::PortNotOpen(format!("{address}: claim failed: {e}")))?;
        Ok(Box::new(port))
    }

    impl PpdevPort {
        fn ioctl_none(&self, request: libc::c_ulong) -> io::Result<()> {
            // SAFETY: the request takes no argument and the fd is open.
            let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _) };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        fn read_register(&self, request: libc::c_ulong) -> io::Result<u8> {
            let mut value: libc::c_uchar = 0;
            // SAFETY: the request writes one byte into `value`.
            let rc = unsafe {
                libc::ioctl(
                    self.file.as_raw_fd(),
                    request as _,
                    &mut value as *mut libc::c_uchar,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(value)
        }
    }

    impl PinReader for PpdevPort {
        fn read_pin(&mut self, pin: u8) -> io::Result<bool> {
            match pin {
                2..=9 => Ok(self.read_register(PPRDATA)? & (1 << (pin - 2)) != 0),
                10 => Ok(self.read_register(PPRSTATUS)? & 0x40 != 0),
                // BUSY is inverted by the port hardware.
                11 => Ok(self.read_register(PPRSTATUS)? & 0x80 == 0),
                12 => Ok(self.read_register(PPRSTATUS)? & 0x20 != 0),
                13 => Ok(self.read_register(PPRSTATUS)? & 0x10 != 0),
                15 => Ok(self.read_register(PPRSTATUS)? & 0x08 != 0),
                other => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("pin {other} cannot be read"),
                )),
            }
        }
    }

    impl Drop for PpdevPort {
        fn drop(&mut self) {
            let _ = self.ioctl_none(PPRELEASE);
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod ppdev {
    //! Parallel ports are only supported through Linux `ppdev`.

    use super::PinReader;
    use crate::error::{Result, TriggerError};

    pub fn open(address: &str) -> Result<Box<dyn PinReader>> {
        Err(TriggerError::PortNotOpen(format!(
            "{address}: parallel port access is not supported on this platform"
        )))
    }
}
