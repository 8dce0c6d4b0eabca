//! Scanner Trigger CLI
//!
//! Wait for, monitor and inspect MRI scanner triggers from a terminal.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use scanner_trigger::{
    device::serial::list_ports, Clock, DeviceRegistry, ScannerTrigger, TerminalListener,
    TriggerConfig, TriggerError, VERSION,
};
use std::fmt::Display;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scanner-trigger")]
#[command(version = VERSION)]
#[command(about = "Wait for and monitor MRI scanner triggers", long_about = None)]
struct Cli {
    /// Log filter: a level (trace, debug, info, warn, error) or an env-filter directive
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Block until the scanner starts
    Wait {
        #[command(flatten)]
        source: SourceArgs,

        /// Triggers to skip before returning (dummy scans)
        #[arg(long, default_value_t = 0)]
        skip: u32,
    },

    /// Print every trigger until the scanner stops or the abort key is pressed
    Monitor {
        #[command(flatten)]
        source: SourceArgs,

        /// Stop after this many triggers
        #[arg(long)]
        count: Option<u64>,

        /// Where to write the session record (default: data directory)
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// List serial ports
    Ports,

    /// List available trigger port types
    Devices,

    /// Show configuration
    Config {
        /// Write the default configuration if none exists
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Configuration file (default: user config directory)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the configured port type
    #[arg(long)]
    port_type: Option<String>,

    /// Override the timeout for the first trigger, in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Reset the clock at the first trigger
    #[arg(long)]
    reset_clock: bool,

    /// Do not read keys from the terminal
    #[arg(long)]
    no_keys: bool,
}

impl SourceArgs {
    fn load(&self) -> anyhow::Result<TriggerConfig> {
        let mut config = match &self.config {
            Some(path) => TriggerConfig::load_from(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => TriggerConfig::load().context("loading config")?,
        };
        if let Some(port_type) = &self.port_type {
            config.port_type = port_type.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if self.reset_clock {
            config.reset_clock = true;
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let raw_terminal = match &cli.command {
        Commands::Wait { source, .. } | Commands::Monitor { source, .. } => !source.no_keys,
        _ => false,
    };
    init_tracing(&cli.log_level, raw_terminal)?;

    match cli.command {
        Commands::Wait { source, skip } => cmd_wait(&source, skip),
        Commands::Monitor {
            source,
            count,
            export,
        } => cmd_monitor(&source, count, export),
        Commands::Ports => cmd_ports(),
        Commands::Devices => cmd_devices(),
        Commands::Config { init } => cmd_config(init),
    }
}

fn init_tracing(filter: &str, raw_terminal: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .with_context(|| format!("invalid log filter '{filter}'"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(move || RawWriter {
            inner: io::stderr(),
            raw: raw_terminal,
        })
        .init();
    Ok(())
}

/// Writer that emits `\r\n` line endings while the terminal is in raw mode.
struct RawWriter<W> {
    inner: W,
    raw: bool,
}

impl<W: Write> Write for RawWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.raw {
            return self.inner.write(buf);
        }
        for chunk in buf.split_inclusive(|&b| b == b'\n') {
            match chunk.split_last() {
                Some((b'\n', line)) => {
                    self.inner.write_all(line)?;
                    self.inner.write_all(b"\r\n")?;
                }
                _ => self.inner.write_all(chunk)?,
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Print a line to stdout, raw-mode aware.
fn say(raw: bool, line: impl Display) {
    if raw {
        print!("{line}\r\n");
        let _ = io::stdout().flush();
    } else {
        println!("{line}");
    }
}

/// Open a trigger and route terminal keys and Ctrl+C into its key buffer.
fn open_trigger(
    source: &SourceArgs,
    clock: Clock,
) -> anyhow::Result<(ScannerTrigger, Option<TerminalListener>)> {
    let config = source.load()?;
    let mut trigger = ScannerTrigger::create(&config, clock)
        .with_context(|| format!("creating trigger '{}'", config.port_type))?;
    trigger
        .open()
        .with_context(|| format!("opening trigger {trigger}"))?;

    let sender = trigger.key_sender();
    let esc_key = config.esc_key.clone();
    ctrlc::set_handler(move || {
        sender.press(&esc_key);
    })
    .context("setting Ctrl+C handler")?;

    let listener = if source.no_keys {
        None
    } else {
        let mut listener = TerminalListener::new(trigger.key_sender(), config.esc_key.clone());
        listener
            .start()
            .context("capturing terminal keys (use --no-keys when not on a terminal)")?;
        Some(listener)
    };
    Ok((trigger, listener))
}

fn cmd_wait(source: &SourceArgs, skip: u32) -> anyhow::Result<()> {
    let (mut trigger, listener) = open_trigger(source, Clock::new())?;
    let raw = listener.is_some();
    say(
        raw,
        format!(
            "Waiting for {trigger} (abort with '{}')",
            trigger.esc_key()
        ),
    );

    let result = trigger.wait_for_trigger(skip);
    drop(listener);
    trigger.close()?;

    let t = result?;
    say(
        false,
        format!(
            "Trigger {} at {:.6}s (first trigger at {:.6}s)",
            t.index,
            t.time,
            trigger.first_trigger_time()
        ),
    );
    Ok(())
}

fn cmd_monitor(
    source: &SourceArgs,
    count: Option<u64>,
    export: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (mut trigger, mut listener) = open_trigger(source, Clock::new())?;
    let raw = listener.is_some();
    say(
        raw,
        format!(
            "Monitoring {trigger} (stop with '{}' or Ctrl+C)",
            trigger.esc_key()
        ),
    );

    let outcome = monitor_loop(&mut trigger, count, raw);

    if let Some(listener) = listener.as_mut() {
        listener.stop();
    }
    trigger.close()?;

    println!();
    println!("{}", trigger.session().summary());

    let path = export.unwrap_or_else(default_session_path);
    save_session(&trigger, &path)?;
    outcome
}

fn monitor_loop(trigger: &mut ScannerTrigger, count: Option<u64>, raw: bool) -> anyhow::Result<()> {
    let first = match trigger.wait_for_trigger(0) {
        Ok(t) => t,
        Err(TriggerError::Aborted) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    say(raw, format!("{}\t{:.6}", first.index, first.time));

    while count.map_or(true, |n| trigger.trigger_count() < n) {
        match trigger.get_trigger_block() {
            Ok(t) => say(raw, format!("{}\t{:.6}", t.index, t.time)),
            Err(TriggerError::Aborted) => break,
            Err(e) if e.is_timeout() => {
                say(raw, "No trigger within the timeout, scanner stopped");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn default_session_path() -> PathBuf {
    TriggerConfig::data_path().join("sessions").join(format!(
        "session_{}.json",
        Utc::now().format("%Y%m%d_%H%M%S")
    ))
}

fn save_session(trigger: &ScannerTrigger, path: &Path) -> anyhow::Result<()> {
    trigger
        .session()
        .save(path)
        .with_context(|| format!("writing session record {}", path.display()))?;
    println!("Session record written to {}", path.display());
    Ok(())
}

fn cmd_ports() -> anyhow::Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{}", port.display());
    }
    Ok(())
}

fn cmd_devices() -> anyhow::Result<()> {
    let registry = DeviceRegistry::with_builtins();
    for name in registry.names() {
        println!("{name}");
    }
    Ok(())
}

fn cmd_config(init: bool) -> anyhow::Result<()> {
    let path = TriggerConfig::config_path();
    if init {
        if path.exists() {
            bail!("config file {} already exists", path.display());
        }
        TriggerConfig::default()
            .save_to(&path)
            .context("writing default config")?;
        println!("Wrote default configuration.");
    }

    let config = TriggerConfig::load().context("loading config")?;
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {}", path.display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
