//! SerialView - serial port viewer
//!
//! Streams a serial device (or the synthetic source) to stdout while lines
//! typed on stdin are sent to it. Lines starting with `:` are commands.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serialview_core::cli::{classify, print_exit_codes};
use serialview_core::config::{self, AppConfig, MemoryStore, SettingsStore, TomlStore};
use serialview_core::core::settings::{self as serial_settings, BaudRate};
use serialview_core::{
    list_devices, open_connection, ConnectionSettings, IoWorker, LineEnding, ReadingMode,
    WorkerStats, SYNTHETIC_DEVICE,
};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// How long a `:port` swap waits for the worker to pause
const SWAP_TIMEOUT: Duration = Duration::from_secs(2);

/// How often the monitor loop checks for Ctrl-C and the deadline
const TICK: Duration = Duration::from_millis(100);

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// Reading mode
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// One unit per complete line
    Line,
    /// One unit per byte
    Byte,
}

impl From<ModeArg> for ReadingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Line => ReadingMode::Line,
            ModeArg::Byte => ReadingMode::Byte,
        }
    }
}

/// Line ending style
#[derive(Debug, Clone, Copy, ValueEnum)]
enum EndingArg {
    /// No line ending
    None,
    /// LF only (Unix)
    Lf,
    /// CR only (old Mac)
    Cr,
    /// CR+LF (Windows)
    Crlf,
}

impl From<EndingArg> for LineEnding {
    fn from(ending: EndingArg) -> Self {
        match ending {
            EndingArg::None => LineEnding::None,
            EndingArg::Lf => LineEnding::Lf,
            EndingArg::Cr => LineEnding::Cr,
            EndingArg::Crlf => LineEnding::CrLf,
        }
    }
}

/// SerialView CLI
#[derive(Parser, Debug)]
#[command(name = "serialview", version, about = "Serial port viewer", long_about = None)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts,

    /// Stream a device to stdout and send stdin lines to it
    Monitor {
        /// Device name (e.g. /dev/ttyUSB0); defaults to the last one used,
        /// or the synthetic source
        #[arg(short, long, env = "SERIALVIEW_DEVICE")]
        device: Option<String>,

        /// Baud rate, overriding the stored settings
        #[arg(short, long)]
        baud: Option<u32>,

        /// Reading mode, overriding the stored settings
        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,

        /// Line ending appended to sent lines
        #[arg(long, value_enum)]
        line_ending: Option<EndingArg>,

        /// Exit after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Inspect or change the stored serial settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Print the exit code table
    ExitCodes,
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Show the stored settings
    Show,
    /// Set one key, `none` removes it
    Set { key: String, value: String },
    /// Restore defaults
    Reset,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (app_config, config_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(err) => (AppConfig::default(), Some(err)),
    };
    let dirs_ready = config::init_directories();
    let _guard = init_tracing(&cli, &app_config);
    if let Some(err) = config_error {
        warn!(error = %err, "config not loaded, using defaults");
    }
    if let Err(err) = dirs_ready {
        warn!(error = %err, "could not create application directories");
    }

    let result = match cli.command {
        Commands::ListPorts => list_ports(&cli),
        Commands::Monitor {
            ref device,
            baud,
            mode,
            line_ending,
            duration,
        } => monitor(
            &cli,
            app_config,
            MonitorArgs {
                device: device.clone(),
                baud,
                mode: mode.map(ReadingMode::from),
                line_ending: line_ending.map(LineEnding::from),
                duration: duration.map(Duration::from_secs),
            },
        ),
        Commands::Settings { ref action } => handle_settings(&cli, action),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let outcome = classify(&err);
            if let Some(msg) = outcome.message() {
                eprintln!("error: {msg}");
            }
            outcome.to_exit_code()
        }
    }
}

fn init_tracing(cli: &Cli, config: &AppConfig) -> Option<WorkerGuard> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(if config.logging.json {
        fmt::layer().json().with_writer(io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(io::stderr).boxed()
    });

    let mut guard = None;
    if config.logging.file {
        if let Some(dir) = config.logging.directory() {
            let appender = tracing_appender::rolling::daily(dir, "serialview.log");
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
            guard = Some(file_guard);
        }
    }

    tracing_subscriber::registry().with(layers).with(filter).init();
    guard
}

fn list_ports(cli: &Cli) -> anyhow::Result<()> {
    let mut devices = list_devices()?;
    devices.push(SYNTHETIC_DEVICE.to_string());

    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&devices)?);
        }
        OutputFormat::Text => {
            for device in &devices {
                println!("{device}");
            }
        }
    }

    Ok(())
}

/// Open the settings store, in memory when there is no config directory
fn open_store() -> Box<dyn PersistentStore> {
    match TomlStore::open_default() {
        Ok(store) => Box::new(store),
        Err(err) => {
            warn!(error = %err, "settings store unavailable, changes will not persist");
            Box::new(MemoryStore::new())
        }
    }
}

/// A settings store that can be written back
trait PersistentStore: SettingsStore {
    fn as_store(&self) -> &dyn SettingsStore;
    fn as_store_mut(&mut self) -> &mut dyn SettingsStore;
    fn persist(&self) -> anyhow::Result<()>;
}

impl PersistentStore for TomlStore {
    fn as_store(&self) -> &dyn SettingsStore {
        self
    }

    fn as_store_mut(&mut self) -> &mut dyn SettingsStore {
        self
    }

    fn persist(&self) -> anyhow::Result<()> {
        self.save()
            .with_context(|| format!("writing {}", self.path().display()))?;
        Ok(())
    }
}

impl PersistentStore for MemoryStore {
    fn as_store(&self) -> &dyn SettingsStore {
        self
    }

    fn as_store_mut(&mut self) -> &mut dyn SettingsStore {
        self
    }

    fn persist(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct MonitorArgs {
    device: Option<String>,
    baud: Option<u32>,
    mode: Option<ReadingMode>,
    line_ending: Option<LineEnding>,
    duration: Option<Duration>,
}

/// Something typed on stdin
enum Input {
    Pause,
    Resume,
    Port(String),
    Stats,
    Quit,
    Line(String),
    Unknown(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        let Some(command) = line.strip_prefix(':') else {
            return Self::Line(line.to_string());
        };
        let mut parts = command.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).unwrap_or_default();
        match (name, arg) {
            ("pause", _) => Self::Pause,
            ("resume", _) => Self::Resume,
            ("port", device) if !device.is_empty() => Self::Port(device.to_string()),
            ("stats", _) => Self::Stats,
            ("quit" | "q", _) => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

fn spawn_stdin_reader() -> anyhow::Result<Receiver<Input>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(Input::parse(&line)).is_err() {
                    break;
                }
            }
        })
        .context("starting stdin reader")?;
    Ok(rx)
}

fn monitor(cli: &Cli, mut app_config: AppConfig, args: MonitorArgs) -> anyhow::Result<()> {
    let store = open_store();
    let mut settings = serial_settings::load_or_default(store.as_store());
    if let Some(baud) = args.baud {
        let rate = BaudRate::from_u32(baud)
            .ok_or_else(|| anyhow::anyhow!("unsupported baud rate {baud}"))?;
        settings = settings.baud_rate(rate);
    }
    if let Some(mode) = args.mode {
        settings = settings.reading_mode(mode);
    }
    let line_ending = args.line_ending.unwrap_or(app_config.line_ending);
    let device = args.device.or_else(|| app_config.device.clone());

    let connection = open_connection(device.as_deref(), &settings)?;
    let description = connection.describe();
    if !cli.quiet {
        eprintln!("Reading {description} ({settings}). Type :quit or press Ctrl+C to exit.");
    }

    let worker = IoWorker::spawn(connection, app_config.worker, |unit| {
        let mut out = io::stdout().lock();
        let _ = out.write_all(unit.as_bytes());
        let _ = out.flush();
    })?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let deadline = args.duration.map(|d| Instant::now() + d);
    let input = spawn_stdin_reader()?;
    let mut stdin_open = true;

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            debug!("monitor duration elapsed");
            break;
        }
        if worker.is_finished() {
            warn!("io worker exited");
            break;
        }

        let received = if stdin_open {
            input.recv_timeout(TICK)
        } else {
            thread::sleep(TICK);
            continue;
        };

        match received {
            Ok(Input::Quit) => break,
            Ok(Input::Pause) => {
                worker.pause();
                if !worker.wait_until_paused(SWAP_TIMEOUT) {
                    eprintln!("worker did not pause within {SWAP_TIMEOUT:?}");
                }
            }
            Ok(Input::Resume) => worker.resume(None)?,
            Ok(Input::Port(next)) => {
                let opened = worker.swap_connection(
                    || open_connection(Some(&next), &settings),
                    SWAP_TIMEOUT,
                );
                match opened {
                    Ok(()) => {
                        info!(device = %next, "switched device");
                        if !cli.quiet {
                            eprintln!("Now reading {next}.");
                        }
                        app_config.device = Some(next);
                        if let Err(err) = app_config.save() {
                            warn!(error = %err, "could not remember device");
                        }
                    }
                    Err(err) => eprintln!("error: {err}"),
                }
            }
            Ok(Input::Stats) => print_stats(cli, &worker.stats())?,
            Ok(Input::Line(text)) => {
                if let Err(err) = worker.send_line(line_ending.apply(&text)) {
                    eprintln!("error: {err}");
                }
            }
            Ok(Input::Unknown(text)) => {
                eprintln!("unknown command {text:?}; try :pause :resume :port NAME :stats :quit");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                stdin_open = false;
                if deadline.is_none() {
                    break;
                }
            }
        }
    }

    let stats = worker.stats();
    worker.join();
    if cli.verbose {
        print_stats(cli, &stats)?;
    }
    if !cli.quiet {
        eprintln!("Disconnected.");
    }
    Ok(())
}

fn print_stats(cli: &Cli, stats: &WorkerStats) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => eprintln!("{}", serde_json::to_string(stats)?),
        OutputFormat::Text => eprintln!(
            "received {} units ({} bytes), sent {} lines ({} failed, {} dropped), \
             {} read errors, {} decode errors, {} swaps",
            stats.units_received,
            stats.bytes_received,
            stats.lines_sent,
            stats.send_failures,
            stats.lines_dropped,
            stats.read_errors,
            stats.decode_errors,
            stats.swaps,
        ),
    }
    Ok(())
}

fn handle_settings(cli: &Cli, action: &SettingsAction) -> anyhow::Result<()> {
    let mut store = open_store();

    match action {
        SettingsAction::Show => {
            let settings = serial_settings::decode(store.as_store())?;
            show_settings(cli, &settings)?;
        }
        SettingsAction::Set { key, value } => {
            let current = serial_settings::load_or_default(store.as_store());
            let updated = serial_settings::with_override(&current, key, value)?;
            serial_settings::save(store.as_store_mut(), &updated);
            store.persist()?;
            if !cli.quiet {
                show_settings(cli, &updated)?;
            }
        }
        SettingsAction::Reset => {
            serial_settings::save(store.as_store_mut(), &ConnectionSettings::default());
            store.persist()?;
            if !cli.quiet {
                eprintln!("Serial settings restored to defaults.");
            }
        }
    }

    Ok(())
}

fn show_settings(cli: &Cli, settings: &ConnectionSettings) -> anyhow::Result<()> {
    let records = serial_settings::encode(settings);
    match cli.format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = records
                .iter()
                .map(|r| {
                    let value = r
                        .value
                        .as_ref()
                        .map_or(Ok(serde_json::Value::Null), serde_json::to_value)?;
                    Ok((r.key.to_string(), value))
                })
                .collect::<Result<_, serde_json::Error>>()?;
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        OutputFormat::Text => {
            println!("[{}]  {settings}", serial_settings::SETTINGS_GROUP);
            for record in &records {
                match &record.value {
                    Some(value) => println!("  {:<20} {value}", record.key),
                    None => println!("  {:<20} (unset)", record.key),
                }
            }
            if let Some(dir) = config::config_dir() {
                debug!(dir = %dir.display(), "config directory");
            }
        }
    }
    Ok(())
}
