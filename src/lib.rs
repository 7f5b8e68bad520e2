//! # SerialView Core Library
//!
//! Reads a serial device (or a synthetic source) on a background thread,
//! decodes what arrives into bytes or lines and hands them to a consumer,
//! while a control thread pauses, resumes, sends data and swaps the device.
//!
//! ## Features
//!
//! - Pausable I/O worker with a safe connection hot-swap handshake
//! - Ordered outbound queue flushed before every read
//! - Byte and line reading modes
//! - Synthetic connection for running without hardware
//! - Connection settings persisted in a key/value store
//!
//! ## Example
//!
//! ```rust,no_run
//! use serialview_core::{open_connection, ConnectionSettings, IoWorker, WorkerConfig};
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = ConnectionSettings::default();
//!     let connection = open_connection(None, &settings)?;
//!     let worker = IoWorker::spawn(connection, WorkerConfig::default(), |unit| {
//!         print!("{unit}");
//!     })?;
//!
//!     worker.send_line("AT\r\n")?;
//!     worker.swap_connection(
//!         || open_connection(Some("/dev/ttyUSB0"), &settings),
//!         Duration::from_secs(2),
//!     )?;
//!
//!     worker.join();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{AppConfig, ConfigError, MemoryStore, SettingsStore, StoreValue, TomlStore};
pub use crate::core::codec::{DecodeError, LineEnding};
pub use crate::core::connection::{
    list_devices, open_connection, Connection, ConnectionError, RealConnection,
    SyntheticConnection, SYNTHETIC_DEVICE,
};
pub use crate::core::queue::{OutboundQueue, OverflowPolicy, QueueConfig, QueueError};
pub use crate::core::settings::{
    BaudRate, ConnectionSettings, DataBits, Parity, ReadingMode, SettingsError, StopBits,
};
pub use crate::core::worker::{
    IoWorker, SwapError, WorkerConfig, WorkerError, WorkerState, WorkerStats,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
