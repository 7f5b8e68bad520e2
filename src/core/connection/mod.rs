//! Connections the I/O worker reads from and writes to
//!
//! Two implementations:
//! - [`RealConnection`]: a serial device opened through `serialport`
//! - [`SyntheticConnection`]: a generator for running without hardware
//!
//! Use [`open_connection`] to pick the right one for a device identifier.

mod serial;
mod synthetic;

pub use serial::RealConnection;
pub use synthetic::SyntheticConnection;

use crate::core::settings::ConnectionSettings;
use std::time::Duration;
use thiserror::Error;

/// Device identifier reserved for the synthetic connection
pub const SYNTHETIC_DEVICE: &str = "fakePort";

/// Connection error types
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Device does not exist
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Device is held by another opener
    #[error("Device busy: {0}")]
    Busy(String),

    /// Device exists but could not be opened
    #[error("Failed to open {device}: {reason}")]
    OpenFailed {
        /// Device identifier
        device: String,
        /// Backend message
        reason: String,
    },

    /// Settings cannot be applied to the device
    #[error("{setting} is not supported on {device}")]
    Unsupported {
        /// Device identifier
        device: String,
        /// Offending setting
        setting: String,
    },

    /// Write did not complete in time
    #[error("Write timeout after {0:?}")]
    WriteTimeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Listing devices failed
    #[error("Device enumeration failed: {0}")]
    Enumeration(String),
}

/// A data source/sink bound to one device and one set of settings
///
/// `read` must return within a bounded time: an empty result means nothing
/// arrived before the read timed out. The worker relies on this to stay
/// responsive to pause and shutdown requests.
#[cfg_attr(test, mockall::automock)]
pub trait Connection: Send {
    /// Read one unit (a byte or a line, depending on the reading mode)
    fn read(&mut self) -> Result<Vec<u8>, ConnectionError>;

    /// Transmit text
    fn send(&mut self, text: &str) -> Result<(), ConnectionError>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Whether `device` names the synthetic connection
pub fn is_synthetic(device: &str) -> bool {
    device == SYNTHETIC_DEVICE
}

/// Open a connection for `device` with `settings`
///
/// `None` and [`SYNTHETIC_DEVICE`] give a [`SyntheticConnection`], anything
/// else is opened as a serial device.
pub fn open_connection(
    device: Option<&str>,
    settings: &ConnectionSettings,
) -> Result<Box<dyn Connection>, ConnectionError> {
    match device {
        None => Ok(Box::new(SyntheticConnection::new(settings.reading_mode))),
        Some(name) if is_synthetic(name) => {
            Ok(Box::new(SyntheticConnection::new(settings.reading_mode)))
        }
        Some(name) => Ok(Box::new(RealConnection::open(name, settings.clone())?)),
    }
}

/// List available serial devices, sorted by name
pub fn list_devices() -> Result<Vec<String>, ConnectionError> {
    let mut names: Vec<String> = serialport::available_ports()
        .map_err(|e| ConnectionError::Enumeration(e.to_string()))?
        .into_iter()
        .map(|info| info.port_name)
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_synthetic() {
        let settings = ConnectionSettings::default();
        let conn = open_connection(None, &settings).unwrap();
        assert!(conn.describe().contains("synthetic"));

        let conn = open_connection(Some(SYNTHETIC_DEVICE), &settings).unwrap();
        assert!(conn.describe().contains("synthetic"));
    }

    #[test]
    fn test_factory_missing_device() {
        let settings = ConnectionSettings::default();
        let result = open_connection(Some("/dev/serialview-missing-device"), &settings);
        assert!(result.is_err());
    }
}
