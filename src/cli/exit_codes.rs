//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::connection::ConnectionError;
use crate::core::settings::SettingsError;
use crate::core::worker::{SwapError, WorkerError};
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Operation timed out
    pub const TIMEOUT: u8 = 4;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Device busy
    pub const DEVICE_BUSY: u8 = 13;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Failure with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<&ConnectionError> for CliResult {
    fn from(err: &ConnectionError) -> Self {
        let code = match err {
            ConnectionError::DeviceNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            ConnectionError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            ConnectionError::Busy(_) => ExitCodes::DEVICE_BUSY,
            ConnectionError::WriteTimeout(_) => ExitCodes::TIMEOUT,
            ConnectionError::Unsupported { .. } => ExitCodes::CONFIG_ERROR,
            _ => ExitCodes::CONNECTION_FAILED,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&SettingsError> for CliResult {
    fn from(err: &SettingsError) -> Self {
        Self::Error(ExitCodes::INVALID_ARGS, err.to_string())
    }
}

impl From<&ConfigError> for CliResult {
    fn from(err: &ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

impl From<&WorkerError> for CliResult {
    fn from(err: &WorkerError) -> Self {
        Self::Error(ExitCodes::INTERNAL_ERROR, err.to_string())
    }
}

impl From<&SwapError> for CliResult {
    fn from(err: &SwapError) -> Self {
        match err {
            SwapError::PauseTimeout(_) => Self::Error(ExitCodes::TIMEOUT, err.to_string()),
            SwapError::Connection(inner) => inner.into(),
            SwapError::Worker(inner) => inner.into(),
        }
    }
}

/// Map an error from the binary onto an exit code
///
/// Known library errors keep their specific code, anything else is a general
/// error.
pub fn classify(err: &anyhow::Error) -> CliResult {
    if let Some(e) = err.downcast_ref::<ConnectionError>() {
        return e.into();
    }
    if let Some(e) = err.downcast_ref::<SwapError>() {
        return e.into();
    }
    if let Some(e) = err.downcast_ref::<SettingsError>() {
        return e.into();
    }
    if let Some(e) = err.downcast_ref::<ConfigError>() {
        return e.into();
    }
    if let Some(e) = err.downcast_ref::<WorkerError>() {
        return e.into();
    }
    CliResult::error(ExitCodes::ERROR, format!("{err:#}"))
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Operation timed out",
        7 => "Permission denied",
        8 => "Configuration error",
        13 => "Device busy",
        14 => "Port not found",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 7, 8, 13, 14, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
