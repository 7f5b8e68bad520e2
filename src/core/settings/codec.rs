//! Persisting [`ConnectionSettings`] in a key/value store
//!
//! Enumerations are stored by symbolic name, timeouts as float seconds and
//! optional fields by presence: `None` removes the key. Missing keys decode
//! to the matching field of [`ConnectionSettings::default`], so data written
//! by older versions keeps loading.
//!
//! Any invalid value fails the whole decode. Callers that would rather start
//! from a clean slate use [`load_or_default`].

use super::{BaudRate, ConnectionSettings, DataBits, Parity, ReadingMode, StopBits, MAX_TIMEOUT};
use crate::config::store::{MemoryStore, SettingsStore, StoreValue};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Store group holding the serial settings
pub const SETTINGS_GROUP: &str = "serial_port";

const BAUDRATE: &str = "baudrate";
const BYTESIZE: &str = "bytesize";
const PARITY: &str = "parity";
const STOPBITS: &str = "stopbits";
const TIMEOUT: &str = "timeout";
const XONXOFF: &str = "xonxoff";
const RTSCTS: &str = "rtscts";
const WRITE_TIMEOUT: &str = "write_timeout";
const DSRDTR: &str = "dsrdtr";
const INTER_BYTE_TIMEOUT: &str = "inter_byte_timeout";
const EXCLUSIVE: &str = "exclusive";
const READING_MODE: &str = "reading_mode";

/// Every key the codec reads and writes
pub const SETTINGS_KEYS: &[&str] = &[
    BAUDRATE,
    BYTESIZE,
    PARITY,
    STOPBITS,
    TIMEOUT,
    XONXOFF,
    RTSCTS,
    WRITE_TIMEOUT,
    DSRDTR,
    INTER_BYTE_TIMEOUT,
    EXCLUSIVE,
    READING_MODE,
];

/// Settings decoding errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    /// Value has the right kind but is not allowed
    #[error("Invalid value for `{key}`: {value}")]
    InvalidValue {
        /// Offending key
        key: &'static str,
        /// Stored value
        value: String,
    },

    /// Value has the wrong kind
    #[error("`{key}` expects {expected}, found {found}")]
    InvalidType {
        /// Offending key
        key: &'static str,
        /// Expected kind
        expected: &'static str,
        /// Stored kind
        found: &'static str,
    },

    /// Key is not a serial setting
    #[error("Unknown setting: {0}")]
    UnknownKey(String),
}

/// One encoded field; `None` means the key must be absent
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsRecord {
    /// Store key
    pub key: &'static str,
    /// Encoded value
    pub value: Option<StoreValue>,
}

impl SettingsRecord {
    fn new(key: &'static str, value: impl Into<Option<StoreValue>>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

/// Encode settings into store records
///
/// Timeouts above [`MAX_TIMEOUT`] are written as [`MAX_TIMEOUT`].
pub fn encode(settings: &ConnectionSettings) -> Vec<SettingsRecord> {
    let settings = &settings.clone().normalized();
    let seconds = |d: Option<Duration>| d.map(|d| StoreValue::Float(d.as_secs_f64()));
    vec![
        SettingsRecord::new(BAUDRATE, StoreValue::Int(i64::from(settings.baud_rate.as_u32()))),
        SettingsRecord::new(BYTESIZE, StoreValue::from(settings.data_bits.name())),
        SettingsRecord::new(PARITY, StoreValue::from(settings.parity.name())),
        SettingsRecord::new(STOPBITS, StoreValue::from(settings.stop_bits.name())),
        SettingsRecord::new(TIMEOUT, seconds(settings.timeout)),
        SettingsRecord::new(XONXOFF, StoreValue::Bool(settings.xonxoff)),
        SettingsRecord::new(RTSCTS, StoreValue::Bool(settings.rtscts)),
        SettingsRecord::new(WRITE_TIMEOUT, seconds(settings.write_timeout)),
        SettingsRecord::new(DSRDTR, StoreValue::Bool(settings.dsrdtr)),
        SettingsRecord::new(INTER_BYTE_TIMEOUT, seconds(settings.inter_byte_timeout)),
        SettingsRecord::new(EXCLUSIVE, settings.exclusive.map(StoreValue::Bool)),
        SettingsRecord::new(READING_MODE, StoreValue::from(settings.reading_mode.name())),
    ]
}

/// Write settings into the store, removing keys of absent optional fields
pub fn save(store: &mut dyn SettingsStore, settings: &ConnectionSettings) {
    for record in encode(settings) {
        match record.value {
            Some(value) => store.set(SETTINGS_GROUP, record.key, value),
            None => store.remove(SETTINGS_GROUP, record.key),
        }
    }
}

/// Decode settings from the store
pub fn decode(store: &dyn SettingsStore) -> Result<ConnectionSettings, SettingsError> {
    let defaults = ConnectionSettings::default();
    let reader = Reader { store };

    Ok(ConnectionSettings {
        baud_rate: reader.baud_rate(defaults.baud_rate)?,
        data_bits: reader.symbol(BYTESIZE, defaults.data_bits, DataBits::from_name)?,
        parity: reader.symbol(PARITY, defaults.parity, Parity::from_name)?,
        stop_bits: reader.symbol(STOPBITS, defaults.stop_bits, StopBits::from_name)?,
        timeout: reader.duration(TIMEOUT, defaults.timeout)?,
        write_timeout: reader.duration(WRITE_TIMEOUT, defaults.write_timeout)?,
        inter_byte_timeout: reader.duration(INTER_BYTE_TIMEOUT, defaults.inter_byte_timeout)?,
        xonxoff: reader.flag(XONXOFF, defaults.xonxoff)?,
        rtscts: reader.flag(RTSCTS, defaults.rtscts)?,
        dsrdtr: reader.flag(DSRDTR, defaults.dsrdtr)?,
        exclusive: match reader.get(EXCLUSIVE) {
            Some(value) => Some(parse_bool(EXCLUSIVE, &value)?),
            None => defaults.exclusive,
        },
        reading_mode: reader.symbol(READING_MODE, defaults.reading_mode, ReadingMode::from_name)?,
    })
}

/// Decode settings, falling back to defaults if the stored data is invalid
pub fn load_or_default(store: &dyn SettingsStore) -> ConnectionSettings {
    decode(store).unwrap_or_else(|err| {
        warn!(error = %err, "stored serial settings are invalid, using defaults");
        ConnectionSettings::default()
    })
}

/// Return a copy of `settings` with one field replaced by a textual value
///
/// `none` (or an empty value) removes the key, which restores the default
/// for that field. The result is validated by a full decode.
pub fn with_override(
    settings: &ConnectionSettings,
    key: &str,
    raw: &str,
) -> Result<ConnectionSettings, SettingsError> {
    let key = SETTINGS_KEYS
        .iter()
        .copied()
        .find(|k| *k == key)
        .ok_or_else(|| SettingsError::UnknownKey(key.to_string()))?;

    let mut scratch = MemoryStore::new();
    save(&mut scratch, settings);
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
        scratch.remove(SETTINGS_GROUP, key);
    } else {
        scratch.set(SETTINGS_GROUP, key, StoreValue::from(raw));
    }
    decode(&scratch)
}

struct Reader<'a> {
    store: &'a dyn SettingsStore,
}

impl Reader<'_> {
    fn get(&self, key: &str) -> Option<StoreValue> {
        self.store.get(SETTINGS_GROUP, key)
    }

    fn baud_rate(&self, fallback: BaudRate) -> Result<BaudRate, SettingsError> {
        let Some(value) = self.get(BAUDRATE) else {
            return Ok(fallback);
        };
        let number = match &value {
            StoreValue::Int(n) => u32::try_from(*n).ok(),
            StoreValue::Text(s) => s.trim().parse::<u32>().ok(),
            other => {
                return Err(SettingsError::InvalidType {
                    key: BAUDRATE,
                    expected: "integer",
                    found: other.kind(),
                })
            }
        };
        number
            .and_then(BaudRate::from_u32)
            .ok_or_else(|| invalid(BAUDRATE, &value))
    }

    fn symbol<T>(
        &self,
        key: &'static str,
        fallback: T,
        parse: fn(&str) -> Option<T>,
    ) -> Result<T, SettingsError> {
        match self.get(key) {
            None => Ok(fallback),
            Some(StoreValue::Text(name)) => {
                parse(name.trim()).ok_or_else(|| invalid(key, &StoreValue::Text(name)))
            }
            Some(other) => Err(SettingsError::InvalidType {
                key,
                expected: "symbolic name",
                found: other.kind(),
            }),
        }
    }

    fn flag(&self, key: &'static str, fallback: bool) -> Result<bool, SettingsError> {
        match self.get(key) {
            None => Ok(fallback),
            Some(value) => parse_bool(key, &value),
        }
    }

    fn duration(
        &self,
        key: &'static str,
        fallback: Option<Duration>,
    ) -> Result<Option<Duration>, SettingsError> {
        let Some(value) = self.get(key) else {
            return Ok(fallback);
        };
        let seconds = match &value {
            StoreValue::Float(f) => *f,
            StoreValue::Int(n) => i32::try_from(*n)
                .map(f64::from)
                .map_err(|_| invalid(key, &value))?,
            StoreValue::Text(s) => s.trim().parse::<f64>().map_err(|_| invalid(key, &value))?,
            StoreValue::Bool(_) => {
                return Err(SettingsError::InvalidType {
                    key,
                    expected: "seconds",
                    found: value.kind(),
                })
            }
        };
        duration_from_secs(seconds)
            .map(Some)
            .ok_or_else(|| invalid(key, &value))
    }
}

fn parse_bool(key: &'static str, value: &StoreValue) -> Result<bool, SettingsError> {
    match value {
        StoreValue::Bool(b) => Ok(*b),
        StoreValue::Int(0) => Ok(false),
        StoreValue::Int(1) => Ok(true),
        StoreValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(invalid(key, value)),
        },
        StoreValue::Int(_) => Err(invalid(key, value)),
        StoreValue::Float(_) => Err(SettingsError::InvalidType {
            key,
            expected: "bool",
            found: value.kind(),
        }),
    }
}

/// Seconds to a duration, rounded to the nanosecond so that
/// `Duration -> f64 -> Duration` is lossless up to [`MAX_TIMEOUT`]
///
/// Longer values are capped.
fn duration_from_secs(seconds: f64) -> Option<Duration> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    if seconds >= MAX_TIMEOUT.as_secs_f64() {
        return Some(MAX_TIMEOUT);
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = (seconds * 1e9).round() as u64;
    Some(Duration::from_nanos(nanos))
}

fn invalid(key: &'static str, value: &StoreValue) -> SettingsError {
    SettingsError::InvalidValue {
        key,
        value: value.to_string(),
    }
}
