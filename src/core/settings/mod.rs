//! Serial connection settings
//!
//! [`ConnectionSettings`] is the value every
//! [`Connection`](crate::core::connection::Connection) is built from. It is
//! never mutated once a connection has been opened with it; applying new
//! settings means opening a new connection and swapping it into the worker.

mod codec;

pub use codec::{
    decode, encode, load_or_default, save, with_override, SettingsError, SettingsRecord,
    SETTINGS_GROUP, SETTINGS_KEYS,
};

use std::fmt;
use std::time::Duration;

macro_rules! baud_rates {
    ($($name:ident = $value:literal),+ $(,)?) => {
        /// Standard serial baud rates
        ///
        /// Variant names follow the termios `B` prefix convention.
        #[allow(missing_docs)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum BaudRate {
            $($name),+
        }

        impl BaudRate {
            /// Every supported rate, slowest first
            pub const ALL: &'static [BaudRate] = &[$(BaudRate::$name),+];

            /// Rate in bits per second
            pub fn as_u32(self) -> u32 {
                match self {
                    $(BaudRate::$name => $value),+
                }
            }

            /// Look up a standard rate by its value
            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $($value => Some(BaudRate::$name),)+
                    _ => None,
                }
            }
        }
    };
}

baud_rates! {
    // Supported on every platform
    B50 = 50,
    B75 = 75,
    B110 = 110,
    B134 = 134,
    B150 = 150,
    B200 = 200,
    B300 = 300,
    B600 = 600,
    B1200 = 1200,
    B1800 = 1800,
    B2400 = 2400,
    B4800 = 4800,
    B9600 = 9600,
    B19200 = 19200,
    B38400 = 38400,
    B57600 = 57600,
    B115200 = 115200,
    // Extended rates, available on most adapters
    B230400 = 230400,
    B460800 = 460800,
    B500000 = 500000,
    B576000 = 576000,
    B921600 = 921600,
    B1000000 = 1000000,
    B1152000 = 1152000,
    B1500000 = 1500000,
    B2000000 = 2000000,
    B2500000 = 2500000,
    B3000000 = 3000000,
    B3500000 = 3500000,
    B4000000 = 4000000,
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Enumerations persisted by their symbolic name rather than a numeric code
macro_rules! symbolic_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $symbol:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Name used in the settings store
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $symbol),+
                }
            }

            /// Parse a stored name
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($symbol => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

symbolic_enum! {
    /// Number of data bits per character
    DataBits {
        /// 5 bits
        Five => "FIVE",
        /// 6 bits
        Six => "SIX",
        /// 7 bits
        Seven => "SEVEN",
        /// 8 bits
        Eight => "EIGHT",
    }
}

impl DataBits {
    /// Bit count
    pub fn bits(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

symbolic_enum! {
    /// Parity checking mode
    Parity {
        /// No parity bit
        None => "NONE",
        /// Even parity
        Even => "EVEN",
        /// Odd parity
        Odd => "ODD",
        /// Parity bit always 1
        Mark => "MARK",
        /// Parity bit always 0
        Space => "SPACE",
    }
}

impl Parity {
    fn letter(self) -> char {
        match self {
            Self::None => 'N',
            Self::Even => 'E',
            Self::Odd => 'O',
            Self::Mark => 'M',
            Self::Space => 'S',
        }
    }
}

symbolic_enum! {
    /// Number of stop bits
    StopBits {
        /// 1 stop bit
        One => "ONE",
        /// 1.5 stop bits
        OnePointFive => "ONE_POINT_FIVE",
        /// 2 stop bits
        Two => "TWO",
    }
}

symbolic_enum! {
    /// What one inbound read yields
    ReadingMode {
        /// A single byte
        Byte => "BYTE",
        /// Everything up to and including the next newline
        Line => "LINE",
    }
}

/// Longest timeout the settings hold
///
/// Timeouts are persisted as float seconds; up to this length they come back
/// to the exact nanosecond. The builders cap longer values to it.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

fn capped(timeout: Option<Duration>) -> Option<Duration> {
    timeout.map(|t| t.min(MAX_TIMEOUT))
}

/// Configuration for one serial connection
///
/// Timeouts left as `None` mean "blocking" (read, write) or "disabled"
/// (inter-byte); set ones are at most [`MAX_TIMEOUT`]. `exclusive` is
/// tri-state: `None` leaves the `serialport` default in place, which is
/// exclusive access on Unix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Baud rate
    pub baud_rate: BaudRate,
    /// Data bits
    pub data_bits: DataBits,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Read timeout
    pub timeout: Option<Duration>,
    /// Write timeout
    pub write_timeout: Option<Duration>,
    /// Maximum gap between two bytes of the same unit
    pub inter_byte_timeout: Option<Duration>,
    /// Software flow control (XON/XOFF)
    pub xonxoff: bool,
    /// Hardware flow control (RTS/CTS)
    pub rtscts: bool,
    /// Hardware flow control (DSR/DTR)
    pub dsrdtr: bool,
    /// Exclusive access to the device
    pub exclusive: Option<bool>,
    /// Byte or line reads
    pub reading_mode: ReadingMode,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            baud_rate: BaudRate::B9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: None,
            write_timeout: None,
            inter_byte_timeout: None,
            xonxoff: false,
            rtscts: false,
            dsrdtr: false,
            exclusive: None,
            reading_mode: ReadingMode::Line,
        }
    }
}

impl ConnectionSettings {
    /// Set baud rate
    #[must_use]
    pub fn baud_rate(mut self, baud_rate: BaudRate) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Set read timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = capped(timeout);
        self
    }

    /// Set write timeout
    #[must_use]
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = capped(timeout);
        self
    }

    /// Set inter-byte timeout
    #[must_use]
    pub fn inter_byte_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inter_byte_timeout = capped(timeout);
        self
    }

    /// Copy with every timeout capped to [`MAX_TIMEOUT`]
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.timeout = capped(self.timeout);
        self.write_timeout = capped(self.write_timeout);
        self.inter_byte_timeout = capped(self.inter_byte_timeout);
        self
    }

    /// Set exclusive access
    #[must_use]
    pub fn exclusive(mut self, exclusive: Option<bool>) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Set reading mode
    #[must_use]
    pub fn reading_mode(mut self, mode: ReadingMode) -> Self {
        self.reading_mode = mode;
        self
    }
}

impl fmt::Display for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        write!(
            f,
            "{} baud {}{}{}",
            self.baud_rate,
            self.data_bits.bits(),
            self.parity.letter(),
            stop
        )?;
        let flow = match (self.rtscts, self.xonxoff, self.dsrdtr) {
            (false, false, false) => "no FC",
            (true, _, _) => "RTS/CTS",
            (false, true, _) => "XON/XOFF",
            (false, false, true) => "DSR/DTR",
        };
        write!(f, " ({flow}, {})", self.reading_mode.name().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.baud_rate, BaudRate::B9600);
        assert_eq!(settings.data_bits, DataBits::Eight);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.stop_bits, StopBits::One);
        assert_eq!(settings.timeout, None);
        assert_eq!(settings.exclusive, None);
        assert!(!settings.xonxoff && !settings.rtscts && !settings.dsrdtr);
    }

    #[test]
    fn test_baud_lookup() {
        assert_eq!(BaudRate::from_u32(115_200), Some(BaudRate::B115200));
        assert_eq!(BaudRate::from_u32(12_345), None);
        assert!(BaudRate::ALL.windows(2).all(|w| w[0].as_u32() < w[1].as_u32()));
        for rate in BaudRate::ALL {
            assert_eq!(BaudRate::from_u32(rate.as_u32()), Some(*rate));
        }
    }

    #[test]
    fn test_symbolic_names() {
        assert_eq!(StopBits::OnePointFive.name(), "ONE_POINT_FIVE");
        assert_eq!(Parity::from_name("MARK"), Some(Parity::Mark));
        assert_eq!(Parity::from_name("mark"), None);
        assert_eq!(DataBits::from_name("SEVEN").map(DataBits::bits), Some(7));
    }

    #[test]
    fn test_display() {
        let settings = ConnectionSettings::default()
            .baud_rate(BaudRate::B115200)
            .parity(Parity::Even)
            .reading_mode(ReadingMode::Byte);
        assert_eq!(settings.to_string(), "115200 baud 8E1 (no FC, byte)");
    }
}
