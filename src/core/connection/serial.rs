//! Serial device connection

use super::{Connection, ConnectionError};
use crate::core::settings::{ConnectionSettings, DataBits, Parity, ReadingMode, StopBits};
use serialport::{FlowControl, SerialPort, SerialPortBuilder};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound for a single `read()` call, whatever the settings say
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest a write may go without progress when no write timeout is set
pub const WRITE_STALL_LIMIT: Duration = Duration::from_secs(1);

/// Timeout of one port-level read or write
const PORT_SLICE: Duration = Duration::from_millis(20);

/// Partial line length at which the buffer is handed out as a unit
const MAX_PENDING: usize = 64 * 1024;

const LINE_CHUNK: usize = 256;

/// Connection to a serial device
///
/// Reads never block longer than [`READ_POLL_INTERVAL`], even with a
/// "blocking" read timeout. In line mode bytes received so far are kept
/// across calls until the line completes, so the consumer still only sees
/// whole lines. A partial line is handed out once the configured read
/// timeout has passed since the line started, or once the gap since the last
/// byte exceeds the inter-byte timeout.
pub struct RealConnection {
    device: String,
    settings: ConnectionSettings,
    port: Box<dyn SerialPort>,
    pending: Vec<u8>,
    unit_started: Option<Instant>,
    last_byte_at: Option<Instant>,
}

impl RealConnection {
    /// Open `device` with `settings`
    pub fn open(device: &str, settings: ConnectionSettings) -> Result<Self, ConnectionError> {
        let data_bits = match settings.data_bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        };

        let parity = match settings.parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Mark | Parity::Space => {
                return Err(unsupported(device, format!("{} parity", settings.parity)));
            }
        };

        let stop_bits = match settings.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
            StopBits::OnePointFive => return Err(unsupported(device, "1.5 stop bits".into())),
        };

        let builder = serialport::new(device, settings.baud_rate.as_u32())
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow_control(device, &settings))
            .timeout(port_timeout(&settings));

        let mut port = open_port(builder, device, settings.exclusive)?;

        if settings.dsrdtr {
            warn!(device, "DSR/DTR flow control is not available, asserting DTR only");
            port.write_data_terminal_ready(true)
                .map_err(|e| open_error(device, &e))?;
        }

        info!(device, settings = %settings, "serial device opened");

        Ok(Self::from_port(device.to_string(), settings, port))
    }

    /// Wrap a port that is already open and configured
    fn from_port(device: String, settings: ConnectionSettings, port: Box<dyn SerialPort>) -> Self {
        Self {
            device,
            settings,
            port,
            pending: Vec::new(),
            unit_started: None,
            last_byte_at: None,
        }
    }

    /// Device identifier
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Settings the device was opened with
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    fn read_byte(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let deadline = Instant::now() + READ_POLL_INTERVAL;
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(n) if n > 0 => return Ok(vec![byte[0]]),
                Ok(_) => {}
                Err(e) if is_retryable(&e) => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
        }
    }

    fn read_line(&mut self) -> Result<Vec<u8>, ConnectionError> {
        if let Some(line) = self.take_line() {
            return Ok(line);
        }

        let deadline = Instant::now() + READ_POLL_INTERVAL;
        let started = *self.unit_started.get_or_insert_with(Instant::now);
        let mut chunk = [0u8; LINE_CHUNK];

        loop {
            match self.port.read(&mut chunk) {
                Ok(n) if n > 0 => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    self.last_byte_at = Some(Instant::now());
                }
                Ok(_) => {}
                Err(e) if is_retryable(&e) => {}
                Err(e) => return Err(e.into()),
            }

            if let Some(line) = self.take_line() {
                return Ok(line);
            }

            let now = Instant::now();
            if self.unit_expired(started, now) {
                return Ok(self.take_partial());
            }
            if now >= deadline {
                return Ok(Vec::new());
            }
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let rest = self.pending.split_off(end + 1);
        let line = std::mem::replace(&mut self.pending, rest);
        self.unit_started = None;
        Some(line)
    }

    fn take_partial(&mut self) -> Vec<u8> {
        self.unit_started = None;
        std::mem::take(&mut self.pending)
    }

    fn unit_expired(&self, started: Instant, now: Instant) -> bool {
        if self.pending.len() >= MAX_PENDING {
            return true;
        }
        if let Some(timeout) = self.settings.timeout {
            if now.duration_since(started) >= timeout {
                return true;
            }
        }
        match (self.settings.inter_byte_timeout, self.last_byte_at) {
            (Some(gap), Some(last)) if !self.pending.is_empty() => now.duration_since(last) >= gap,
            _ => false,
        }
    }
}

impl Connection for RealConnection {
    fn read(&mut self) -> Result<Vec<u8>, ConnectionError> {
        match self.settings.reading_mode {
            ReadingMode::Byte => self.read_byte(),
            ReadingMode::Line => self.read_line(),
        }
    }

    /// Write `text` in full
    ///
    /// With a write timeout the whole write must finish within it. Without
    /// one the write fails once no byte has gone out for
    /// [`WRITE_STALL_LIMIT`]. Writes go straight to the device, there is no
    /// drain afterwards.
    fn send(&mut self, text: &str) -> Result<(), ConnectionError> {
        let data = text.as_bytes();
        let started = Instant::now();
        let mut last_progress = started;
        let mut written = 0;

        while written < data.len() {
            match self.port.write(&data[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    written += n;
                    last_progress = Instant::now();
                }
                Err(e) if is_retryable(&e) => {}
                Err(e) => return Err(e.into()),
            }
            if written < data.len() {
                let now = Instant::now();
                let expired = match self.settings.write_timeout {
                    Some(limit) => now.duration_since(started) >= limit,
                    None => now.duration_since(last_progress) >= WRITE_STALL_LIMIT,
                };
                if expired {
                    warn!(device = %self.device, written, total = data.len(), "write timed out");
                    return Err(ConnectionError::WriteTimeout(
                        self.settings.write_timeout.unwrap_or(WRITE_STALL_LIMIT),
                    ));
                }
            }
        }

        debug!(device = %self.device, bytes = data.len(), "data sent");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} @ {}", self.device, self.settings)
    }
}

fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn port_timeout(settings: &ConnectionSettings) -> Duration {
    let mut slice = PORT_SLICE;
    for limit in [settings.timeout, settings.inter_byte_timeout].into_iter().flatten() {
        slice = slice.min(limit);
    }
    slice.max(Duration::from_millis(1))
}

fn flow_control(device: &str, settings: &ConnectionSettings) -> FlowControl {
    match (settings.rtscts, settings.xonxoff) {
        (true, true) => {
            warn!(device, "both RTS/CTS and XON/XOFF requested, using RTS/CTS");
            FlowControl::Hardware
        }
        (true, false) => FlowControl::Hardware,
        (false, true) => FlowControl::Software,
        (false, false) => FlowControl::None,
    }
}

#[cfg(unix)]
fn open_port(
    builder: SerialPortBuilder,
    device: &str,
    exclusive: Option<bool>,
) -> Result<Box<dyn SerialPort>, ConnectionError> {
    use std::os::unix::io::AsRawFd;

    let mut port = builder.open_native().map_err(|e| open_error(device, &e))?;
    if let Some(exclusive) = exclusive {
        port.set_exclusive(exclusive)
            .map_err(|e| open_error(device, &e))?;
    }
    set_nonblocking(port.as_raw_fd()).map_err(|e| ConnectionError::OpenFailed {
        device: device.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Box::new(port))
}

/// Put the descriptor in non-blocking mode
///
/// A blocking tty write waits in the kernel until every byte fits, which a
/// stalled peer may never allow.
#[cfg(unix)]
fn set_nonblocking(fd: std::os::unix::io::RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor owned by an open port
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn open_port(
    builder: SerialPortBuilder,
    device: &str,
    exclusive: Option<bool>,
) -> Result<Box<dyn SerialPort>, ConnectionError> {
    if exclusive == Some(false) {
        warn!(device, "shared access is not available on this platform");
    }
    builder.open().map_err(|e| open_error(device, &e))
}

fn open_error(device: &str, err: &serialport::Error) -> ConnectionError {
    match err.kind() {
        // flock and TIOCEXCL conflicts both surface as NoDevice
        serialport::ErrorKind::NoDevice => ConnectionError::Busy(device.to_string()),
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            ConnectionError::DeviceNotFound(device.to_string())
        }
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            ConnectionError::PermissionDenied(device.to_string())
        }
        _ => ConnectionError::OpenFailed {
            device: device.to_string(),
            reason: err.to_string(),
        },
    }
}

fn unsupported(device: &str, setting: String) -> ConnectionError {
    ConnectionError::Unsupported {
        device: device.to_string(),
        setting,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device() {
        let result = RealConnection::open(
            "/dev/serialview-does-not-exist",
            ConnectionSettings::default(),
        );
        assert!(matches!(
            result,
            Err(ConnectionError::DeviceNotFound(_) | ConnectionError::OpenFailed { .. })
        ));
    }

    #[test]
    fn test_unsupported_settings_fail_before_open() {
        let settings = ConnectionSettings::default().stop_bits(StopBits::OnePointFive);
        assert!(matches!(
            RealConnection::open("/dev/serialview-does-not-exist", settings),
            Err(ConnectionError::Unsupported { .. })
        ));

        let settings = ConnectionSettings::default().parity(Parity::Mark);
        assert!(matches!(
            RealConnection::open("/dev/serialview-does-not-exist", settings),
            Err(ConnectionError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_port_timeout_is_bounded() {
        let settings = ConnectionSettings::default();
        assert_eq!(port_timeout(&settings), PORT_SLICE);

        let settings = ConnectionSettings::default().timeout(Some(Duration::from_millis(5)));
        assert_eq!(port_timeout(&settings), Duration::from_millis(5));

        let settings = ConnectionSettings::default().timeout(Some(Duration::ZERO));
        assert_eq!(port_timeout(&settings), Duration::from_millis(1));
    }

    #[test]
    fn test_busy_maps_from_no_device() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "in use");
        assert!(matches!(
            open_error("/dev/ttyUSB0", &err),
            ConnectionError::Busy(device) if device == "/dev/ttyUSB0"
        ));

        let err =
            serialport::Error::new(serialport::ErrorKind::Io(io::ErrorKind::NotFound), "gone");
        assert!(matches!(
            open_error("/dev/ttyUSB0", &err),
            ConnectionError::DeviceNotFound(_)
        ));
    }

    #[cfg(target_os = "linux")]
    mod pty {
        use super::*;
        use serialport::TTYPort;
        use std::os::unix::io::AsRawFd;
        use std::thread;

        // `TTYPort::pair` is not safe to call concurrently
        static PAIR_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

        fn pair() -> (TTYPort, TTYPort) {
            let _guard = PAIR_LOCK.lock();
            TTYPort::pair().expect("pty pair")
        }

        /// Connection on the slave side, plus the master to feed it
        fn connect(settings: ConnectionSettings) -> (TTYPort, RealConnection) {
            let (master, mut slave) = pair();
            slave.set_timeout(port_timeout(&settings)).unwrap();
            set_nonblocking(slave.as_raw_fd()).unwrap();
            let conn = RealConnection::from_port("pty".into(), settings, Box::new(slave));
            (master, conn)
        }

        fn read_until_data(conn: &mut RealConnection, within: Duration) -> Vec<u8> {
            let deadline = Instant::now() + within;
            loop {
                let unit = conn.read().unwrap();
                if !unit.is_empty() || Instant::now() >= deadline {
                    return unit;
                }
            }
        }

        #[test]
        fn test_partial_line_is_carried() {
            let (mut master, mut conn) = connect(ConnectionSettings::default());

            master.write_all(b"abc").unwrap();
            assert!(conn.read().unwrap().is_empty());
            assert!(conn.read().unwrap().is_empty());

            master.write_all(b"def\nxy\n").unwrap();
            assert_eq!(read_until_data(&mut conn, Duration::from_secs(2)), b"abcdef\n");
            assert_eq!(read_until_data(&mut conn, Duration::from_secs(2)), b"xy\n");
        }

        #[test]
        fn test_read_returns_within_poll_interval() {
            let (_master, mut conn) = connect(ConnectionSettings::default());

            let started = Instant::now();
            assert!(conn.read().unwrap().is_empty());
            assert!(started.elapsed() < READ_POLL_INTERVAL * 3);
        }

        #[test]
        fn test_read_timeout_hands_out_partial_line() {
            let settings = ConnectionSettings::default().timeout(Some(Duration::from_millis(50)));
            let (mut master, mut conn) = connect(settings);

            master.write_all(b"partial").unwrap();
            assert_eq!(read_until_data(&mut conn, Duration::from_secs(2)), b"partial");
            assert!(conn.read().unwrap().is_empty());
        }

        #[test]
        fn test_inter_byte_gap_hands_out_partial_line() {
            let settings =
                ConnectionSettings::default().inter_byte_timeout(Some(Duration::from_millis(30)));
            let (mut master, mut conn) = connect(settings);

            master.write_all(b"ab").unwrap();
            assert_eq!(read_until_data(&mut conn, Duration::from_secs(2)), b"ab");
        }

        #[test]
        fn test_long_line_is_cut_at_max_pending() {
            let (mut master, mut conn) = connect(ConnectionSettings::default());
            master.set_timeout(Duration::from_secs(5)).unwrap();

            let writer = thread::spawn(move || {
                master.write_all(&vec![b'a'; MAX_PENDING + 10]).unwrap();
                master
            });

            let unit = read_until_data(&mut conn, Duration::from_secs(10));
            assert!(unit.len() >= MAX_PENDING);
            assert!(!unit.contains(&b'\n'));

            let _master = writer.join().unwrap();
        }

        #[test]
        fn test_byte_mode_reads_one_byte() {
            let settings = ConnectionSettings::default().reading_mode(ReadingMode::Byte);
            let (mut master, mut conn) = connect(settings);

            master.write_all(b"hi").unwrap();
            assert_eq!(read_until_data(&mut conn, Duration::from_secs(2)), b"h");
            assert_eq!(read_until_data(&mut conn, Duration::from_secs(2)), b"i");
            assert!(conn.read().unwrap().is_empty());
        }

        #[test]
        fn test_stalled_write_times_out() {
            let (_master, mut conn) = connect(ConnectionSettings::default());

            let started = Instant::now();
            let result = conn.send(&"x".repeat(1 << 20));
            assert!(matches!(
                result,
                Err(ConnectionError::WriteTimeout(limit)) if limit == WRITE_STALL_LIMIT
            ));
            assert!(started.elapsed() < WRITE_STALL_LIMIT * 5);
        }

        #[test]
        fn test_write_timeout_bounds_whole_write() {
            let limit = Duration::from_millis(200);
            let settings = ConnectionSettings::default().write_timeout(Some(limit));
            let (_master, mut conn) = connect(settings);

            let started = Instant::now();
            let result = conn.send(&"x".repeat(1 << 20));
            assert!(matches!(result, Err(ConnectionError::WriteTimeout(d)) if d == limit));
            assert!(started.elapsed() < WRITE_STALL_LIMIT);
        }

        #[test]
        fn test_second_opener_is_busy() {
            let (_master, slave) = pair();
            let name = slave.name().unwrap();

            let _first = RealConnection::open(&name, ConnectionSettings::default()).unwrap();
            assert!(matches!(
                RealConnection::open(&name, ConnectionSettings::default()),
                Err(ConnectionError::Busy(device)) if device == name
            ));
        }
    }
}
