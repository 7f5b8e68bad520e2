//! Synthetic connection producing random printable data

use super::{Connection, ConnectionError};
use crate::core::settings::ReadingMode;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tracing::info;

/// Delay before each generated byte
pub const BYTE_DELAY: Duration = Duration::from_millis(10);
/// Delay before each generated line
pub const LINE_DELAY: Duration = Duration::from_millis(100);

const PRINTABLE_FIRST: u8 = 32;
const PRINTABLE_LAST: u8 = 126;
const MIN_LINE_LEN: usize = 10;
const MAX_LINE_LEN: usize = 40;

/// Stand-in for a serial device
///
/// In byte mode every read yields one printable ASCII byte or a newline.
/// In line mode every read yields 10 to 40 printable bytes and a newline.
/// Outbound data is only logged.
pub struct SyntheticConnection {
    reading_mode: ReadingMode,
    byte_delay: Duration,
    line_delay: Duration,
    rng: StdRng,
}

impl SyntheticConnection {
    /// Create a generator seeded from system entropy
    pub fn new(reading_mode: ReadingMode) -> Self {
        Self::with_rng(reading_mode, StdRng::from_entropy())
    }

    /// Create a reproducible generator
    pub fn seeded(reading_mode: ReadingMode, seed: u64) -> Self {
        Self::with_rng(reading_mode, StdRng::seed_from_u64(seed))
    }

    fn with_rng(reading_mode: ReadingMode, rng: StdRng) -> Self {
        Self {
            reading_mode,
            byte_delay: BYTE_DELAY,
            line_delay: LINE_DELAY,
            rng,
        }
    }

    /// Override the generation delays
    #[must_use]
    pub fn with_delays(mut self, byte_delay: Duration, line_delay: Duration) -> Self {
        self.byte_delay = byte_delay;
        self.line_delay = line_delay;
        self
    }

    fn printable(&mut self) -> u8 {
        self.rng.gen_range(PRINTABLE_FIRST..=PRINTABLE_LAST)
    }

    fn next_byte(&mut self) -> u8 {
        // Newline is one extra choice next to the printable range
        let choice = self.rng.gen_range(PRINTABLE_FIRST..=PRINTABLE_LAST + 1);
        if choice > PRINTABLE_LAST {
            b'\n'
        } else {
            choice
        }
    }

    fn next_line(&mut self) -> Vec<u8> {
        let len = self.rng.gen_range(MIN_LINE_LEN..=MAX_LINE_LEN);
        let mut line: Vec<u8> = (0..len).map(|_| self.printable()).collect();
        line.push(b'\n');
        line
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

impl Connection for SyntheticConnection {
    fn read(&mut self) -> Result<Vec<u8>, ConnectionError> {
        match self.reading_mode {
            ReadingMode::Byte => {
                pause(self.byte_delay);
                Ok(vec![self.next_byte()])
            }
            ReadingMode::Line => {
                pause(self.line_delay);
                Ok(self.next_line())
            }
        }
    }

    fn send(&mut self, text: &str) -> Result<(), ConnectionError> {
        info!(data = ?text.as_bytes(), "synthetic connection received outbound data");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("synthetic ({})", self.reading_mode.name().to_lowercase())
    }
}
