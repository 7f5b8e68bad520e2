//! Text handling at the edges of the worker
//!
//! Inbound units are decoded as UTF-8. Invalid sequences are never fatal:
//! the worker substitutes U+FFFD and keeps going. Outbound lines get the
//! operator's chosen line ending appended.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inbound bytes are not valid UTF-8
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid UTF-8 after {valid_up_to} of {len} bytes")]
pub struct DecodeError {
    /// Length of the valid prefix
    pub valid_up_to: usize,
    /// Length of the whole unit
    pub len: usize,
}

/// Strictly decode one inbound unit
pub fn decode_unit(bytes: &[u8]) -> Result<String, DecodeError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| DecodeError {
            valid_up_to: e.valid_up_to(),
            len: bytes.len(),
        })
}

/// Decode one inbound unit, replacing invalid sequences with U+FFFD
pub fn decode_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Line ending appended to outbound lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineEnding {
    /// Send the text as typed
    None,
    /// Line Feed only
    #[default]
    Lf,
    /// Carriage Return only
    Cr,
    /// Both CR and LF
    CrLf,
}

impl LineEnding {
    /// Get the terminator for this line ending
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Lf => "\n",
            Self::Cr => "\r",
            Self::CrLf => "\r\n",
        }
    }

    /// Append the terminator to `text`
    pub fn apply(self, text: &str) -> String {
        let mut line = String::with_capacity(text.len() + 2);
        line.push_str(text);
        line.push_str(self.as_str());
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid() {
        assert_eq!(decode_unit(b"hello\n").unwrap(), "hello\n");
        assert_eq!(decode_unit("zaż\n".as_bytes()).unwrap(), "zaż\n");
    }

    #[test]
    fn test_decode_invalid() {
        let err = decode_unit(&[b'o', b'k', 0xff, b'\n']).unwrap_err();
        assert_eq!(err, DecodeError { valid_up_to: 2, len: 4 });
        assert_eq!(decode_lossy(&[b'o', b'k', 0xff, b'\n']), "ok\u{fffd}\n");
    }

    #[test]
    fn test_line_endings() {
        assert_eq!(LineEnding::None.apply("AT"), "AT");
        assert_eq!(LineEnding::Lf.apply("AT"), "AT\n");
        assert_eq!(LineEnding::Cr.apply("AT"), "AT\r");
        assert_eq!(LineEnding::CrLf.apply("AT"), "AT\r\n");
    }
}
