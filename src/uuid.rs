//! Bluetooth UUIDs identifying GATT services, characteristics and descriptors.

use core::fmt;
use std::str::FromStr;

/// A 128-bit UUID, identifying a Bluetooth service, characteristic or descriptor.
///
/// # Construction
///
/// [`Uuid::from_static`] builds a [`Uuid`] from a string at compile time, and the [`FromStr`]
/// implementation parses one at runtime. Strings produced by
/// [`Application::generate_uuid`][crate::Application::generate_uuid] parse with either.
///
/// 16-bit aliases assigned by the Bluetooth SIG are expanded with [`Uuid::from_u16`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid([u8; 16]);

impl Uuid {
    const BASE: Self = Self::from_static("00000000-0000-1000-8000-00805f9b34fb");

    /// Offsets of the `-` separators in the textual form.
    const DASHES: [usize; 4] = [8, 13, 18, 23];

    const fn parse(s: &str) -> Result<Self, ParseUuidError> {
        const fn nibble(digit: u8) -> Option<u8> {
            match digit {
                b'0'..=b'9' => Some(digit - b'0'),
                b'a'..=b'f' => Some(digit - b'a' + 10),
                b'A'..=b'F' => Some(digit - b'A' + 10),
                _ => None,
            }
        }

        let input = s.as_bytes();
        let mut out = [0; 16];
        let mut pos = 0;
        let mut byte = 0;
        while byte < out.len() {
            if pos == Self::DASHES[0]
                || pos == Self::DASHES[1]
                || pos == Self::DASHES[2]
                || pos == Self::DASHES[3]
            {
                if pos >= input.len() {
                    return Err(ParseUuidError(ErrorKind::Eof));
                }
                if input[pos] != b'-' {
                    return Err(ParseUuidError(ErrorKind::InvalidDash));
                }
                pos += 1;
                continue;
            }

            if pos + 1 >= input.len() {
                return Err(ParseUuidError(ErrorKind::Eof));
            }
            let (Some(high), Some(low)) = (nibble(input[pos]), nibble(input[pos + 1])) else {
                return Err(ParseUuidError(ErrorKind::InvalidDigit));
            };
            out[byte] = (high << 4) | low;
            byte += 1;
            pos += 2;
        }

        if pos != input.len() {
            return Err(ParseUuidError(ErrorKind::TrailingData));
        }

        Ok(Self(out))
    }

    /// Creates a [`Uuid`] from a static string, potentially at compile time.
    ///
    /// Panics if the string is invalid.
    pub const fn from_static(s: &'static str) -> Self {
        match Self::parse(s) {
            Ok(uuid) => uuid,
            Err(_) => panic!("malformed UUID"),
        }
    }

    /// Creates a [`Uuid`] from a 16-bit alias.
    pub const fn from_u16(short: u16) -> Self {
        let [hi, lo] = short.to_be_bytes();
        let mut uuid = Self::BASE;
        uuid.0[2] = hi;
        uuid.0[3] = lo;
        uuid
    }

    /// Returns the 16-bit alias of this [`Uuid`], if it has one.
    pub fn as_u16(&self) -> Option<u16> {
        let mut masked = *self;
        masked.0[2] = 0;
        masked.0[3] = 0;
        (masked == Self::BASE).then(|| u16::from_be_bytes([self.0[2], self.0[3]]))
    }
}

impl FromStr for Uuid {
    type Err = ParseUuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The error type returned by the [`FromStr`] implementation of [`Uuid`].
#[derive(Debug)]
pub struct ParseUuidError(ErrorKind);

#[derive(Debug)]
enum ErrorKind {
    Eof,
    InvalidDigit,
    InvalidDash,
    TrailingData,
}

impl fmt::Display for ParseUuidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match &self.0 {
            ErrorKind::Eof => "unexpected end of input",
            ErrorKind::InvalidDigit => "invalid hex digit",
            ErrorKind::InvalidDash => "invalid character (`-` expected)",
            ErrorKind::TrailingData => "invalid trailing data",
        };
        f.write_str(s)
    }
}

impl std::error::Error for ParseUuidError {}
