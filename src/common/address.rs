// src/common/address.rs

use super::error::Sdi12Error;
use core::convert::TryFrom;
use core::fmt;

/// Returns `true` when `c` is a valid sensor address byte.
///
/// The v1.4 alphabet is `'0'..='9' | 'A'..='Z' | 'a'..='z'` — 62 of the
/// 128 7-bit ASCII symbols. Everything else, including the `'?'` query
/// wildcard, is invalid as a device address.
#[inline]
pub const fn is_valid_address(c: u8) -> bool {
    matches!(c, b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z')
}

/// A validated SDI-12 sensor address.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Sdi12Addr(char);

impl Sdi12Addr {
    pub const DEFAULT_ADDRESS: Sdi12Addr = Sdi12Addr('0');

    /// Creates a new `Sdi12Addr` if the given character is a valid address.
    pub fn new(address_char: char) -> Result<Self, Sdi12Error> {
        if address_char.is_ascii() && is_valid_address(address_char as u8) {
            Ok(Sdi12Addr(address_char))
        } else {
            Err(Sdi12Error::InvalidAddress(address_char))
        }
    }

    #[inline]
    pub const fn as_char(&self) -> char {
        self.0
    }

    /// The address as the single byte that appears on the wire.
    #[inline]
    pub const fn as_byte(&self) -> u8 {
        self.0 as u8
    }

    /// `true` for the ten standard addresses `'0'..='9'`.
    #[inline]
    pub const fn is_standard(&self) -> bool {
        matches!(self.0, '0'..='9')
    }

    /// `true` for the extended alphabetic addresses.
    #[inline]
    pub const fn is_extended(&self) -> bool {
        matches!(self.0, 'a'..='z' | 'A'..='Z')
    }
}

impl Default for Sdi12Addr {
    fn default() -> Self {
        Self::DEFAULT_ADDRESS
    }
}

impl TryFrom<char> for Sdi12Addr {
    type Error = Sdi12Error;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<u8> for Sdi12Addr {
    type Error = Sdi12Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value as char)
    }
}

impl From<Sdi12Addr> for char {
    fn from(value: Sdi12Addr) -> Self {
        value.0
    }
}

impl fmt::Display for Sdi12Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
