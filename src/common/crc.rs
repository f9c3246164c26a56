// src/common/crc.rs

use super::error::Sdi12Error;
use crc::{Algorithm, Crc};

/// CRC algorithm required by SDI-12 v1.4 §4.4.12 (CRC-16/ARC).
///
/// Polynomial 0x8005 (0xA001 reflected), init 0x0000, reflected in/out,
/// no final XOR. Check value 0xBB3D for "123456789".
pub const SDI12_CRC: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x8005,
    init: 0x0000,
    refin: true,
    refout: true,
    xorout: 0x0000,
    check: 0xBB3D,
    residue: 0x0000,
};

const CRC_COMPUTER: Crc<u16> = Crc::<u16>::new(&SDI12_CRC);

/// Computes the SDI-12 CRC-16 over `data`.
///
/// The calculation covers everything from the address byte up to the
/// byte before the CRC itself (or before the trailing `CR LF`).
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    CRC_COMPUTER.checksum(data)
}

/// Encodes a 16-bit CRC into the three printable ASCII characters of
/// §4.4.12.2. Each output byte is `0x40 | sixbits`, so all three land
/// in `[0x40, 0x7F]` by construction.
pub fn encode_ascii(crc: u16) -> [u8; 3] {
    [
        0x40 | (crc >> 12) as u8,
        0x40 | ((crc >> 6) & 0x3F) as u8,
        0x40 | (crc & 0x3F) as u8,
    ]
}

/// Decodes three ASCII CRC characters back into the 16-bit value.
pub fn decode_ascii(chars: &[u8; 3]) -> u16 {
    (u16::from(chars[0] & 0x3F) << 12)
        | (u16::from(chars[1] & 0x3F) << 6)
        | u16::from(chars[2] & 0x3F)
}

/// Encodes a CRC as the two raw bytes (LSB first) of a binary packet.
pub fn encode_binary(crc: u16) -> [u8; 2] {
    crc.to_le_bytes()
}

/// Decodes the two little-endian CRC bytes of a binary packet.
pub fn decode_binary(bytes: &[u8; 2]) -> u16 {
    u16::from_le_bytes(*bytes)
}

/// Appends an ASCII CRC to a response held in `buf`.
///
/// `data_len` is the explicit length of the response bytes, which may
/// or may not already end in `CR LF`; the three CRC characters are
/// inserted before the terminator (appending one when missing). The
/// explicit length keeps binary payloads containing NUL bytes intact.
///
/// Returns the new total length, or `BufferOverflow` if the result
/// would not fit in `buf`.
pub fn append_ascii(buf: &mut [u8], data_len: usize) -> Result<usize, Sdi12Error> {
    if data_len > buf.len() {
        return Err(Sdi12Error::BufferOverflow { needed: data_len, got: buf.len() });
    }

    let mut data_end = data_len;
    if data_end >= 2 && buf[data_end - 2] == b'\r' && buf[data_end - 1] == b'\n' {
        data_end -= 2;
    }

    append_ascii_exact(buf, data_end)
}

/// Appends an ASCII CRC computed over exactly `data_len` bytes, then
/// `CR LF`.
///
/// Unlike [`append_ascii`] there is no terminator detection: a trailing
/// `0x0D 0x0A` in the data stays part of the CRC input. Use this when
/// raw binary payloads are framed as text responses — any byte pair in
/// the payload may coincide with `CR LF`.
pub fn append_ascii_exact(buf: &mut [u8], data_len: usize) -> Result<usize, Sdi12Error> {
    let needed = data_len + 3 + 2;
    if data_len > buf.len() || needed > buf.len() {
        return Err(Sdi12Error::BufferOverflow { needed, got: buf.len() });
    }

    let encoded = encode_ascii(crc16(&buf[..data_len]));
    buf[data_len..data_len + 3].copy_from_slice(&encoded);
    buf[data_len + 3] = b'\r';
    buf[data_len + 4] = b'\n';
    Ok(needed)
}

/// Checks the ASCII CRC of a received response.
///
/// Expects the three CRC characters immediately before the optional
/// `CR LF` terminator. Inputs shorter than six bytes never verify.
pub fn verify_ascii(buf: &[u8]) -> bool {
    check_ascii(buf).is_ok()
}

/// Like [`verify_ascii`] but reports the mismatching values.
pub fn check_ascii(buf: &[u8]) -> Result<(), Sdi12Error> {
    if buf.len() < 6 {
        return Err(Sdi12Error::ParseFailed);
    }

    let mut end = buf.len();
    if buf[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && buf[end - 1] == b'\r' {
        end -= 1;
    }
    if end < 4 {
        return Err(Sdi12Error::ParseFailed);
    }

    let data_end = end - 3;
    let received = decode_ascii(&[buf[data_end], buf[data_end + 1], buf[data_end + 2]]);
    let calculated = crc16(&buf[..data_end]);

    if received == calculated {
        Ok(())
    } else {
        Err(Sdi12Error::CrcMismatch { expected: received, calculated })
    }
}
