// src/sensor/format.rs

//! Response assembly for the sensor engine.
//!
//! All routines write into the caller's buffer and return the total
//! response length. Lengths are explicit throughout — binary payloads
//! may contain NUL bytes, so nothing here relies on terminators.

use crate::common::crc;
use crate::common::error::Sdi12Error;
use crate::common::types::{MeasurementType, VALUE_MAX_CHARS};
use crate::common::value::{put_decimal_padded, Sdi12Value};

/// Bounds-checked copy of `bytes` into `buf` at `pos`.
pub(crate) fn put_bytes(buf: &mut [u8], pos: usize, bytes: &[u8]) -> Result<usize, Sdi12Error> {
    let end = pos + bytes.len();
    if end > buf.len() {
        return Err(Sdi12Error::BufferOverflow { needed: end, got: buf.len() });
    }
    buf[pos..end].copy_from_slice(bytes);
    Ok(end)
}

/// Writes `text` space-padded on the right to exactly `width` bytes.
pub(crate) fn put_padded(
    buf: &mut [u8],
    pos: usize,
    text: &str,
    width: usize,
) -> Result<usize, Sdi12Error> {
    let bytes = text.as_bytes();
    let used = bytes.len().min(width);
    let mut pos = put_bytes(buf, pos, &bytes[..used])?;
    for _ in used..width {
        pos = put_bytes(buf, pos, b" ")?;
    }
    Ok(pos)
}

/// Appends `CR LF` at `pos`, returning the new length.
pub(crate) fn append_crlf(buf: &mut [u8], pos: usize) -> Result<usize, Sdi12Error> {
    if pos + 2 > buf.len() {
        return Err(Sdi12Error::BufferOverflow { needed: pos + 2, got: buf.len() });
    }
    buf[pos] = b'\r';
    buf[pos + 1] = b'\n';
    Ok(pos + 2)
}

/// Terminates a response at `pos`: ASCII CRC first when requested,
/// then `CR LF`.
pub(crate) fn terminate(buf: &mut [u8], pos: usize, with_crc: bool) -> Result<usize, Sdi12Error> {
    if with_crc {
        crc::append_ascii(buf, pos)
    } else {
        append_crlf(buf, pos)
    }
}

/// Like [`terminate`] but the CRC covers exactly `pos` bytes. Required
/// when the response carries raw binary content: a payload ending in
/// `0x0D 0x0A` must not be mistaken for an existing terminator.
pub(crate) fn terminate_exact(
    buf: &mut [u8],
    pos: usize,
    with_crc: bool,
) -> Result<usize, Sdi12Error> {
    if with_crc {
        crc::append_ascii_exact(buf, pos)
    } else {
        append_crlf(buf, pos)
    }
}

/// Formats a measurement header: address, 3-digit `ttt`, then the count
/// in the width the measurement family dictates, saturated to the field
/// ceiling. Returns the full response length including `CR LF`.
pub(crate) fn write_header(
    buf: &mut [u8],
    addr: u8,
    ttt: u16,
    count: u16,
    kind: MeasurementType,
) -> Result<usize, Sdi12Error> {
    if buf.is_empty() {
        return Err(Sdi12Error::BufferOverflow { needed: 1, got: 0 });
    }
    buf[0] = addr;
    let mut pos = put_decimal_padded(buf, 1, u64::from(ttt.min(999)), 3)?;
    pos = put_decimal_padded(
        buf,
        pos,
        u64::from(count.min(kind.max_count())),
        kind.count_digits(),
    )?;
    append_crlf(buf, pos)
}

/// Formats the requested ASCII data page.
///
/// The cache is walked in order, assigning each formatted value to a
/// page: a value that would push the current page's value region past
/// `budget` starts the next page. Only the slice belonging to `page`
/// is emitted. An out-of-range page yields an address-only response,
/// CRC'd like any other when `with_crc` is set.
pub(crate) fn format_data_page(
    buf: &mut [u8],
    addr: u8,
    values: &[Sdi12Value],
    page: u16,
    budget: usize,
    with_crc: bool,
) -> Result<usize, Sdi12Error> {
    if buf.is_empty() {
        return Err(Sdi12Error::BufferOverflow { needed: 1, got: 0 });
    }
    buf[0] = addr;
    let mut pos = 1;

    let mut current_page: u16 = 0;
    let mut page_used = 0usize;

    for value in values {
        let mut token = [0u8; VALUE_MAX_CHARS + 3];
        let token_len = value.format_into(&mut token)?;

        if page_used + token_len > budget && page_used > 0 {
            current_page += 1;
            page_used = 0;
        }
        if current_page > page {
            break;
        }
        if current_page == page {
            if pos + token_len > buf.len().saturating_sub(5) {
                // No room for the token plus CRC and terminator.
                return Err(Sdi12Error::BufferOverflow {
                    needed: pos + token_len + 5,
                    got: buf.len(),
                });
            }
            buf[pos..pos + token_len].copy_from_slice(&token[..token_len]);
            pos += token_len;
        }
        page_used += token_len;
    }

    terminate(buf, pos, with_crc)
}

/// Builds the six-byte empty binary packet: zero payload size, type 0,
/// CRC over the four header bytes.
pub(crate) fn empty_binary_packet(buf: &mut [u8], addr: u8) -> Result<usize, Sdi12Error> {
    if buf.len() < 6 {
        return Err(Sdi12Error::BufferOverflow { needed: 6, got: buf.len() });
    }
    buf[0] = addr;
    buf[1] = 0;
    buf[2] = 0;
    buf[3] = 0;
    let c = crc::crc16(&buf[..4]);
    buf[4..6].copy_from_slice(&crc::encode_binary(c));
    Ok(6)
}

/// Seals a binary packet whose type byte and payload were written at
/// `buf[3..3 + written]` by the host's formatter hook. Fills in the
/// little-endian payload size and the trailing CRC; returns the packet
/// length.
pub(crate) fn seal_binary_packet(
    buf: &mut [u8],
    addr: u8,
    written: usize,
) -> Result<usize, Sdi12Error> {
    // `written` counts the type byte plus N payload bytes.
    let payload_len = written - 1;
    let total = 6 + payload_len;
    if total > buf.len() {
        return Err(Sdi12Error::BufferOverflow { needed: total, got: buf.len() });
    }
    buf[0] = addr;
    buf[1] = (payload_len & 0xFF) as u8;
    buf[2] = (payload_len >> 8) as u8;
    let data_end = 4 + payload_len;
    let c = crc::crc16(&buf[..data_end]);
    buf[data_end..data_end + 2].copy_from_slice(&crc::encode_binary(c));
    Ok(total)
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::response::parse_binary_packet;

    fn header(ttt: u16, count: u16, kind: MeasurementType) -> std::string::String {
        let mut buf = [0u8; 16];
        let len = write_header(&mut buf, b'0', ttt, count, kind).unwrap();
        std::str::from_utf8(&buf[..len]).unwrap().into()
    }

    #[test]
    fn test_header_widths() {
        assert_eq!(header(0, 5, MeasurementType::Standard), "00005\r\n");
        assert_eq!(header(0, 5, MeasurementType::Concurrent), "000005\r\n");
        assert_eq!(header(0, 5, MeasurementType::HighVolumeAscii), "0000005\r\n");
        assert_eq!(header(12, 3, MeasurementType::Standard), "00123\r\n");
        // High-volume header is two bytes wider than standard.
        assert_eq!(
            header(0, 5, MeasurementType::HighVolumeAscii).len(),
            header(0, 5, MeasurementType::Standard).len() + 2
        );
    }

    #[test]
    fn test_header_saturates_count() {
        assert_eq!(header(0, 25, MeasurementType::Standard), "00009\r\n");
        assert_eq!(header(0, 250, MeasurementType::Concurrent), "000099\r\n");
        assert_eq!(header(1500, 1500, MeasurementType::HighVolumeAscii), "0999999\r\n");
    }

    fn page(values: &[Sdi12Value], page_no: u16, budget: usize, crc: bool) -> std::vec::Vec<u8> {
        let mut buf = [0u8; 96];
        let len = format_data_page(&mut buf, b'0', values, page_no, budget, crc).unwrap();
        buf[..len].to_vec()
    }

    #[test]
    fn test_data_page_single_page() {
        let values = [
            Sdi12Value::new(42.0, 0),
            Sdi12Value::new(25.50, 2),
            Sdi12Value::new(101.3, 1),
            Sdi12Value::new(65.00, 2),
            Sdi12Value::new(-10.5, 1),
        ];
        assert_eq!(page(&values, 0, 35, false), b"0+42+25.50+101.3+65.00-10.5\r\n");
        // Everything fit on page 0, so page 1 is empty.
        assert_eq!(page(&values, 1, 35, false), b"0\r\n");
    }

    #[test]
    fn test_data_page_splits_at_budget() {
        // Each token is 5 chars; a 17-char budget takes three per page.
        let values = [Sdi12Value::new(1.25, 2); 7];
        assert_eq!(page(&values, 0, 17, false), b"0+1.25+1.25+1.25\r\n");
        assert_eq!(page(&values, 1, 17, false), b"0+1.25+1.25+1.25\r\n");
        assert_eq!(page(&values, 2, 17, false), b"0+1.25\r\n");
        assert_eq!(page(&values, 3, 17, false), b"0\r\n");
    }

    #[test]
    fn test_data_page_crc_adds_three_bytes() {
        let values = [Sdi12Value::new(3.14, 2)];
        let plain = page(&values, 0, 35, false);
        let with_crc = page(&values, 0, 35, true);
        assert_eq!(with_crc.len(), plain.len() + 3);
        assert!(crate::common::crc::verify_ascii(&with_crc));
    }

    #[test]
    fn test_data_page_overlong_value_keeps_own_page() {
        // A single token larger than the budget still goes out alone.
        let values = [Sdi12Value::new(1234567.0, 0), Sdi12Value::new(1.0, 0)];
        assert_eq!(page(&values, 0, 6, false), b"0+1234567\r\n");
        assert_eq!(page(&values, 1, 6, false), b"0+1\r\n");
    }

    #[test]
    fn test_empty_binary_packet_roundtrips() {
        let mut buf = [0u8; 16];
        let len = empty_binary_packet(&mut buf, b'1').unwrap();
        assert_eq!(len, 6);
        let pkt = parse_binary_packet(&buf[..len]).unwrap();
        assert!(pkt.payload.is_empty());
    }

    #[test]
    fn test_seal_binary_packet_roundtrips() {
        let mut buf = [0u8; 32];
        // Hook wrote type 4 (u16) and four payload bytes at buf[3..].
        buf[3] = 4;
        buf[4..8].copy_from_slice(&[0x10, 0x00, 0x20, 0x00]);
        let len = seal_binary_packet(&mut buf, b'2', 5).unwrap();
        assert_eq!(len, 10);
        let pkt = parse_binary_packet(&buf[..len]).unwrap();
        assert_eq!(pkt.address.as_char(), '2');
        assert_eq!(pkt.payload.as_slice(), &[0x10, 0x00, 0x20, 0x00]);
    }
}
