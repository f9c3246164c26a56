// src/common/response.rs

//! Recorder-side views of sensor responses.
//!
//! Every parser here takes the response with the address byte still in
//! place, because the CRC (when present) covers it. Lines are expected
//! with the trailing `CR LF` already trimmed; the binary packet parser
//! takes the raw unterminated packet.

use super::address::Sdi12Addr;
use super::crc;
use super::error::Sdi12Error;
use super::types::{
    truncated, BinaryDataType, Identification, MeasurementType, BIN_MAX_PAYLOAD, C_MAX_VALUES,
    ID_FIRMWARE_LEN, ID_MODEL_LEN, ID_VENDOR_LEN,
};
use super::value::Sdi12Value;
use heapless::{String, Vec};

/// Parsed `atttn` / `atttnn` / `atttnnn` measurement header.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MeasResponse {
    pub address: Sdi12Addr,
    /// Seconds until data is ready (`ttt`, 0–999).
    pub ttt_seconds: u16,
    /// Number of values the sensor will return.
    pub count: u16,
}

/// Parsed `aI!` identification response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentResponse {
    pub address: Sdi12Addr,
    /// Protocol compatibility tag, e.g. `b"14"`.
    pub version: [u8; 2],
    pub ident: Identification,
}

/// Parsed data values from a D or R response.
#[derive(Debug, Clone, PartialEq)]
pub struct DataResponse {
    pub address: Sdi12Addr,
    pub values: Vec<Sdi12Value, { C_MAX_VALUES as usize }>,
    /// True when a CRC was present and verified.
    pub crc_valid: bool,
}

/// Parsed `a,SHEF,units;` parameter metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamMetaResponse {
    pub address: Sdi12Addr,
    pub shef: String<3>,
    pub units: String<20>,
}

/// Parsed §5.2 high-volume binary packet. Construction implies the
/// trailing CRC matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPacket {
    pub address: Sdi12Addr,
    pub data_type: BinaryDataType,
    pub payload: Vec<u8, BIN_MAX_PAYLOAD>,
    pub crc_valid: bool,
}

/// Strips any trailing `CR` / `LF` bytes from a response line.
pub fn trim_crlf(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\r' || line[end - 1] == b'\n') {
        end -= 1;
    }
    &line[..end]
}

fn parse_address(line: &[u8]) -> Result<Sdi12Addr, Sdi12Error> {
    let first = *line.first().ok_or(Sdi12Error::ParseFailed)?;
    Sdi12Addr::new(first as char).map_err(|_| Sdi12Error::ParseFailed)
}

fn parse_digits(bytes: &[u8]) -> Result<u16, Sdi12Error> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(Sdi12Error::ParseFailed);
    }
    Ok(bytes.iter().fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0')))
}

/// Parses a measurement header. `kind` fixes the count-field width:
/// one digit for M/V, two for C/R, three for the high-volume family.
/// Trailing bytes beyond the header are ignored.
pub fn parse_measurement_header(
    line: &[u8],
    kind: MeasurementType,
) -> Result<MeasResponse, Sdi12Error> {
    let digits = kind.count_digits();
    if line.len() < 1 + 3 + digits {
        return Err(Sdi12Error::ParseFailed);
    }
    let address = parse_address(line)?;
    let ttt_seconds = parse_digits(&line[1..4])?;
    let count = parse_digits(&line[4..4 + digits])?;
    Ok(MeasResponse { address, ttt_seconds, count })
}

/// Parses an identification line: address, 2-char version, 8-char
/// vendor, 6-char model, 3-char firmware, then an optional serial.
pub fn parse_identification(line: &[u8]) -> Result<IdentResponse, Sdi12Error> {
    const FIXED: usize = 1 + 2 + ID_VENDOR_LEN + ID_MODEL_LEN + ID_FIRMWARE_LEN;
    if line.len() < FIXED {
        return Err(Sdi12Error::ParseFailed);
    }
    let address = parse_address(line)?;
    let version = [line[1], line[2]];

    let vendor_end = 3 + ID_VENDOR_LEN;
    let model_end = vendor_end + ID_MODEL_LEN;
    let firmware_end = model_end + ID_FIRMWARE_LEN;

    fn field(bytes: &[u8]) -> Result<&str, Sdi12Error> {
        core::str::from_utf8(bytes).map_err(|_| Sdi12Error::ParseFailed)
    }

    Ok(IdentResponse {
        address,
        version,
        ident: Identification {
            vendor: truncated(field(&line[3..vendor_end])?),
            model: truncated(field(&line[vendor_end..model_end])?),
            firmware: truncated(field(&line[model_end..firmware_end])?),
            serial: truncated(field(&line[firmware_end..])?),
        },
    })
}

/// Parses `a,SHEF,units;`. The comma and semicolon positions are
/// enforced; over-long fields are truncated to their declared widths.
pub fn parse_param_meta(line: &[u8]) -> Result<ParamMetaResponse, Sdi12Error> {
    let address = parse_address(line)?;
    if line.len() < 4 || line[1] != b',' || line[line.len() - 1] != b';' {
        return Err(Sdi12Error::ParseFailed);
    }
    let inner = &line[2..line.len() - 1];
    let comma = inner
        .iter()
        .position(|&b| b == b',')
        .ok_or(Sdi12Error::ParseFailed)?;

    fn text(bytes: &[u8]) -> Result<&str, Sdi12Error> {
        core::str::from_utf8(bytes).map_err(|_| Sdi12Error::ParseFailed)
    }
    Ok(ParamMetaResponse {
        address,
        shef: truncated(text(&inner[..comma])?),
        units: truncated(text(&inner[comma + 1..])?),
    })
}

/// Parses a complete high-volume binary packet:
/// `addr(1) size(2 LE) type(1) payload(N) crc(2 LE)`.
///
/// The CRC covers the first `4 + N` bytes; a mismatch is an error, so
/// a returned packet always has `crc_valid == true`.
pub fn parse_binary_packet(packet: &[u8]) -> Result<BinaryPacket, Sdi12Error> {
    if packet.len() < 6 {
        return Err(Sdi12Error::ParseFailed);
    }
    let address = parse_address(packet)?;
    let payload_len = usize::from(u16::from_le_bytes([packet[1], packet[2]]));
    if payload_len > BIN_MAX_PAYLOAD {
        return Err(Sdi12Error::BufferOverflow { needed: payload_len + 6, got: packet.len() });
    }
    if packet.len() != payload_len + 6 {
        return Err(Sdi12Error::ParseFailed);
    }

    let data_end = 4 + payload_len;
    let expected = crc::decode_binary(&[packet[data_end], packet[data_end + 1]]);
    let calculated = crc::crc16(&packet[..data_end]);
    if expected != calculated {
        return Err(Sdi12Error::CrcMismatch { expected, calculated });
    }

    let data_type = BinaryDataType::from_u8(packet[3]).ok_or(Sdi12Error::ParseFailed)?;
    let mut payload = Vec::new();
    payload
        .extend_from_slice(&packet[4..data_end])
        .map_err(|_| Sdi12Error::BufferOverflow { needed: payload_len, got: BIN_MAX_PAYLOAD })?;

    Ok(BinaryPacket { address, data_type, payload, crc_valid: true })
}
