// src/common/command.rs

use super::address::Sdi12Addr;
use super::error::Sdi12Error;
use super::types::MeasurementType;

/// Which device a command is aimed at.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Target {
    /// A specific sensor address.
    Device(Sdi12Addr),
    /// The `?` wildcard, matched by every sensor.
    Query,
}

/// Identify-measurement metadata request (`aI{M,C,V,HA,HB,R}[g][_nnn]!`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MetaRequest {
    /// Which measurement family the query describes.
    pub target: MeasurementType,
    /// Group (M/C) or index (R); 0 for V/HA/HB.
    pub group: u8,
    /// `C` infix present (M/C/R families only).
    pub crc: bool,
    /// 1-based parameter number from the `_nnn` suffix, if present.
    pub param: Option<u16>,
}

/// The closed set of SDI-12 v1.4 commands.
///
/// `Extended` borrows the manufacturer-defined body (everything after
/// `aX`, without the `!`) straight from the input buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CommandKind<'a> {
    /// `a!`
    Acknowledge,
    /// `?!`
    AddressQuery,
    /// `aI!`
    Identify,
    /// `aM!`, `aMg!`, `aMC!`, `aMCg!`
    Measure { crc: bool, group: u8 },
    /// `aC!`, `aCg!`, `aCC!`, `aCCg!`
    Concurrent { crc: bool, group: u8 },
    /// `aV!`
    Verify,
    /// `aHA!`, `aHAC!`, `aHB!`, `aHBC!`
    HighVolume { binary: bool, crc: bool },
    /// `aH!` — stub reply for sensors without high-volume support.
    HighVolumeStub,
    /// `aD0!`..`aD999!`
    SendData { page: u16 },
    /// `aDB0!`..`aDB999!`
    SendBinary { page: u16 },
    /// `aR0!`..`aR9!`, `aRC0!`..`aRC9!`
    Continuous { crc: bool, index: u8 },
    /// `aAb!`
    ChangeAddress { new_address: Sdi12Addr },
    /// `aI{M,C,V,HA,HB,R}…!`
    IdentifyMeasurement(MetaRequest),
    /// `aX…!`
    Extended { body: &'a [u8] },
}

/// A parsed command: who it addresses and what it asks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Command<'a> {
    pub target: Target,
    pub kind: CommandKind<'a>,
}

impl<'a> Command<'a> {
    /// Builds a command addressed to a specific sensor.
    pub fn to_device(address: Sdi12Addr, kind: CommandKind<'a>) -> Self {
        Command { target: Target::Device(address), kind }
    }

    /// The `?!` address query.
    pub fn address_query() -> Self {
        Command { target: Target::Query, kind: CommandKind::AddressQuery }
    }

    /// Parses raw command bytes. The trailing `!` may be present or
    /// already stripped by the host's framing layer.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, Sdi12Error> {
        let bytes = match bytes {
            [head @ .., b'!'] => head,
            other => other,
        };
        if bytes.is_empty() {
            return Err(Sdi12Error::InvalidCommand);
        }
        if bytes == b"?" {
            return Ok(Command::address_query());
        }

        let address = Sdi12Addr::new(bytes[0] as char)?;
        let kind = parse_body(&bytes[1..])?;
        Ok(Command::to_device(address, kind))
    }

    /// Writes the wire form (`…!` included) into `buf`, returning its
    /// length. This is the inverse of [`Command::parse`] and what the
    /// recorder transmits.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, Sdi12Error> {
        let mut w = Writer { buf, pos: 0 };
        match self.target {
            Target::Query => {
                if !matches!(self.kind, CommandKind::AddressQuery) {
                    return Err(Sdi12Error::InvalidCommand);
                }
                w.push(b'?')?;
            }
            Target::Device(addr) => {
                w.push(addr.as_byte())?;
                encode_body(&self.kind, &mut w)?;
            }
        }
        w.push(b'!')?;
        Ok(w.pos)
    }
}

struct Writer<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn push(&mut self, byte: u8) -> Result<(), Sdi12Error> {
        if self.pos >= self.buf.len() {
            return Err(Sdi12Error::BufferOverflow { needed: self.pos + 1, got: self.buf.len() });
        }
        self.buf[self.pos] = byte;
        self.pos += 1;
        Ok(())
    }

    fn push_all(&mut self, bytes: &[u8]) -> Result<(), Sdi12Error> {
        for &b in bytes {
            self.push(b)?;
        }
        Ok(())
    }

    fn push_decimal(&mut self, value: u16) -> Result<(), Sdi12Error> {
        if value >= 100 {
            self.push(b'0' + (value / 100) as u8)?;
        }
        if value >= 10 {
            self.push(b'0' + (value / 10 % 10) as u8)?;
        }
        self.push(b'0' + (value % 10) as u8)
    }
}

fn encode_body(kind: &CommandKind<'_>, w: &mut Writer<'_>) -> Result<(), Sdi12Error> {
    match *kind {
        CommandKind::Acknowledge => Ok(()),
        CommandKind::AddressQuery => Err(Sdi12Error::InvalidCommand),
        CommandKind::Identify => w.push(b'I'),
        CommandKind::Verify => w.push(b'V'),
        CommandKind::HighVolumeStub => w.push(b'H'),
        CommandKind::Measure { crc, group } => encode_measure(w, b'M', crc, group),
        CommandKind::Concurrent { crc, group } => encode_measure(w, b'C', crc, group),
        CommandKind::HighVolume { binary, crc } => {
            w.push(b'H')?;
            w.push(if binary { b'B' } else { b'A' })?;
            if crc {
                w.push(b'C')?;
            }
            Ok(())
        }
        CommandKind::SendData { page } => {
            w.push(b'D')?;
            w.push_decimal(page.min(999))
        }
        CommandKind::SendBinary { page } => {
            w.push_all(b"DB")?;
            w.push_decimal(page.min(999))
        }
        CommandKind::Continuous { crc, index } => {
            w.push(b'R')?;
            if crc {
                w.push(b'C')?;
            }
            w.push(b'0' + index.min(9))
        }
        CommandKind::ChangeAddress { new_address } => {
            w.push(b'A')?;
            w.push(new_address.as_byte())
        }
        CommandKind::IdentifyMeasurement(req) => encode_meta(w, &req),
        CommandKind::Extended { body } => {
            w.push(b'X')?;
            w.push_all(body)
        }
    }
}

fn encode_measure(w: &mut Writer<'_>, letter: u8, crc: bool, group: u8) -> Result<(), Sdi12Error> {
    w.push(letter)?;
    if crc {
        w.push(b'C')?;
    }
    if group > 0 {
        w.push(b'0' + group.min(9))?;
    }
    Ok(())
}

fn encode_meta(w: &mut Writer<'_>, req: &MetaRequest) -> Result<(), Sdi12Error> {
    w.push(b'I')?;
    match req.target {
        MeasurementType::Standard => encode_measure(w, b'M', req.crc, req.group)?,
        MeasurementType::Concurrent => encode_measure(w, b'C', req.crc, req.group)?,
        MeasurementType::Verification => w.push(b'V')?,
        MeasurementType::HighVolumeAscii => w.push_all(b"HA")?,
        MeasurementType::HighVolumeBinary => w.push_all(b"HB")?,
        MeasurementType::Continuous => {
            w.push(b'R')?;
            if req.crc {
                w.push(b'C')?;
            }
            w.push(b'0' + req.group.min(9))?;
        }
    }
    if let Some(param) = req.param {
        w.push(b'_')?;
        let param = param.min(999);
        w.push(b'0' + (param / 100) as u8)?;
        w.push(b'0' + (param / 10 % 10) as u8)?;
        w.push(b'0' + (param % 10) as u8)?;
    }
    Ok(())
}

// --- Body parsing (everything between the address and `!`) ---

fn parse_body(body: &[u8]) -> Result<CommandKind<'_>, Sdi12Error> {
    match body {
        b"" => Ok(CommandKind::Acknowledge),
        b"I" => Ok(CommandKind::Identify),
        b"V" => Ok(CommandKind::Verify),
        b"H" => Ok(CommandKind::HighVolumeStub),
        [b'A', rest @ ..] => parse_change_address(rest),
        [b'I', rest @ ..] => parse_identify_meta(rest),
        [b'M', rest @ ..] => {
            let (crc, group) = parse_group_suffix(rest)?;
            Ok(CommandKind::Measure { crc, group })
        }
        [b'C', rest @ ..] => {
            let (crc, group) = parse_group_suffix(rest)?;
            Ok(CommandKind::Concurrent { crc, group })
        }
        [b'H', rest @ ..] => parse_high_volume(rest),
        [b'D', rest @ ..] => parse_data(rest),
        [b'R', rest @ ..] => parse_continuous(rest),
        [b'X', rest @ ..] => Ok(CommandKind::Extended { body: rest }),
        _ => Err(Sdi12Error::InvalidCommand),
    }
}

/// Shared suffix of the M/C families: optional `C`, optional group digit.
fn parse_group_suffix(rest: &[u8]) -> Result<(bool, u8), Sdi12Error> {
    let (crc, rest) = match rest {
        [b'C', tail @ ..] => (true, tail),
        tail => (false, tail),
    };
    match rest {
        [] => Ok((crc, 0)),
        [d] if d.is_ascii_digit() => Ok((crc, d - b'0')),
        _ => Err(Sdi12Error::InvalidCommand),
    }
}

fn parse_change_address(rest: &[u8]) -> Result<CommandKind<'static>, Sdi12Error> {
    match rest {
        [c] => {
            let new_address = Sdi12Addr::new(*c as char)?;
            Ok(CommandKind::ChangeAddress { new_address })
        }
        _ => Err(Sdi12Error::InvalidCommand),
    }
}

fn parse_high_volume(rest: &[u8]) -> Result<CommandKind<'static>, Sdi12Error> {
    let (binary, rest) = match rest {
        [b'A', tail @ ..] => (false, tail),
        [b'B', tail @ ..] => (true, tail),
        _ => return Err(Sdi12Error::InvalidCommand),
    };
    let crc = match rest {
        [] => false,
        [b'C'] => true,
        _ => return Err(Sdi12Error::InvalidCommand),
    };
    Ok(CommandKind::HighVolume { binary, crc })
}

fn parse_data(rest: &[u8]) -> Result<CommandKind<'static>, Sdi12Error> {
    let (binary, digits) = match rest {
        [b'B', tail @ ..] => (true, tail),
        tail => (false, tail),
    };
    let page = parse_page(digits)?;
    if binary {
        Ok(CommandKind::SendBinary { page })
    } else {
        Ok(CommandKind::SendData { page })
    }
}

/// 1–3 decimal digits, 0..=999.
fn parse_page(digits: &[u8]) -> Result<u16, Sdi12Error> {
    if digits.is_empty() || digits.len() > 3 || !digits.iter().all(u8::is_ascii_digit) {
        return Err(Sdi12Error::InvalidCommand);
    }
    let mut page = 0u16;
    for &d in digits {
        page = page * 10 + u16::from(d - b'0');
    }
    Ok(page)
}

fn parse_continuous(rest: &[u8]) -> Result<CommandKind<'static>, Sdi12Error> {
    let (crc, rest) = match rest {
        [b'C', tail @ ..] => (true, tail),
        tail => (false, tail),
    };
    match rest {
        [d] if d.is_ascii_digit() => Ok(CommandKind::Continuous { crc, index: d - b'0' }),
        _ => Err(Sdi12Error::InvalidCommand),
    }
}

/// Recognizer for the identify-measurement family: base letter with
/// optional `C` infix, optional group digit, optional `_nnn` suffix.
fn parse_identify_meta(rest: &[u8]) -> Result<CommandKind<'static>, Sdi12Error> {
    let (main, param) = match rest.iter().position(|&b| b == b'_') {
        Some(split) => {
            let digits = &rest[split + 1..];
            if digits.len() != 3 || !digits.iter().all(u8::is_ascii_digit) {
                return Err(Sdi12Error::InvalidCommand);
            }
            let nnn = digits.iter().fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
            (&rest[..split], Some(nnn))
        }
        None => (rest, None),
    };

    let (target, group, crc) = match main {
        b"V" => (MeasurementType::Verification, 0, false),
        b"HA" => (MeasurementType::HighVolumeAscii, 0, false),
        b"HB" => (MeasurementType::HighVolumeBinary, 0, false),
        [b'M', tail @ ..] => {
            let (crc, group) = parse_group_suffix(tail)?;
            (MeasurementType::Standard, group, crc)
        }
        [b'C', tail @ ..] => {
            let (crc, group) = parse_group_suffix(tail)?;
            (MeasurementType::Concurrent, group, crc)
        }
        [b'R', tail @ ..] => {
            let (crc, tail) = match tail {
                [b'C', t @ ..] => (true, t),
                t => (false, t),
            };
            match tail {
                [d] if d.is_ascii_digit() => (MeasurementType::Continuous, d - b'0', crc),
                _ => return Err(Sdi12Error::InvalidCommand),
            }
        }
        _ => return Err(Sdi12Error::InvalidCommand),
    };

    Ok(CommandKind::IdentifyMeasurement(MetaRequest { target, group, crc, param }))
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    fn addr(c: char) -> Sdi12Addr {
        Sdi12Addr::new(c).unwrap()
    }

    fn parsed(bytes: &[u8]) -> Command<'_> {
        Command::parse(bytes).unwrap()
    }

    fn encoded(cmd: &Command<'_>) -> std::string::String {
        let mut buf = [0u8; 24];
        let n = cmd.encode_into(&mut buf).unwrap();
        std::str::from_utf8(&buf[..n]).unwrap().into()
    }

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(parsed(b"0!").kind, CommandKind::Acknowledge);
        assert_eq!(parsed(b"?!").target, Target::Query);
        assert_eq!(parsed(b"1I!").kind, CommandKind::Identify);
        assert_eq!(parsed(b"4V!").kind, CommandKind::Verify);
        assert_eq!(parsed(b"5H!").kind, CommandKind::HighVolumeStub);
        assert_eq!(
            parsed(b"2A3!").kind,
            CommandKind::ChangeAddress { new_address: addr('3') }
        );
        // Terminator may already be stripped by the framing layer.
        assert_eq!(parsed(b"0M").kind, CommandKind::Measure { crc: false, group: 0 });
    }

    #[test]
    fn test_parse_measurement_family() {
        assert_eq!(parsed(b"0M!").kind, CommandKind::Measure { crc: false, group: 0 });
        assert_eq!(parsed(b"1M1!").kind, CommandKind::Measure { crc: false, group: 1 });
        assert_eq!(parsed(b"2M9!").kind, CommandKind::Measure { crc: false, group: 9 });
        assert_eq!(parsed(b"3MC!").kind, CommandKind::Measure { crc: true, group: 0 });
        assert_eq!(parsed(b"4MC5!").kind, CommandKind::Measure { crc: true, group: 5 });
        assert_eq!(parsed(b"6C!").kind, CommandKind::Concurrent { crc: false, group: 0 });
        assert_eq!(parsed(b"7CC9!").kind, CommandKind::Concurrent { crc: true, group: 9 });
    }

    #[test]
    fn test_parse_high_volume() {
        assert_eq!(parsed(b"0HA!").kind, CommandKind::HighVolume { binary: false, crc: false });
        assert_eq!(parsed(b"0HAC!").kind, CommandKind::HighVolume { binary: false, crc: true });
        assert_eq!(parsed(b"0HB!").kind, CommandKind::HighVolume { binary: true, crc: false });
        assert_eq!(parsed(b"0HBC!").kind, CommandKind::HighVolume { binary: true, crc: true });
    }

    #[test]
    fn test_parse_data_pages() {
        assert_eq!(parsed(b"0D0!").kind, CommandKind::SendData { page: 0 });
        assert_eq!(parsed(b"1D9!").kind, CommandKind::SendData { page: 9 });
        assert_eq!(parsed(b"2D999!").kind, CommandKind::SendData { page: 999 });
        assert_eq!(parsed(b"3DB0!").kind, CommandKind::SendBinary { page: 0 });
        assert_eq!(parsed(b"4DB123!").kind, CommandKind::SendBinary { page: 123 });
    }

    #[test]
    fn test_parse_continuous() {
        assert_eq!(parsed(b"0R0!").kind, CommandKind::Continuous { crc: false, index: 0 });
        assert_eq!(parsed(b"1R9!").kind, CommandKind::Continuous { crc: false, index: 9 });
        assert_eq!(parsed(b"2RC4!").kind, CommandKind::Continuous { crc: true, index: 4 });
    }

    #[test]
    fn test_parse_identify_measurement() {
        let meta = |target, group, crc, param| {
            CommandKind::IdentifyMeasurement(MetaRequest { target, group, crc, param })
        };
        assert_eq!(parsed(b"0IM!").kind, meta(MeasurementType::Standard, 0, false, None));
        assert_eq!(parsed(b"0IM3!").kind, meta(MeasurementType::Standard, 3, false, None));
        assert_eq!(parsed(b"0IMC!").kind, meta(MeasurementType::Standard, 0, true, None));
        assert_eq!(parsed(b"0IC2!").kind, meta(MeasurementType::Concurrent, 2, false, None));
        assert_eq!(parsed(b"0ICC!").kind, meta(MeasurementType::Concurrent, 0, true, None));
        assert_eq!(parsed(b"0IV!").kind, meta(MeasurementType::Verification, 0, false, None));
        assert_eq!(parsed(b"0IHA!").kind, meta(MeasurementType::HighVolumeAscii, 0, false, None));
        assert_eq!(parsed(b"0IHB!").kind, meta(MeasurementType::HighVolumeBinary, 0, false, None));
        assert_eq!(parsed(b"0IR5!").kind, meta(MeasurementType::Continuous, 5, false, None));
        assert_eq!(parsed(b"0IRC9!").kind, meta(MeasurementType::Continuous, 9, true, None));
    }

    #[test]
    fn test_parse_identify_parameter() {
        let meta = |target, group, crc, param| {
            CommandKind::IdentifyMeasurement(MetaRequest { target, group, crc, param })
        };
        assert_eq!(parsed(b"0IM_001!").kind, meta(MeasurementType::Standard, 0, false, Some(1)));
        assert_eq!(parsed(b"1IM1_010!").kind, meta(MeasurementType::Standard, 1, false, Some(10)));
        assert_eq!(parsed(b"2IMC_999!").kind, meta(MeasurementType::Standard, 0, true, Some(999)));
        assert_eq!(
            parsed(b"5IC3_050!").kind,
            meta(MeasurementType::Concurrent, 3, false, Some(50))
        );
        assert_eq!(
            parsed(b"4IV_123!").kind,
            meta(MeasurementType::Verification, 0, false, Some(123))
        );
        assert_eq!(
            parsed(b"9IR0_001!").kind,
            meta(MeasurementType::Continuous, 0, false, Some(1))
        );
        assert_eq!(
            parsed(b"dIHA_002!").kind,
            meta(MeasurementType::HighVolumeAscii, 0, false, Some(2))
        );
    }

    #[test]
    fn test_parse_extended() {
        assert_eq!(parsed(b"0XTEST!").kind, CommandKind::Extended { body: b"TEST" });
        assert_eq!(parsed(b"0XCAL=1,2!").kind, CommandKind::Extended { body: b"CAL=1,2" });
        assert_eq!(parsed(b"0X!").kind, CommandKind::Extended { body: b"" });
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            &b""[..],
            b"!",
            b"$!",
            b"?M!",
            b"0Q!",
            b"0MA!",
            b"0MCC!",
            b"0D!",
            b"0DA!",
            b"0D1000!",
            b"0R!",
            b"0R10!",
            b"0A!",
            b"0A$!",
            b"0H9!",
            b"0IM_12!",
            b"0IM_abc!",
            b"0IQ!",
            b"0IR_001!",
        ] {
            assert!(Command::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_parse_invalid_address_reported() {
        assert!(matches!(
            Command::parse(b"$M!"),
            Err(Sdi12Error::InvalidAddress('$'))
        ));
    }

    #[test]
    fn test_encode_literal_strings() {
        let a = addr('0');
        let cases: &[(Command<'_>, &str)] = &[
            (Command::to_device(a, CommandKind::Acknowledge), "0!"),
            (Command::address_query(), "?!"),
            (Command::to_device(a, CommandKind::Identify), "0I!"),
            (Command::to_device(a, CommandKind::Measure { crc: false, group: 0 }), "0M!"),
            (Command::to_device(a, CommandKind::Measure { crc: true, group: 3 }), "0MC3!"),
            (Command::to_device(a, CommandKind::Concurrent { crc: true, group: 0 }), "0CC!"),
            (Command::to_device(a, CommandKind::HighVolume { binary: true, crc: true }), "0HBC!"),
            (Command::to_device(a, CommandKind::SendData { page: 7 }), "0D7!"),
            (Command::to_device(a, CommandKind::SendBinary { page: 123 }), "0DB123!"),
            (Command::to_device(a, CommandKind::Continuous { crc: false, index: 0 }), "0R0!"),
            (
                Command::to_device(a, CommandKind::ChangeAddress { new_address: addr('5') }),
                "0A5!",
            ),
            (
                Command::to_device(
                    a,
                    CommandKind::IdentifyMeasurement(MetaRequest {
                        target: MeasurementType::Standard,
                        group: 1,
                        crc: false,
                        param: Some(5),
                    }),
                ),
                "0IM1_005!",
            ),
            (Command::to_device(a, CommandKind::Extended { body: b"RST" }), "0XRST!"),
        ];
        for (cmd, expected) in cases {
            assert_eq!(encoded(cmd), *expected);
        }
    }

    #[test]
    fn test_encode_parse_roundtrip() {
        let a = addr('z');
        let kinds = [
            CommandKind::Acknowledge,
            CommandKind::Identify,
            CommandKind::Verify,
            CommandKind::HighVolumeStub,
            CommandKind::Measure { crc: true, group: 7 },
            CommandKind::Concurrent { crc: false, group: 2 },
            CommandKind::HighVolume { binary: false, crc: true },
            CommandKind::SendData { page: 42 },
            CommandKind::SendBinary { page: 999 },
            CommandKind::Continuous { crc: true, index: 8 },
            CommandKind::ChangeAddress { new_address: addr('A') },
            CommandKind::IdentifyMeasurement(MetaRequest {
                target: MeasurementType::Continuous,
                group: 4,
                crc: true,
                param: Some(321),
            }),
            CommandKind::Extended { body: b"CFG?" },
        ];
        let mut buf = [0u8; 24];
        for kind in kinds {
            let cmd = Command::to_device(a, kind);
            let n = cmd.encode_into(&mut buf).unwrap();
            assert_eq!(Command::parse(&buf[..n]).unwrap(), cmd, "roundtrip for {kind:?}");
        }
    }

    #[test]
    fn test_encode_overflow() {
        let cmd = Command::to_device(addr('0'), CommandKind::SendBinary { page: 999 });
        let mut buf = [0u8; 3];
        assert!(matches!(
            cmd.encode_into(&mut buf),
            Err(Sdi12Error::BufferOverflow { .. })
        ));
    }
}
