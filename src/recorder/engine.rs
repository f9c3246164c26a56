// src/recorder/engine.rs

use crate::common::address::Sdi12Addr;
use crate::common::capabilities::{Direction, RecorderCapabilities};
use crate::common::command::{Command, CommandKind, MetaRequest};
use crate::common::crc;
use crate::common::error::Sdi12Error;
use crate::common::response::{
    parse_binary_packet, parse_identification, parse_measurement_header, parse_param_meta,
    trim_crlf, BinaryPacket, DataResponse, IdentResponse, MeasResponse, ParamMetaResponse,
};
use crate::common::timing;
use crate::common::types::{MeasurementType, BIN_MAX_PAYLOAD, BIN_PACKET_OVERHEAD, COMMAND_MAX_LEN};
use crate::common::value::parse_values;
use heapless::Vec;

/// Response buffer size: a full high-volume binary packet of
/// `addr(1) size(2) type(1) payload(1000) crc(2)`.
pub const HV_BUF_LEN: usize = 1 + 2 + 1 + BIN_MAX_PAYLOAD + 2;

/// An SDI-12 data recorder (master) engine.
///
/// Composes commands, drives the I/O capability through one
/// transaction at a time, and parses replies into typed responses.
/// The engine never retries on its own — retry pacing belongs to the
/// caller, which knows the bus topology.
pub struct Recorder<C: RecorderCapabilities> {
    caps: C,
    resp_buf: [u8; HV_BUF_LEN],
    resp_len: usize,
}

impl<C: RecorderCapabilities> Recorder<C> {
    pub fn new(caps: C) -> Self {
        Recorder { caps, resp_buf: [0; HV_BUF_LEN], resp_len: 0 }
    }

    /// Wakes the bus: break condition, then the post-break marking idle.
    pub fn send_break(&mut self) {
        self.caps.send_break();
        self.caps.delay_ms(timing::MARKING_MS);
    }

    /// Sends raw command bytes and stores the reply. Returns the raw
    /// response, trailing `CR LF` included.
    pub fn transact(&mut self, cmd: &[u8], timeout_ms: u32) -> Result<&[u8], Sdi12Error> {
        self.exchange(cmd, timeout_ms)?;
        Ok(&self.resp_buf[..self.resp_len])
    }

    // --- Address operations ---

    /// `?!` — discovers the address of the only sensor on the bus.
    pub fn query_address(&mut self) -> Result<Sdi12Addr, Sdi12Error> {
        self.run(&Command::address_query(), timing::RESPONSE_TIMEOUT_MS)?;
        let line = self.line();
        let first = *line.first().ok_or(Sdi12Error::ParseFailed)?;
        Sdi12Addr::new(first as char)
    }

    /// `a!` — probes for a sensor. A timeout means "not present", not
    /// an error.
    pub fn acknowledge(&mut self, addr: Sdi12Addr) -> Result<bool, Sdi12Error> {
        let cmd = Command::to_device(addr, CommandKind::Acknowledge);
        match self.run(&cmd, timing::RESPONSE_TIMEOUT_MS) {
            Ok(()) => {}
            Err(Sdi12Error::Timeout) => return Ok(false),
            Err(e) => return Err(e),
        }
        let line = self.line();
        Ok(line.first() == Some(&addr.as_byte()))
    }

    /// `aAb!` — renames a sensor. The reply must echo the new address.
    pub fn change_address(&mut self, old: Sdi12Addr, new: Sdi12Addr) -> Result<(), Sdi12Error> {
        let cmd = Command::to_device(old, CommandKind::ChangeAddress { new_address: new });
        self.run(&cmd, timing::RESPONSE_TIMEOUT_MS)?;
        let line = self.line();
        let echoed = *line.first().ok_or(Sdi12Error::ParseFailed)?;
        if echoed == new.as_byte() {
            Ok(())
        } else {
            Err(Sdi12Error::InvalidAddress(echoed as char))
        }
    }

    // --- Identification ---

    /// `aI!` — reads and parses the identification block.
    pub fn identify(&mut self, addr: Sdi12Addr) -> Result<IdentResponse, Sdi12Error> {
        self.run(&Command::to_device(addr, CommandKind::Identify), timing::RESPONSE_TIMEOUT_MS)?;
        parse_identification(trim_crlf(&self.resp_buf[..self.resp_len]))
    }

    // --- Measurements ---

    /// Starts a measurement and parses the `atttn[nn[n]]` header.
    /// `kind` selects the command family; `Continuous` is not a
    /// start-measurement command and is rejected.
    pub fn start_measurement(
        &mut self,
        addr: Sdi12Addr,
        kind: MeasurementType,
        group: u8,
        crc: bool,
    ) -> Result<MeasResponse, Sdi12Error> {
        let command_kind = match kind {
            MeasurementType::Standard => CommandKind::Measure { crc, group },
            MeasurementType::Concurrent => CommandKind::Concurrent { crc, group },
            MeasurementType::Verification => CommandKind::Verify,
            MeasurementType::HighVolumeAscii => CommandKind::HighVolume { binary: false, crc },
            MeasurementType::HighVolumeBinary => CommandKind::HighVolume { binary: true, crc },
            MeasurementType::Continuous => return Err(Sdi12Error::InvalidCommand),
        };
        self.run(&Command::to_device(addr, command_kind), timing::RESPONSE_TIMEOUT_MS)?;
        parse_measurement_header(trim_crlf(&self.resp_buf[..self.resp_len]), kind)
    }

    /// `aV!` — verification, parsed like a standard measurement.
    pub fn verify(&mut self, addr: Sdi12Addr) -> Result<MeasResponse, Sdi12Error> {
        self.start_measurement(addr, MeasurementType::Verification, 0, false)
    }

    /// Listens for the `a<CR><LF>` service request of a completed
    /// deferred measurement.
    pub fn wait_service_request(
        &mut self,
        addr: Sdi12Addr,
        timeout_ms: u32,
    ) -> Result<(), Sdi12Error> {
        self.receive(timeout_ms)?;
        let line = self.line();
        if line.first() == Some(&addr.as_byte()) {
            Ok(())
        } else {
            Err(Sdi12Error::Timeout)
        }
    }

    /// `aDn!` — fetches a data page and parses its values. With `crc`
    /// the full response line is verified before the CRC characters are
    /// stripped for value parsing.
    pub fn get_data(
        &mut self,
        addr: Sdi12Addr,
        page: u16,
        crc: bool,
    ) -> Result<DataResponse, Sdi12Error> {
        let cmd = Command::to_device(addr, CommandKind::SendData { page });
        self.run(&cmd, timing::RESPONSE_TIMEOUT_MS)?;
        self.parse_data_line(crc)
    }

    /// `aRn!` / `aRCn!` — continuous read, parsed like a data page.
    pub fn continuous(
        &mut self,
        addr: Sdi12Addr,
        index: u8,
        crc: bool,
    ) -> Result<DataResponse, Sdi12Error> {
        let cmd = Command::to_device(addr, CommandKind::Continuous { crc, index });
        self.run(&cmd, timing::RESPONSE_TIMEOUT_MS)?;
        self.parse_data_line(crc)
    }

    // --- Identify-measurement metadata ---

    /// `aI{M,C,V,HA,HB,R}…!` — queries the header shape a measurement
    /// command would answer with.
    pub fn identify_measurement(
        &mut self,
        addr: Sdi12Addr,
        kind: MeasurementType,
        group: u8,
        crc: bool,
    ) -> Result<MeasResponse, Sdi12Error> {
        let req = MetaRequest { target: kind, group, crc, param: None };
        let cmd = Command::to_device(addr, CommandKind::IdentifyMeasurement(req));
        self.run(&cmd, timing::RESPONSE_TIMEOUT_MS)?;
        parse_measurement_header(trim_crlf(&self.resp_buf[..self.resp_len]), kind)
    }

    /// `aI…_nnn!` — queries one parameter's SHEF code and units.
    pub fn identify_param(
        &mut self,
        addr: Sdi12Addr,
        kind: MeasurementType,
        group: u8,
        crc: bool,
        param: u16,
    ) -> Result<ParamMetaResponse, Sdi12Error> {
        let req = MetaRequest { target: kind, group, crc, param: Some(param) };
        let cmd = Command::to_device(addr, CommandKind::IdentifyMeasurement(req));
        self.run(&cmd, timing::RESPONSE_TIMEOUT_MS)?;

        if crc {
            crc::check_ascii(&self.resp_buf[..self.resp_len])?;
        }
        let mut line = trim_crlf(&self.resp_buf[..self.resp_len]);
        if crc {
            if line.len() < 3 {
                return Err(Sdi12Error::ParseFailed);
            }
            line = &line[..line.len() - 3];
        }
        parse_param_meta(line)
    }

    // --- Extended commands ---

    /// `aX…!` — transparent single-line extended command. Returns the
    /// raw response; the meaning is manufacturer-defined.
    pub fn extended(
        &mut self,
        addr: Sdi12Addr,
        xcmd: &[u8],
        timeout_ms: u32,
    ) -> Result<&[u8], Sdi12Error> {
        let cmd = Command::to_device(addr, CommandKind::Extended { body: xcmd });
        self.run(&cmd, timeout_ms)?;
        Ok(&self.resp_buf[..self.resp_len])
    }

    /// Extended command with a multi-line response: keeps reading as
    /// long as each further line arrives within `gap_ms` of the last
    /// (use [`timing::MULTILINE_GAP_MS`] for the spec gap). Returns the
    /// concatenated bytes and the number of lines.
    pub fn extended_multiline(
        &mut self,
        addr: Sdi12Addr,
        xcmd: &[u8],
        timeout_ms: u32,
        gap_ms: u32,
    ) -> Result<(&[u8], u8), Sdi12Error> {
        let cmd = Command::to_device(addr, CommandKind::Extended { body: xcmd });
        self.dispatch(&cmd)?;

        let first = self.caps.recv(&mut self.resp_buf, timeout_ms);
        if first == 0 {
            return Err(Sdi12Error::Timeout);
        }
        let mut total = first;
        while total < self.resp_buf.len() {
            let more = self.caps.recv(&mut self.resp_buf[total..], gap_ms);
            if more == 0 {
                break;
            }
            total += more;
        }
        self.resp_len = total;

        let lines = self.resp_buf[..total].iter().filter(|&&b| b == b'\n').count();
        Ok((&self.resp_buf[..total], lines.min(255) as u8))
    }

    // --- High-volume data ---

    /// `aDn!` for high-volume ASCII pages: returns the raw value
    /// region after the address, `CR LF` trimmed.
    pub fn get_hv_data(&mut self, addr: Sdi12Addr, page: u16) -> Result<&[u8], Sdi12Error> {
        let cmd = Command::to_device(addr, CommandKind::SendData { page });
        self.run(&cmd, timing::RESPONSE_TIMEOUT_MS)?;
        let line = trim_crlf(&self.resp_buf[..self.resp_len]);
        if line.is_empty() {
            return Err(Sdi12Error::ParseFailed);
        }
        Ok(&line[1..])
    }

    /// `aDBn!` — reads one binary packet. The length field drives the
    /// read: header first, then `N + 2` more bytes, then the CRC check.
    pub fn get_hv_binary(
        &mut self,
        addr: Sdi12Addr,
        page: u16,
    ) -> Result<BinaryPacket, Sdi12Error> {
        let cmd = Command::to_device(addr, CommandKind::SendBinary { page });
        self.dispatch(&cmd)?;

        let mut total = 0;
        while total < 4 {
            let got = self.caps.recv(&mut self.resp_buf[total..], timing::RESPONSE_TIMEOUT_MS);
            if got == 0 {
                return Err(Sdi12Error::Timeout);
            }
            total += got;
        }

        let payload_len = usize::from(u16::from_le_bytes([self.resp_buf[1], self.resp_buf[2]]));
        if payload_len > BIN_MAX_PAYLOAD {
            return Err(Sdi12Error::BufferOverflow {
                needed: payload_len + BIN_PACKET_OVERHEAD,
                got: self.resp_buf.len(),
            });
        }

        let need = payload_len + BIN_PACKET_OVERHEAD;
        while total < need {
            let got = self.caps.recv(&mut self.resp_buf[total..need], timing::RESPONSE_TIMEOUT_MS);
            if got == 0 {
                return Err(Sdi12Error::Timeout);
            }
            total += got;
        }

        self.resp_len = need;
        parse_binary_packet(&self.resp_buf[..need])
    }

    // --- Transaction plumbing ---

    /// Encodes and runs one command, storing the reply.
    fn run(&mut self, command: &Command<'_>, timeout_ms: u32) -> Result<(), Sdi12Error> {
        let mut cmd_buf = [0u8; COMMAND_MAX_LEN + 4];
        let len = command.encode_into(&mut cmd_buf)?;
        self.exchange(&cmd_buf[..len], timeout_ms)
    }

    /// TX, send, back to RX. No receive.
    fn dispatch(&mut self, command: &Command<'_>) -> Result<(), Sdi12Error> {
        let mut cmd_buf = [0u8; COMMAND_MAX_LEN + 4];
        let len = command.encode_into(&mut cmd_buf)?;
        self.caps.set_direction(Direction::Tx);
        self.caps.send(&cmd_buf[..len]);
        self.caps.set_direction(Direction::Rx);
        Ok(())
    }

    fn exchange(&mut self, cmd: &[u8], timeout_ms: u32) -> Result<(), Sdi12Error> {
        self.caps.set_direction(Direction::Tx);
        self.caps.send(cmd);
        self.caps.set_direction(Direction::Rx);
        self.receive(timeout_ms)
    }

    fn receive(&mut self, timeout_ms: u32) -> Result<(), Sdi12Error> {
        let got = self.caps.recv(&mut self.resp_buf, timeout_ms);
        if got == 0 {
            return Err(Sdi12Error::Timeout);
        }
        self.resp_len = got;
        Ok(())
    }

    fn line(&self) -> &[u8] {
        trim_crlf(&self.resp_buf[..self.resp_len])
    }

    fn parse_data_line(&self, crc: bool) -> Result<DataResponse, Sdi12Error> {
        if crc {
            crc::check_ascii(&self.resp_buf[..self.resp_len])?;
        }
        let line = self.line();
        if line.is_empty() {
            return Err(Sdi12Error::ParseFailed);
        }
        let address =
            Sdi12Addr::new(line[0] as char).map_err(|_| Sdi12Error::ParseFailed)?;

        let mut values = Vec::new();
        parse_values(&line[1..], &mut values, crc)?;
        Ok(DataResponse { address, values, crc_valid: crc })
    }
}
