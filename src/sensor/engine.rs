// src/sensor/engine.rs

use super::format;
use crate::common::address::Sdi12Addr;
use crate::common::capabilities::{Direction, SensorCapabilities};
use crate::common::command::{Command, CommandKind, MetaRequest, Target};
use crate::common::error::Sdi12Error;
use crate::common::types::{
    truncated, Identification, MeasurementType, ParamMeta, SensorState, MAX_GROUPS, MAX_PARAMS,
    MAX_XCMDS, PROTOCOL_VERSION, RESPONSE_MAX_LEN,
};
use crate::common::value::Sdi12Value;
use heapless::{String, Vec};

/// Handler for one registered extended command.
///
/// `body` is the full command body after `aX` (so the handler can parse
/// arguments past its prefix); `resp` is the response region following
/// the address byte. Returns the number of response bytes written — the
/// engine guarantees `CR LF` termination and dispatches the send.
pub type XcmdHandler<C> = fn(&mut C, body: &[u8], resp: &mut [u8]) -> Result<usize, Sdi12Error>;

/// One registered measurement parameter. Registration order is the
/// parameter index handed to the `read_param` hook.
#[derive(Debug, Clone)]
pub struct ParamSlot {
    pub meta: ParamMeta,
    /// Measurement group 0–9; group 0 also serves the non-indexed commands.
    pub group: u8,
    /// Default decimal places for host formatters.
    pub decimals: u8,
}

struct XcmdSlot<C> {
    prefix: String<15>,
    handler: XcmdHandler<C>,
}

#[derive(Debug, Copy, Clone)]
struct Pending {
    kind: MeasurementType,
    group: u8,
    crc: bool,
}

impl Default for Pending {
    fn default() -> Self {
        Pending { kind: MeasurementType::Standard, group: 0, crc: false }
    }
}

/// An SDI-12 sensor (responder) engine.
///
/// Owns all protocol state for one bus address. The host feeds complete
/// commands to [`Sensor::process`], reports break conditions via
/// [`Sensor::break_signal`], and completes deferred measurements with
/// [`Sensor::measurement_done`]. Responses leave through the capability
/// handle; an unaddressed command never produces a byte.
pub struct Sensor<C: SensorCapabilities> {
    caps: C,
    address: Sdi12Addr,
    ident: Identification,
    params: Vec<ParamSlot, MAX_PARAMS>,
    xcmds: Vec<XcmdSlot<C>, MAX_XCMDS>,
    state: SensorState,
    pending: Pending,
    data_cache: Vec<Sdi12Value, MAX_PARAMS>,
    data_available: bool,
    resp_buf: [u8; RESPONSE_MAX_LEN],
    resp_len: usize,
}

impl<C: SensorCapabilities> Sensor<C> {
    /// Creates a sensor at `address`. When the capability provides a
    /// persisted address and it is valid, it overrides the default.
    pub fn new(mut caps: C, address: char, ident: Identification) -> Result<Self, Sdi12Error> {
        let mut address = Sdi12Addr::new(address)?;
        if let Some(stored) = caps.load_address() {
            if let Ok(persisted) = Sdi12Addr::new(stored) {
                address = persisted;
            }
        }

        Ok(Sensor {
            caps,
            address,
            ident,
            params: Vec::new(),
            xcmds: Vec::new(),
            state: SensorState::Ready,
            pending: Pending::default(),
            data_cache: Vec::new(),
            data_available: false,
            resp_buf: [0; RESPONSE_MAX_LEN],
            resp_len: 0,
        })
    }

    /// Registers a measurement parameter in `group`. SHEF code and
    /// units are truncated to their wire widths.
    pub fn register_param(
        &mut self,
        group: u8,
        shef: &str,
        units: &str,
        decimals: u8,
    ) -> Result<(), Sdi12Error> {
        if usize::from(group) >= MAX_GROUPS || decimals > 7 {
            return Err(Sdi12Error::InvalidCommand);
        }
        let slot = ParamSlot {
            meta: ParamMeta { shef: truncated(shef), units: truncated(units) },
            group,
            decimals,
        };
        self.params.push(slot).map_err(|_| Sdi12Error::ParamLimit)
    }

    /// Registers an extended-command handler. Dispatch is first-match
    /// in registration order.
    pub fn register_xcmd(&mut self, prefix: &str, handler: XcmdHandler<C>) -> Result<(), Sdi12Error> {
        let slot = XcmdSlot { prefix: truncated(prefix), handler };
        self.xcmds.push(slot).map_err(|_| Sdi12Error::ParamLimit)
    }

    pub fn address(&self) -> Sdi12Addr {
        self.address
    }

    pub fn state(&self) -> SensorState {
        self.state
    }

    /// Number of parameters registered in `group`.
    pub fn group_count(&self, group: u8) -> usize {
        self.params.iter().filter(|p| p.group == group).count()
    }

    /// Registered parameter by index, if any.
    pub fn param(&self, index: usize) -> Option<&ParamSlot> {
        self.params.get(index)
    }

    /// Processes one complete command received from the bus.
    ///
    /// Emits at most one response through the capability. Commands for
    /// other addresses return [`Sdi12Error::NotAddressed`] with no side
    /// effects; malformed bytes return an error the same silent way.
    pub fn process(&mut self, raw: &[u8]) -> Result<(), Sdi12Error> {
        self.resp_len = 0;
        let command = Command::parse(raw)?;

        let addressed = match command.target {
            Target::Query => true,
            Target::Device(addr) => addr == self.address,
        };
        if !addressed {
            return Err(Sdi12Error::NotAddressed);
        }

        // A command addressed to this sensor aborts a running
        // concurrent measurement (§4.4.7). The wildcard query does not.
        if self.state == SensorState::MeasuringConcurrent
            && matches!(command.target, Target::Device(_))
        {
            self.state = SensorState::Ready;
            self.data_available = false;
            self.data_cache.clear();
        }

        match command.kind {
            CommandKind::Acknowledge | CommandKind::AddressQuery => self.respond_address_only(false),
            CommandKind::Identify => self.handle_identify(),
            CommandKind::Measure { crc, group } => {
                self.handle_measurement(group, crc, MeasurementType::Standard)
            }
            CommandKind::Concurrent { crc, group } => {
                self.handle_measurement(group, crc, MeasurementType::Concurrent)
            }
            CommandKind::Verify => self.handle_measurement(0, false, MeasurementType::Verification),
            CommandKind::HighVolume { binary, crc } => {
                let kind = if binary {
                    MeasurementType::HighVolumeBinary
                } else {
                    MeasurementType::HighVolumeAscii
                };
                self.handle_measurement(0, crc, kind)
            }
            CommandKind::HighVolumeStub => self.handle_highvol_stub(),
            CommandKind::SendData { page } => self.handle_send_data(page),
            CommandKind::SendBinary { page } => self.handle_send_binary(page),
            CommandKind::Continuous { crc, index } => self.handle_continuous(index, crc),
            CommandKind::ChangeAddress { new_address } => self.handle_change_address(new_address),
            CommandKind::IdentifyMeasurement(req) => self.handle_identify_measurement(req),
            CommandKind::Extended { body } => self.handle_extended(body),
        }
    }

    /// Completes a deferred measurement with the acquired values.
    ///
    /// Standard and verification measurements emit the `a<CR><LF>`
    /// service request; concurrent and high-volume ones do not. Calls
    /// outside a deferred measurement are ignored.
    pub fn measurement_done(&mut self, values: &[Sdi12Value]) -> Result<(), Sdi12Error> {
        match self.state {
            SensorState::Measuring => {
                self.cache_values(values);
                self.state = SensorState::DataReady;
                if !self.caps.service_request() {
                    self.resp_buf[0] = self.address.as_byte();
                    self.resp_len = format::append_crlf(&mut self.resp_buf, 1)?;
                    self.send();
                }
                Ok(())
            }
            SensorState::MeasuringConcurrent => {
                self.cache_values(values);
                self.state = SensorState::DataReady;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Handles a detected break condition: any pending measurement is
    /// abandoned and the sensor returns to `Ready`. Address and
    /// registrations are untouched.
    pub fn break_signal(&mut self) {
        self.state = SensorState::Ready;
        self.pending = Pending::default();
        self.data_available = false;
        self.data_cache.clear();
    }

    // --- Command handlers ---

    fn handle_identify(&mut self) -> Result<(), Sdi12Error> {
        self.resp_buf[0] = self.address.as_byte();
        let mut pos = format::put_bytes(&mut self.resp_buf, 1, PROTOCOL_VERSION)?;
        pos = format::put_padded(&mut self.resp_buf, pos, self.ident.vendor.as_str(), 8)?;
        pos = format::put_padded(&mut self.resp_buf, pos, self.ident.model.as_str(), 6)?;
        pos = format::put_padded(&mut self.resp_buf, pos, self.ident.firmware.as_str(), 3)?;
        pos = format::put_bytes(&mut self.resp_buf, pos, self.ident.serial.as_bytes())?;
        self.resp_len = format::append_crlf(&mut self.resp_buf, pos)?;
        self.send();
        Ok(())
    }

    fn handle_measurement(
        &mut self,
        group: u8,
        crc: bool,
        kind: MeasurementType,
    ) -> Result<(), Sdi12Error> {
        self.pending = Pending { kind, group, crc };
        let addr = self.address.as_byte();
        let count = self.group_count(group) as u16;

        if count == 0 {
            // The measurement command still invalidates whatever the
            // previous one cached.
            self.data_cache.clear();
            self.data_available = false;
            self.state = SensorState::Ready;
            self.resp_len = format::write_header(&mut self.resp_buf, addr, 0, 0, kind)?;
            self.send();
            return Ok(());
        }

        match self.caps.start_measurement(group, kind) {
            Some(ttt) => {
                let ttt = ttt.min(999);
                self.resp_len = format::write_header(&mut self.resp_buf, addr, ttt, count, kind)?;
                if ttt == 0 {
                    self.read_group_sync(group);
                    self.state = SensorState::DataReady;
                } else {
                    self.data_available = false;
                    self.state = match kind {
                        MeasurementType::Standard | MeasurementType::Verification => {
                            SensorState::Measuring
                        }
                        _ => SensorState::MeasuringConcurrent,
                    };
                }
            }
            None => {
                self.resp_len = format::write_header(&mut self.resp_buf, addr, 0, count, kind)?;
                self.read_group_sync(group);
                self.state = SensorState::DataReady;
            }
        }

        self.send();
        Ok(())
    }

    fn handle_send_data(&mut self, page: u16) -> Result<(), Sdi12Error> {
        if !self.data_available {
            return self.respond_address_only(self.pending.crc);
        }

        let addr = self.address.as_byte();

        if self.pending.kind == MeasurementType::HighVolumeBinary {
            self.resp_buf[0] = addr;
            let written = {
                let (_, tail) = self.resp_buf.split_at_mut(1);
                self.caps.format_binary_page(page, &self.data_cache, tail)
            };
            if let Some(written) = written {
                // Raw binary payload framed like an ASCII response; the
                // CRC must cover the exact payload length.
                let pos =
                    format::terminate_exact(&mut self.resp_buf, 1 + written, self.pending.crc)?;
                self.resp_len = pos;
                self.send();
                return Ok(());
            }
            // No formatter hook: degrade to ASCII framing below.
        }

        let budget = self.pending.kind.values_budget();
        self.resp_len = format::format_data_page(
            &mut self.resp_buf,
            addr,
            &self.data_cache,
            page,
            budget,
            self.pending.crc,
        )?;
        self.send();
        Ok(())
    }

    fn handle_send_binary(&mut self, page: u16) -> Result<(), Sdi12Error> {
        let addr = self.address.as_byte();

        if !self.data_available {
            self.resp_len = format::empty_binary_packet(&mut self.resp_buf, addr)?;
            self.send();
            return Ok(());
        }

        let written = {
            // Leave the 3 header bytes in front and 2 CRC bytes behind.
            let limit = self.resp_buf.len() - 2;
            let region = &mut self.resp_buf[3..limit];
            self.caps.format_binary_page(page, &self.data_cache, region)
        };

        match written {
            Some(0) => {
                self.resp_len = format::empty_binary_packet(&mut self.resp_buf, addr)?;
            }
            Some(written) => {
                self.resp_len = format::seal_binary_packet(&mut self.resp_buf, addr, written)?;
            }
            None => {
                // No formatter hook: same values under ASCII framing.
                self.resp_len = format::format_data_page(
                    &mut self.resp_buf,
                    addr,
                    &self.data_cache,
                    page,
                    self.pending.kind.values_budget(),
                    self.pending.crc,
                )?;
            }
        }

        self.send();
        Ok(())
    }

    fn handle_continuous(&mut self, index: u8, crc: bool) -> Result<(), Sdi12Error> {
        self.pending = Pending { kind: MeasurementType::Continuous, group: index, crc };

        if self.group_count(index) == 0 {
            return self.respond_address_only(crc);
        }

        self.read_group_sync(index);
        self.resp_len = format::format_data_page(
            &mut self.resp_buf,
            self.address.as_byte(),
            &self.data_cache,
            0,
            MeasurementType::Continuous.values_budget(),
            crc,
        )?;
        self.send();
        Ok(())
    }

    fn handle_change_address(&mut self, new_address: Sdi12Addr) -> Result<(), Sdi12Error> {
        self.address = new_address;
        self.caps.save_address(new_address);
        self.respond_address_only(false)
    }

    fn handle_highvol_stub(&mut self) -> Result<(), Sdi12Error> {
        // Fixed `a000000` shape for sensors answering `aH!`.
        self.resp_len = format::write_header(
            &mut self.resp_buf,
            self.address.as_byte(),
            0,
            0,
            MeasurementType::HighVolumeAscii,
        )?;
        self.send();
        Ok(())
    }

    fn handle_identify_measurement(&mut self, req: MetaRequest) -> Result<(), Sdi12Error> {
        match req.param {
            None => {
                // Header-shaped capability summary. ttt is 0: the
                // engine has no estimate until a measurement starts.
                let count = self.group_count(req.group) as u16;
                self.resp_len = format::write_header(
                    &mut self.resp_buf,
                    self.address.as_byte(),
                    0,
                    count,
                    req.target,
                )?;
                self.send();
                Ok(())
            }
            Some(nnn) => self.respond_param_meta(req.group, nnn, req.crc),
        }
    }

    fn respond_param_meta(&mut self, group: u8, nnn: u16, crc: bool) -> Result<(), Sdi12Error> {
        let mut seen = 0u16;
        let mut found = None;
        for (index, slot) in self.params.iter().enumerate() {
            if slot.group == group {
                seen += 1;
                if seen == nnn {
                    found = Some(index);
                    break;
                }
            }
        }

        let Some(index) = found else {
            // Out-of-range parameter number: address only.
            return self.respond_address_only(crc);
        };

        self.resp_buf[0] = self.address.as_byte();
        let meta = &self.params[index].meta;
        let mut pos = format::put_bytes(&mut self.resp_buf, 1, b",")?;
        pos = format::put_bytes(&mut self.resp_buf, pos, meta.shef.as_bytes())?;
        pos = format::put_bytes(&mut self.resp_buf, pos, b",")?;
        pos = format::put_bytes(&mut self.resp_buf, pos, meta.units.as_bytes())?;
        pos = format::put_bytes(&mut self.resp_buf, pos, b";")?;
        self.resp_len = format::terminate(&mut self.resp_buf, pos, crc)?;
        self.send();
        Ok(())
    }

    fn handle_extended(&mut self, body: &[u8]) -> Result<(), Sdi12Error> {
        let matched = self
            .xcmds
            .iter()
            .position(|slot| body.starts_with(slot.prefix.as_bytes()));

        let Some(index) = matched else {
            // No handler: address-only fail-safe, nothing on the wire
            // reads as an error.
            return self.respond_address_only(false);
        };

        let handler = self.xcmds[index].handler;
        self.resp_buf[0] = self.address.as_byte();
        let written = {
            let (_, tail) = self.resp_buf.split_at_mut(1);
            handler(&mut self.caps, body, tail)?
        };

        let mut pos = 1 + written;
        let terminated =
            pos >= 2 && self.resp_buf[pos - 2] == b'\r' && self.resp_buf[pos - 1] == b'\n';
        if !terminated {
            pos = format::append_crlf(&mut self.resp_buf, pos)?;
        }
        self.resp_len = pos;
        self.send();
        Ok(())
    }

    // --- Internal helpers ---

    fn respond_address_only(&mut self, with_crc: bool) -> Result<(), Sdi12Error> {
        self.resp_buf[0] = self.address.as_byte();
        self.resp_len = format::terminate(&mut self.resp_buf, 1, with_crc)?;
        self.send();
        Ok(())
    }

    fn read_group_sync(&mut self, group: u8) {
        self.data_cache.clear();
        for index in 0..self.params.len() {
            if self.params[index].group == group {
                let value = self.caps.read_param(index as u8);
                if self.data_cache.push(value).is_err() {
                    break;
                }
            }
        }
        self.data_available = true;
    }

    fn cache_values(&mut self, values: &[Sdi12Value]) {
        self.data_cache.clear();
        for value in values.iter().take(MAX_PARAMS) {
            if self.data_cache.push(*value).is_err() {
                break;
            }
        }
        self.data_available = true;
    }

    fn send(&mut self) {
        self.caps.set_direction(Direction::Tx);
        self.caps.send_response(&self.resp_buf[..self.resp_len]);
        self.caps.set_direction(Direction::Rx);
    }
}
