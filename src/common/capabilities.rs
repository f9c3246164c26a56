// src/common/capabilities.rs

use super::address::Sdi12Addr;
use super::types::MeasurementType;
use super::value::Sdi12Value;

/// Bus line direction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    /// Listen on the bus.
    Rx,
    /// Drive the bus.
    Tx,
}

/// Everything a [`crate::sensor::Sensor`] needs from its host.
///
/// The engine is sans-I/O: framing, baud timing and break detection
/// live behind this trait. The first three methods are required;
/// the rest default to "feature absent" and may be left out.
///
/// Hooks must not re-enter the engine on the same context.
pub trait SensorCapabilities {
    /// Transmits a fully formatted response. The engine brackets every
    /// call with `set_direction(Tx)` / `set_direction(Rx)`.
    fn send_response(&mut self, bytes: &[u8]);

    /// Switches the bus transceiver between transmit and receive.
    fn set_direction(&mut self, dir: Direction);

    /// Reads one measurement parameter by its registration index.
    ///
    /// Called on the synchronous measurement path, so it must finish
    /// within the 15 ms response budget. Slow acquisitions belong on
    /// the deferred path via [`Self::start_measurement`].
    fn read_param(&mut self, index: u8) -> Sdi12Value;

    /// Persists a changed address to non-volatile storage.
    fn save_address(&mut self, _addr: Sdi12Addr) {}

    /// Loads a previously persisted address. A valid returned address
    /// overrides the default given at construction.
    fn load_address(&mut self) -> Option<char> {
        None
    }

    /// Begins an asynchronous measurement and returns the estimated
    /// seconds until completion (`ttt`, clamped to 0..=999 by the
    /// engine). Returning `None` selects the synchronous path: the
    /// engine reads the group immediately and reports `ttt = 0`.
    ///
    /// When this returns a non-zero estimate the host must later call
    /// [`crate::sensor::Sensor::measurement_done`].
    fn start_measurement(&mut self, _group: u8, _kind: MeasurementType) -> Option<u16> {
        None
    }

    /// Emits the `a<CR><LF>` service request for a completed deferred
    /// measurement. Return `true` if handled; on `false` the engine
    /// sends the request through [`Self::send_response`] itself.
    fn service_request(&mut self) -> bool {
        false
    }

    /// Device reset hook, available to extended-command handlers.
    fn on_reset(&mut self) {}

    /// Formats one high-volume binary page.
    ///
    /// `buf` is the region following the address byte; write the type
    /// byte then the raw payload and return the total bytes written
    /// (`Some(0)` marks an empty page). `None` means binary formatting
    /// is unsupported and data requests degrade to ASCII framing.
    fn format_binary_page(
        &mut self,
        _page: u16,
        _values: &[Sdi12Value],
        _buf: &mut [u8],
    ) -> Option<usize> {
        None
    }
}

/// Everything a [`crate::recorder::Recorder`] needs from its host.
///
/// All blocking happens inside these hooks; the engine only sequences
/// them. `recv` returning 0 is how timeouts and cancellation surface.
pub trait RecorderCapabilities {
    /// Transmits raw command bytes at 1200 baud 7E1.
    fn send(&mut self, bytes: &[u8]);

    /// Receives up to `buf.len()` bytes, waiting at most `timeout_ms`.
    /// Returns the number of bytes read; 0 signals a timeout.
    fn recv(&mut self, buf: &mut [u8], timeout_ms: u32) -> usize;

    /// Switches the bus transceiver between transmit and receive.
    fn set_direction(&mut self, dir: Direction);

    /// Holds the line spacing for at least the 12 ms break duration.
    fn send_break(&mut self);

    /// Sleeps for at least `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}
