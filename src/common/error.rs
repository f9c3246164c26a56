// src/common/error.rs

/// Error taxonomy shared by both protocol roles.
///
/// The set is closed: every fallible operation in the crate maps onto
/// one of these variants, so hosts can match exhaustively.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Sdi12Error {
    /// Character is not in the `[0-9A-Za-z]` address alphabet.
    #[error("invalid SDI-12 address character: '{0}'")]
    InvalidAddress(char),

    /// Command bytes do not match any command in the v1.4 grammar.
    #[error("malformed or unrecognized command")]
    InvalidCommand,

    /// A formatted response or parsed payload would not fit.
    #[error("buffer overflow: needed {needed}, got {got}")]
    BufferOverflow { needed: usize, got: usize },

    /// Command targets a different sensor; no bytes may be emitted.
    #[error("command addressed to another sensor")]
    NotAddressed,

    /// No measurement data is cached for the request.
    #[error("no measurement data available")]
    NoData,

    /// Parameter or extended-command registration table is full.
    #[error("registration table full")]
    ParamLimit,

    /// A required capability hook is unavailable.
    #[error("required capability hook missing")]
    CallbackMissing,

    /// The I/O capability reported no bytes within the budget.
    #[error("operation timed out")]
    Timeout,

    /// Received CRC does not match the CRC of the received data.
    #[error("CRC mismatch: expected {expected:#06x}, calculated {calculated:#06x}")]
    CrcMismatch { expected: u16, calculated: u16 },

    /// Response structure did not match the expected wire format.
    #[error("response could not be parsed")]
    ParseFailed,

    /// Operation was cancelled before completion.
    #[error("operation aborted")]
    Aborted,
}
