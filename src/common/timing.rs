// src/common/timing.rs

//! Canonical SDI-12 timing constants, in milliseconds.
//!
//! The engines never sleep themselves — these values are handed to the
//! host's delay/receive hooks, which own the clock. Fractional spec
//! values are rounded up so the budgets stay conservative.

/// Baud rate, fixed by the standard.
pub const BAUD_RATE: u32 = 1200;

/// Minimum break duration a recorder must hold (spacing).
pub const BREAK_MS: u32 = 12;

/// Post-break marking time before the first command byte (8.33 ms rounded up).
pub const MARKING_MS: u32 = 9;

/// Maximum sensor response start time after the command stop bit.
pub const RESPONSE_TIMEOUT_MS: u32 = 15;

/// Maximum marking gap between characters of one message (1.66 ms rounded up).
pub const INTERCHAR_MAX_MS: u32 = 2;

/// Marking duration after which the next command must be preceded by a break.
pub const MARKING_TIMEOUT_MS: u32 = 87;

/// Idle marking after which a sensor may drop to low-power standby.
pub const STANDBY_MS: u32 = 100;

/// Minimum recorder wait before retrying an unanswered command (16.67 ms rounded up).
pub const RETRY_MIN_MS: u32 = 17;

/// Maximum gap between lines of a multi-line extended response.
pub const MULTILINE_GAP_MS: u32 = 150;

/// Maximum time a sensor may take to persist a new address.
pub const ADDRESS_CHANGE_DELAY_MS: u32 = 1000;
