// src/lib.rs

#![cfg_attr(not(test), no_std)]

//! Sans-I/O implementation of the SDI-12 v1.4 serial protocol.
//!
//! Both bus roles are provided: [`sensor::Sensor`] answers commands as a
//! responder, [`recorder::Recorder`] drives transactions as a data
//! recorder. Neither touches hardware — all I/O goes through the
//! capability traits in [`common::capabilities`], supplied by the host.

pub mod common;
pub mod recorder;
pub mod sensor;

// Re-export key types for convenience
pub use common::Sdi12Addr;
pub use common::Sdi12Error;
pub use common::Sdi12Value;
