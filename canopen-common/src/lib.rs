//! # CANopen Common Library
//!
//! Shared CANopen protocol implementation used by both the master stack
//! and the mock CANopen node for testing.
//!
//! This library provides:
//! - The canonical [`Frame`] type and SocketCAN conversions
//! - COB-ID classification into CANopen message classes
//! - SDO (Service Data Object) command encoding/decoding
//! - NMT command frames and lifecycle states

pub mod cob;
pub mod frame;
pub mod nmt;
pub mod sdo;

// Re-export commonly used types for convenience
pub use cob::MessageClass;
pub use frame::{Frame, FrameError};
pub use nmt::{NmtCommand, NmtState};
pub use sdo::{
    abort_code_description, parse_payload, CodecError, CommandByte, SdoCommand,
    SdoDataType, SdoResponseData, SdoValue,
};
