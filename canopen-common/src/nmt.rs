//! NMT command frames and node lifecycle states.

use crate::cob::{heartbeat_cob, NMT_COMMAND_COB};
use crate::frame::Frame;
use std::fmt;

/// Node id that addresses every node in an NMT command.
pub const ALL_NODES: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NmtCommand {
    Start = 0x01,
    Stop = 0x02,
    EnterPreOperational = 0x80,
    ResetNode = 0x81,
    ResetCommunication = 0x82,
}

impl NmtCommand {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Start),
            0x02 => Some(Self::Stop),
            0x80 => Some(Self::EnterPreOperational),
            0x81 => Some(Self::ResetNode),
            0x82 => Some(Self::ResetCommunication),
            _ => None,
        }
    }

    /// Two-byte command frame on COB-ID 0x000.
    pub fn frame(self, node_id: u8) -> Frame {
        let mut data = [0u8; 8];
        data[0] = self as u8;
        data[1] = node_id & 0x7F;
        let mut frame = Frame::full(NMT_COMMAND_COB, data);
        frame.truncate(2);
        frame
    }
}

/// One-byte heartbeat on the node's NMT error-control COB-ID. A code of
/// `0x00` is the bootup message.
pub fn heartbeat_frame(node_id: u8, state_code: u8) -> Frame {
    let mut data = [0u8; 8];
    data[0] = state_code;
    let mut frame = Frame::full(heartbeat_cob(node_id), data);
    frame.truncate(1);
    frame
}

/// Lifecycle state of a node as last reported on its heartbeat COB-ID.
///
/// Codes outside the four standard states are kept as `Unknown` rather than
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NmtState {
    /// Never heard from.
    #[default]
    Invalid,
    Initializing,
    Stopped,
    Operational,
    PreOperational,
    Unknown(u8),
}

impl NmtState {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Initializing,
            0x04 => Self::Stopped,
            0x05 => Self::Operational,
            0x7F => Self::PreOperational,
            other => Self::Unknown(other),
        }
    }

    /// Raw state byte; `None` for `Invalid`, which has no wire encoding.
    pub fn code(&self) -> Option<u8> {
        match self {
            Self::Invalid => None,
            Self::Initializing => Some(0x00),
            Self::Stopped => Some(0x04),
            Self::Operational => Some(0x05),
            Self::PreOperational => Some(0x7F),
            Self::Unknown(code) => Some(*code),
        }
    }
}

impl fmt::Display for NmtState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid"),
            Self::Initializing => write!(f, "initializing"),
            Self::Stopped => write!(f, "stopped"),
            Self::Operational => write!(f, "operational"),
            Self::PreOperational => write!(f, "pre-operational"),
            Self::Unknown(code) => write!(f, "unknown (0x{:02X})", code),
        }
    }
}
