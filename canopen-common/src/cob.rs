//! COB-ID classification.
//!
//! The ranges are the fixed CANopen predefined connection set. They are
//! checked in table order and the first match wins.

pub const NMT_COMMAND_COB: u16 = 0x000;
pub const SYNC_COB: u16 = 0x080;
pub const TIME_COB: u16 = 0x100;
pub const LSS_COB: u16 = 0x7E5;

const EMCY_FIRST: u16 = 0x081;
const EMCY_LAST: u16 = 0x0FF;
const PDO_FIRST: u16 = 0x180;
const PDO_LAST: u16 = 0x57F;
const SDO_REPLY_BASE: u16 = 0x580;
const SDO_REPLY_LAST: u16 = 0x5FF;
const SDO_REQUEST_BASE: u16 = 0x600;
const SDO_REQUEST_LAST: u16 = 0x67F;
const HEARTBEAT_BASE: u16 = 0x700;
const HEARTBEAT_LAST: u16 = 0x77F;

/// Message class of a frame, derived from its COB-ID alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    NmtCommand,
    Sync,
    Emergency,
    Time,
    /// Transmit PDO range.
    Pdo,
    /// Server to client SDO.
    SdoReply,
    /// Client to server SDO, only ever observed.
    SdoRequest,
    /// Heartbeat, bootup and node guarding replies.
    NmtState,
    Lss,
    Unknown,
}

impl MessageClass {
    pub fn classify(cob_id: u16) -> Self {
        match cob_id {
            NMT_COMMAND_COB => Self::NmtCommand,
            SYNC_COB => Self::Sync,
            EMCY_FIRST..=EMCY_LAST => Self::Emergency,
            TIME_COB => Self::Time,
            PDO_FIRST..=PDO_LAST => Self::Pdo,
            SDO_REPLY_BASE..=SDO_REPLY_LAST => Self::SdoReply,
            SDO_REQUEST_BASE..=SDO_REQUEST_LAST => Self::SdoRequest,
            0x701..=HEARTBEAT_LAST => Self::NmtState,
            LSS_COB => Self::Lss,
            _ => Self::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NmtCommand => "NMT",
            Self::Sync => "SYNC",
            Self::Emergency => "EMCY",
            Self::Time => "TIME",
            Self::Pdo => "PDO",
            Self::SdoReply => "SDO_RX",
            Self::SdoRequest => "SDO_TX",
            Self::NmtState => "NMT_EC",
            Self::Lss => "LSS",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// COB-ID the client uses to talk to a node's SDO server (0x600 + node).
pub fn sdo_request_cob(node_id: u8) -> u16 {
    SDO_REQUEST_BASE + (node_id & 0x7F) as u16
}

/// COB-ID a node's SDO server replies on (0x580 + node).
pub fn sdo_reply_cob(node_id: u8) -> u16 {
    SDO_REPLY_BASE + (node_id & 0x7F) as u16
}

/// COB-ID a node sends bootup and heartbeat on (0x700 + node).
pub fn heartbeat_cob(node_id: u8) -> u16 {
    HEARTBEAT_BASE + (node_id & 0x7F) as u16
}

/// Node id carried in the low seven bits of a node-addressed COB-ID.
pub fn node_from_cob(cob_id: u16) -> u8 {
    (cob_id & 0x7F) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_identifiers() {
        assert_eq!(MessageClass::classify(0x000), MessageClass::NmtCommand);
        assert_eq!(MessageClass::classify(0x080), MessageClass::Sync);
        assert_eq!(MessageClass::classify(0x100), MessageClass::Time);
        assert_eq!(MessageClass::classify(0x7E5), MessageClass::Lss);
    }

    #[test]
    fn test_range_boundaries() {
        assert_eq!(MessageClass::classify(0x081), MessageClass::Emergency);
        assert_eq!(MessageClass::classify(0x0FF), MessageClass::Emergency);
        assert_eq!(MessageClass::classify(0x180), MessageClass::Pdo);
        assert_eq!(MessageClass::classify(0x57F), MessageClass::Pdo);
        assert_eq!(MessageClass::classify(0x580), MessageClass::SdoReply);
        assert_eq!(MessageClass::classify(0x5FF), MessageClass::SdoReply);
        assert_eq!(MessageClass::classify(0x600), MessageClass::SdoRequest);
        assert_eq!(MessageClass::classify(0x67F), MessageClass::SdoRequest);
        assert_eq!(MessageClass::classify(0x701), MessageClass::NmtState);
        assert_eq!(MessageClass::classify(0x77F), MessageClass::NmtState);
    }

    #[test]
    fn test_gaps_are_unknown() {
        assert_eq!(MessageClass::classify(0x101), MessageClass::Unknown);
        assert_eq!(MessageClass::classify(0x700), MessageClass::Unknown);
        assert_eq!(MessageClass::classify(0x7E4), MessageClass::Unknown);
    }

    #[test]
    fn test_node_addressing() {
        assert_eq!(sdo_request_cob(5), 0x605);
        assert_eq!(sdo_reply_cob(5), 0x585);
        assert_eq!(heartbeat_cob(127), 0x77F);
        assert_eq!(node_from_cob(0x585), 5);
    }
}
