// frame.rs - Canonical CAN frame shared by the master and the simulator
use socketcan::{CanFrame, EmbeddedFrame, StandardId};
use std::fmt;
use thiserror::Error;

/// Highest 11-bit identifier.
pub const MAX_COB_ID: u16 = 0x7FF;

/// Maximum classic CAN payload.
pub const MAX_DATA_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("COB-ID 0x{0:X} is outside the 11-bit range")]
    CobIdOutOfRange(u16),
    #[error("payload of {0} bytes exceeds 8 bytes")]
    PayloadTooLong(usize),
    #[error("unsupported frame: {0}")]
    Unsupported(&'static str),
}

/// A standard-identifier CAN data frame. RTR is not supported as CANopen
/// does not use it for anything this stack handles.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    cob_id: u16,
    len: u8,
    data: [u8; MAX_DATA_LEN],
}

impl Frame {
    pub fn new(cob_id: u16, data: &[u8]) -> Result<Self, FrameError> {
        if cob_id > MAX_COB_ID {
            return Err(FrameError::CobIdOutOfRange(cob_id));
        }
        if data.len() > MAX_DATA_LEN {
            return Err(FrameError::PayloadTooLong(data.len()));
        }

        let mut buf = [0u8; MAX_DATA_LEN];
        buf[..data.len()].copy_from_slice(data);

        Ok(Self {
            cob_id,
            len: data.len() as u8,
            data: buf,
        })
    }

    /// Builds an 8-byte frame. Only called with identifiers the caller
    /// derived from a validated node id.
    pub(crate) fn full(cob_id: u16, data: [u8; MAX_DATA_LEN]) -> Self {
        Self {
            cob_id: cob_id & MAX_COB_ID,
            len: MAX_DATA_LEN as u8,
            data,
        }
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.len = len.min(self.len as usize) as u8;
        self.data[self.len as usize..].fill(0);
    }

    pub fn cob_id(&self) -> u16 {
        self.cob_id
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid payload bytes, never more than `len()`.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03x} {:x}", self.cob_id, self.len)?;
        for byte in self.data() {
            write!(f, " {:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self)
    }
}

impl TryFrom<&CanFrame> for Frame {
    type Error = FrameError;

    fn try_from(frame: &CanFrame) -> Result<Self, FrameError> {
        if let CanFrame::Error(_) = frame {
            return Err(FrameError::Unsupported("error frame"));
        }
        if frame.is_remote_frame() {
            return Err(FrameError::Unsupported("remote frame"));
        }

        let cob_id = match frame.id() {
            socketcan::Id::Standard(std_id) => std_id.as_raw(),
            socketcan::Id::Extended(_) => return Err(FrameError::Unsupported("extended id")),
        };

        Frame::new(cob_id, frame.data())
    }
}

impl TryFrom<&Frame> for CanFrame {
    type Error = FrameError;

    fn try_from(frame: &Frame) -> Result<Self, FrameError> {
        let id = StandardId::new(frame.cob_id)
            .ok_or(FrameError::CobIdOutOfRange(frame.cob_id))?;

        CanFrame::new(id, frame.data())
            .ok_or(FrameError::PayloadTooLong(frame.len()))
    }
}
