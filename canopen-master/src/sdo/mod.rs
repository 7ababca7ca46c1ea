//! SDO client: per-transfer state machine, transfer admission, and the
//! handle callers use to follow a transfer.

mod manager;
mod transfer;

pub(crate) use manager::TransferManager;
pub(crate) use transfer::SdoTransfer;

use crate::error::{MasterError, Result};
use canopen_common::{
    abort_code_description, parse_payload, CodecError, SdoDataType, SdoResponseData, SdoValue,
};
use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Upload from the server.
    Read,
    /// Download to the server.
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoState {
    Init,
    Sent,
    Handshake,
    Finished,
    Error,
    Timeout,
}

impl SdoState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Timeout)
    }
}

impl fmt::Display for SdoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Sent => "sent",
            Self::Handshake => "handshake",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Copy-out view of a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct SdoStatus {
    pub node: u8,
    pub index: u16,
    pub subindex: u8,
    pub direction: Direction,
    pub state: SdoState,
    /// Bytes read so far, or the bytes being written.
    pub data: Vec<u8>,
    /// Abort code from the server, or the one this client sent.
    pub abort_code: Option<u32>,
}

impl SdoStatus {
    pub fn is_success(&self) -> bool {
        self.state == SdoState::Finished
    }

    /// Decode the data as a little-endian value.
    pub fn value<T: SdoValue>(&self) -> std::result::Result<T, CodecError> {
        T::from_sdo_bytes(&self.data)
    }

    pub fn decode(&self, data_type: SdoDataType) -> std::result::Result<SdoResponseData, CodecError> {
        parse_payload(&self.data, data_type)
    }

    pub fn abort_description(&self) -> Option<String> {
        self.abort_code.map(abort_code_description)
    }
}

/// Invoked once, on the worker, when a transfer reaches a terminal state.
pub type SdoCallback = Box<dyn FnOnce(&SdoStatus) + Send + 'static>;

/// Caller's side of a queued transfer.
#[derive(Debug, Clone)]
pub struct SdoHandle {
    status: watch::Receiver<SdoStatus>,
}

impl SdoHandle {
    pub(crate) fn new(status: watch::Receiver<SdoStatus>) -> Self {
        Self { status }
    }

    pub fn state(&self) -> SdoState {
        self.status.borrow().state
    }

    pub fn status(&self) -> SdoStatus {
        self.status.borrow().clone()
    }

    /// Wait for the terminal status. Fails with `TransferAbandoned` if the
    /// connection closed while the transfer was still queued or in flight.
    pub async fn finished(&mut self) -> Result<SdoStatus> {
        if let Ok(status) = self.status.wait_for(|status| status.state.is_terminal()).await {
            return Ok(status.clone());
        }

        let status = self.status.borrow();
        if status.state.is_terminal() {
            Ok(status.clone())
        } else {
            Err(MasterError::TransferAbandoned)
        }
    }
}
