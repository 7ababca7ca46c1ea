use crate::trace::TraceError;
use canopen_common::FrameError;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Failures at the transport boundary. Never retried by the master.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {bus}: {source}")]
    Open {
        bus: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("transport is not open")]
    NotOpen,
    #[error("transport is already open")]
    AlreadyOpen,
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Reasons the worker stopped on its own. The connection is closed when
/// one is detected.
#[derive(Debug, Clone, Error)]
pub enum WorkerFault {
    #[error("transport failed: {0}")]
    Transport(Arc<TransportError>),
    #[error("inbound frame queue closed while the connection was open")]
    InboundClosed,
    #[error("node {0} already has an active SDO transfer")]
    DuplicateActivation(u8),
}

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("connection is already open")]
    AlreadyOpen,
    #[error("connection is not open")]
    NotOpen,
    #[error("no tokio runtime available to run the worker")]
    NoRuntime,
    #[error("node id {0} is outside 1..=127")]
    InvalidNodeId(u8),
    #[error("SDO write payload is empty")]
    EmptyPayload,
    #[error("SDO payload of {0} bytes is too large")]
    PayloadTooLarge(usize),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("bus trace: {0}")]
    Trace(#[from] TraceError),
    #[error("SDO transfer abandoned before completion")]
    TransferAbandoned,
    #[error("worker stopped: {0}")]
    WorkerFault(#[from] WorkerFault),
}

pub type Result<T> = std::result::Result<T, MasterError>;
