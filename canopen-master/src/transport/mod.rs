//! Transport boundary.
//!
//! A transport opens a bus, sends frames, and hands every received frame to
//! the [`FrameSink`] it was opened with. Everything above this trait is
//! independent of the CAN hardware.

mod socket_can;
mod virtual_bus;

pub use socket_can::SocketCanTransport;
pub use virtual_bus::{Responder, VirtualBus};

use crate::error::TransportError;
use canopen_common::Frame;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// A frame taken off the bus.
#[derive(Debug, Clone, Copy)]
pub struct InboundFrame {
    pub frame: Frame,
    /// Set by transports that echo sent frames back; such frames are not
    /// announced as locally observed packets.
    pub bridge: bool,
}

/// What a transport hands to the worker.
#[derive(Debug)]
pub(crate) enum BusEvent {
    Frame(InboundFrame),
    /// The receive side is broken and nothing more will arrive.
    Failed(TransportError),
}

/// Receive callback handed to a transport on open. Delivering a frame
/// queues it for the worker and wakes it.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::UnboundedSender<BusEvent>,
}

impl FrameSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<BusEvent>) -> Self {
        Self { tx }
    }

    /// Returns false once the worker has gone away.
    pub fn deliver(&self, frame: Frame, bridge: bool) -> bool {
        self.tx
            .send(BusEvent::Frame(InboundFrame { frame, bridge }))
            .is_ok()
    }

    /// Report that receiving has failed. The worker stops and the master
    /// closes the connection.
    pub fn fail(&self, error: TransportError) {
        let _ = self.tx.send(BusEvent::Failed(error));
    }
}

/// Nominal CAN bit rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitRate {
    Kbps10,
    Kbps20,
    Kbps50,
    Kbps100,
    Kbps125,
    Kbps250,
    #[default]
    Kbps500,
    Kbps800,
    Mbps1,
}

impl BitRate {
    pub fn bits_per_second(&self) -> u32 {
        match self {
            Self::Kbps10 => 10_000,
            Self::Kbps20 => 20_000,
            Self::Kbps50 => 50_000,
            Self::Kbps100 => 100_000,
            Self::Kbps125 => 125_000,
            Self::Kbps250 => 250_000,
            Self::Kbps500 => 500_000,
            Self::Kbps800 => 800_000,
            Self::Mbps1 => 1_000_000,
        }
    }
}

impl fmt::Display for BitRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bits_per_second() {
            bps if bps >= 1_000_000 => write!(f, "{} Mbit/s", bps / 1_000_000),
            bps => write!(f, "{} kbit/s", bps / 1_000),
        }
    }
}

/// A CAN bus driver.
///
/// `send` may be called from any thread, including the worker while it
/// holds no locks of its own.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, bus: &str, bit_rate: BitRate, sink: FrameSink) -> Result<(), TransportError>;

    fn close(&self);

    fn is_open(&self) -> bool;

    fn send(&self, frame: &Frame) -> Result<(), TransportError>;

    /// Bus identifiers this transport can open.
    fn enumerate(&self) -> Result<Vec<String>, TransportError> {
        Err(TransportError::Unsupported("enumeration"))
    }
}
