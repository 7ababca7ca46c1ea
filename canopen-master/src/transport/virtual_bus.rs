//! In-process bus for simulation and tests.

use super::{BitRate, FrameSink, Transport};
use crate::error::TransportError;
use crate::lock;
use canopen_common::Frame;
use log::debug;
use std::sync::{Arc, Mutex};

/// Produces the frames a simulated peer answers with.
pub type Responder = Box<dyn FnMut(&Frame) -> Vec<Frame> + Send>;

#[derive(Default)]
struct BusState {
    sink: Option<FrameSink>,
    bus: Option<String>,
    sent: Vec<Frame>,
    responder: Option<Responder>,
    echo: bool,
}

/// A transport that never touches hardware. Sent frames are recorded and
/// offered to an optional responder whose replies are delivered as if
/// received from the bus. Clones share the same bus.
#[derive(Clone, Default)]
pub struct VirtualBus {
    state: Arc<Mutex<BusState>>,
}

impl VirtualBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&Frame) -> Vec<Frame> + Send + 'static,
    {
        let bus = Self::new();
        bus.set_responder(responder);
        bus
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&Frame) -> Vec<Frame> + Send + 'static,
    {
        lock(&self.state).responder = Some(Box::new(responder));
    }

    /// Echo every sent frame back as a bridged frame, like adapters that
    /// loop transmitted frames back to the host.
    pub fn set_echo(&self, echo: bool) {
        lock(&self.state).echo = echo;
    }

    /// Deliver a frame as if it had been received. Returns false when the
    /// bus is closed.
    pub fn inject(&self, frame: Frame) -> bool {
        match &lock(&self.state).sink {
            Some(sink) => sink.deliver(frame, false),
            None => false,
        }
    }

    /// Report a receive failure to the master, as a broken adapter would.
    /// Returns false when the bus is closed.
    pub fn fail(&self, error: TransportError) -> bool {
        match &lock(&self.state).sink {
            Some(sink) => {
                sink.fail(error);
                true
            }
            None => false,
        }
    }

    /// Every frame sent since the bus was created or last cleared.
    pub fn sent(&self) -> Vec<Frame> {
        lock(&self.state).sent.clone()
    }

    pub fn clear_sent(&self) {
        lock(&self.state).sent.clear();
    }

    pub fn bus_name(&self) -> Option<String> {
        lock(&self.state).bus.clone()
    }
}

impl Transport for VirtualBus {
    fn open(&self, bus: &str, bit_rate: BitRate, sink: FrameSink) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.sink.is_some() {
            return Err(TransportError::AlreadyOpen);
        }
        debug!("virtual bus {} opened at {}", bus, bit_rate);
        state.sink = Some(sink);
        state.bus = Some(bus.to_string());
        Ok(())
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        state.sink = None;
        state.bus = None;
    }

    fn is_open(&self) -> bool {
        lock(&self.state).sink.is_some()
    }

    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        let sink = state.sink.clone().ok_or(TransportError::NotOpen)?;

        state.sent.push(*frame);

        let replies = match state.responder.as_mut() {
            Some(responder) => responder(frame),
            None => Vec::new(),
        };

        if state.echo {
            sink.deliver(*frame, true);
        }
        for reply in replies {
            sink.deliver(reply, false);
        }
        Ok(())
    }

    fn enumerate(&self) -> Result<Vec<String>, TransportError> {
        Ok(vec!["virtual0".to_string()])
    }
}
