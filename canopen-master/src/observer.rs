//! Per-class notification topics.
//!
//! Each CANopen message class has its own topic. Subscribers get an
//! unbounded receiver; dropped receivers are pruned on the next publish.

use crate::lock;
use canopen_common::Frame;
use chrono::{DateTime, Local};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// A frame as observed by the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct FrameEvent {
    pub frame: Frame,
    pub timestamp: DateTime<Local>,
}

impl FrameEvent {
    pub fn now(frame: Frame) -> Self {
        Self {
            frame,
            timestamp: Local::now(),
        }
    }
}

/// All PDO frames collected in one dispatch pass.
#[derive(Debug, Clone)]
pub struct PdoBatch {
    pub frames: Vec<Frame>,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionEvent {
    pub connected: bool,
    pub timestamp: DateTime<Local>,
}

pub struct Topic<T> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> Topic<T> {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn publish(&self, event: T) {
        lock(&self.subscribers).retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

/// The notification channels of a master.
#[derive(Default)]
pub struct Observers {
    /// Connection opened or closed.
    pub connection: Topic<ConnectionEvent>,
    /// Every received frame except transport echoes.
    pub raw: Topic<FrameEvent>,
    /// SDO replies and requests seen on the bus.
    pub sdo: Topic<FrameEvent>,
    /// NMT commands.
    pub nmt: Topic<FrameEvent>,
    /// Heartbeat and bootup frames.
    pub nmt_state: Topic<FrameEvent>,
    pub pdo: Topic<PdoBatch>,
    pub emcy: Topic<FrameEvent>,
    pub lss: Topic<FrameEvent>,
    pub time: Topic<FrameEvent>,
    pub sync: Topic<FrameEvent>,
}

impl Observers {
    pub(crate) fn connection_changed(&self, connected: bool) {
        self.connection.publish(ConnectionEvent {
            connected,
            timestamp: Local::now(),
        });
    }
}
