//! Classification and routing of received frames.

use crate::lock;
use crate::nmt::{is_valid_node, NodeTracker};
use crate::observer::{FrameEvent, Observers, PdoBatch};
use crate::sdo::TransferManager;
use crate::transport::InboundFrame;
use canopen_common::cob::node_from_cob;
use canopen_common::{Frame, MessageClass};
use chrono::Local;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Receives the payload of a PDO with the COB-ID it was registered for.
pub type PdoHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// SDO frames are always full length.
const SDO_FRAME_LEN: usize = 8;

#[derive(Default)]
pub struct PdoHandlers {
    handlers: Mutex<HashMap<u16, PdoHandler>>,
}

impl PdoHandlers {
    /// Replaces any handler already registered for `cob_id`.
    pub fn register(&self, cob_id: u16, handler: PdoHandler) {
        lock(&self.handlers).insert(cob_id, handler);
    }

    pub fn unregister(&self, cob_id: u16) -> bool {
        lock(&self.handlers).remove(&cob_id).is_some()
    }

    fn get(&self, cob_id: u16) -> Option<PdoHandler> {
        lock(&self.handlers).get(&cob_id).cloned()
    }
}

pub(crate) struct Dispatcher {
    observers: Arc<Observers>,
    nodes: Arc<NodeTracker>,
    pdo_handlers: Arc<PdoHandlers>,
    pdo_batch: Vec<Frame>,
}

impl Dispatcher {
    pub fn new(observers: Arc<Observers>, nodes: Arc<NodeTracker>, pdo_handlers: Arc<PdoHandlers>) -> Self {
        Self {
            observers,
            nodes,
            pdo_handlers,
            pdo_batch: Vec::new(),
        }
    }

    /// Route one frame. SDO replies go to `manager`; any frame a transfer
    /// wants sent in response is appended to `outbox`.
    pub fn dispatch(
        &mut self,
        inbound: InboundFrame,
        manager: &mut TransferManager,
        now: Instant,
        outbox: &mut Vec<Frame>,
    ) {
        let frame = inbound.frame;
        let event = FrameEvent::now(frame);
        if !inbound.bridge {
            self.observers.raw.publish(event);
        }

        match MessageClass::classify(frame.cob_id()) {
            MessageClass::NmtCommand => self.observers.nmt.publish(event),
            MessageClass::Sync => self.observers.sync.publish(event),
            MessageClass::Emergency => self.observers.emcy.publish(event),
            MessageClass::Time => self.observers.time.publish(event),
            MessageClass::Lss => self.observers.lss.publish(event),

            MessageClass::Pdo => {
                if let Some(handler) = self.pdo_handlers.get(frame.cob_id()) {
                    handler(frame.data());
                }
                self.pdo_batch.push(frame);
            }

            MessageClass::SdoReply => {
                if frame.len() != SDO_FRAME_LEN {
                    warn!("dropping SDO reply with length {}: {}", frame.len(), frame);
                    return;
                }

                let node = node_from_cob(frame.cob_id());
                match manager.on_reply(node, &frame, now) {
                    Some(progress) => outbox.extend(progress.send),
                    None => debug!("SDO reply from node {} with no active transfer", node),
                }
                self.observers.sdo.publish(event);
            }

            MessageClass::SdoRequest => self.observers.sdo.publish(event),

            MessageClass::NmtState => {
                let node = node_from_cob(frame.cob_id());
                if is_valid_node(node) {
                    match frame.data().first() {
                        Some(&code) => {
                            self.nodes.update(node, code, now);
                        }
                        None => {
                            debug!("empty NMT state frame {}, state kept", frame);
                            self.nodes.touch(node, now);
                        }
                    }
                }
                self.observers.nmt_state.publish(event);
            }

            MessageClass::Unknown => debug!("unclassified frame {}", frame),
        }
    }

    /// Announce the PDOs collected since the last flush, if any.
    pub fn flush_pdo_batch(&mut self) {
        if self.pdo_batch.is_empty() {
            return;
        }
        self.observers.pdo.publish(PdoBatch {
            frames: std::mem::take(&mut self.pdo_batch),
            timestamp: Local::now(),
        });
    }
}
