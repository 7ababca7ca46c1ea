//! Admission of SDO transfers: a single FIFO of pending transfers and at
//! most one active transfer per node.

use super::transfer::{Progress, SdoTransfer};
use crate::error::WorkerFault;
use canopen_common::Frame;
use log::{debug, error};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

pub(crate) struct TransferManager {
    pending: VecDeque<SdoTransfer>,
    active: BTreeMap<u8, SdoTransfer>,
    /// Shared with the public API, which increments it on submission.
    pending_count: Arc<AtomicUsize>,
}

impl TransferManager {
    pub fn new(pending_count: Arc<AtomicUsize>) -> Self {
        Self {
            pending: VecDeque::new(),
            active: BTreeMap::new(),
            pending_count,
        }
    }

    pub fn enqueue(&mut self, transfer: SdoTransfer) {
        self.pending.push_back(transfer);
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[cfg(test)]
    pub fn is_active(&self, node: u8) -> bool {
        self.active.contains_key(&node)
    }

    /// The queue head can be promoted right now.
    pub fn has_admissible_head(&self) -> bool {
        self.pending
            .front()
            .is_some_and(|transfer| !self.active.contains_key(&transfer.node()))
    }

    /// Earliest timeout among active transfers.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.active.values().filter_map(SdoTransfer::deadline).min()
    }

    /// Route an SDO reply to the node's active transfer. Returns `None` when
    /// no transfer is active for `node`.
    pub fn on_reply(&mut self, node: u8, frame: &Frame, now: Instant) -> Option<Progress> {
        let transfer = self.active.get_mut(&node)?;
        let progress = transfer.on_reply(frame, now);
        if progress.terminal {
            debug!("SDO transfer on node {} ended: {}", node, transfer.state());
            self.active.remove(&node);
        }
        Some(progress)
    }

    /// One admission cycle: drive active transfers, drop finished ones, then
    /// promote the queue head if its node is free. Outgoing frames are
    /// appended to `outbox`.
    pub fn pump(&mut self, now: Instant, outbox: &mut Vec<Frame>) -> Result<(), WorkerFault> {
        for transfer in self.active.values_mut() {
            outbox.extend(transfer.pump(now));
        }
        self.active.retain(|_, transfer| !transfer.state().is_terminal());

        // Strict FIFO: a busy node at the head blocks everything behind it
        if !self.has_admissible_head() {
            return Ok(());
        }
        let Some(mut transfer) = self.pending.pop_front() else {
            return Ok(());
        };
        self.pending_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1))
            .ok();

        let node = transfer.node();
        if self.active.contains_key(&node) {
            error!("node {} already has an active SDO transfer", node);
            return Err(WorkerFault::DuplicateActivation(node));
        }

        outbox.extend(transfer.pump(now));
        if !transfer.state().is_terminal() {
            self.active.insert(node, transfer);
        }
        Ok(())
    }
}
