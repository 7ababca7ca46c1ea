//! Per-node NMT lifecycle tracking.
//!
//! Records are created on first reference and live for the whole session.
//! Only the worker writes them; every other caller gets a copy.

use crate::lock;
use canopen_common::NmtState;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Called with `(node_id, new_state)` whenever a node's lifecycle changes
/// and on every bootup message.
pub type StateCallback = Arc<dyn Fn(u8, NmtState) + Send + Sync>;

/// Copy of a node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub node_id: u8,
    pub state: NmtState,
    pub last_seen: Option<Instant>,
}

#[derive(Default)]
struct NodeRecord {
    state: NmtState,
    last_seen: Option<Instant>,
    on_change: Option<StateCallback>,
}

pub(crate) fn is_valid_node(node_id: u8) -> bool {
    (1..=127).contains(&node_id)
}

#[derive(Default)]
pub struct NodeTracker {
    nodes: Mutex<HashMap<u8, NodeRecord>>,
}

impl NodeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, node_id: u8) -> NodeSnapshot {
        let mut nodes = lock(&self.nodes);
        let (state, last_seen) = if is_valid_node(node_id) {
            let record = nodes.entry(node_id).or_default();
            (record.state, record.last_seen)
        } else {
            (NmtState::Invalid, None)
        };
        NodeSnapshot {
            node_id,
            state,
            last_seen,
        }
    }

    pub fn state(&self, node_id: u8) -> NmtState {
        self.snapshot(node_id).state
    }

    pub fn is_found(&self, node_id: u8) -> bool {
        self.state(node_id) != NmtState::Invalid
    }

    /// True while the node's last NMT traffic is no older than `max_age`.
    /// A node that has never been heard from fails the check.
    pub fn check_guard(&self, node_id: u8, max_age: Duration, now: Instant) -> bool {
        match self.snapshot(node_id).last_seen {
            Some(last_seen) => now.saturating_duration_since(last_seen) <= max_age,
            None => false,
        }
    }

    pub fn set_callback(&self, node_id: u8, callback: StateCallback) {
        if is_valid_node(node_id) {
            lock(&self.nodes).entry(node_id).or_default().on_change = Some(callback);
        }
    }

    /// Refresh `last_seen` without touching the lifecycle state.
    pub(crate) fn touch(&self, node_id: u8, now: Instant) {
        if is_valid_node(node_id) {
            lock(&self.nodes).entry(node_id).or_default().last_seen = Some(now);
        }
    }

    /// Apply a heartbeat byte. `0x00` is the bootup message, which puts the
    /// node in pre-operational; any other byte is stored as-is.
    pub(crate) fn update(&self, node_id: u8, code: u8, now: Instant) -> NmtState {
        let bootup = code == 0x00;
        let state = if bootup {
            NmtState::PreOperational
        } else {
            NmtState::from_code(code)
        };

        let callback = {
            let mut nodes = lock(&self.nodes);
            let record = nodes.entry(node_id).or_default();
            let changed = record.state != state;
            record.state = state;
            record.last_seen = Some(now);

            if changed {
                debug!("node {} is now {}", node_id, state);
            }
            if changed || bootup {
                record.on_change.clone()
            } else {
                None
            }
        };

        // Outside the lock so the callback may query the tracker
        if let Some(callback) = callback {
            callback(node_id, state);
        }
        state
    }
}
