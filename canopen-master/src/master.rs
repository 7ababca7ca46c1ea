//! The public face of the stack.

use crate::config::MasterConfig;
use crate::dispatch::{Dispatcher, PdoHandlers};
use crate::error::{MasterError, Result, WorkerFault};
use crate::lock;
use crate::nmt::{is_valid_node, NodeSnapshot, NodeTracker};
use crate::observer::Observers;
use crate::sdo::{SdoCallback, SdoHandle, SdoTransfer, TransferManager};
use crate::trace::TraceRecorder;
use crate::transport::{BitRate, FrameSink, Transport};
use crate::worker::Worker;
use canopen_common::nmt::ALL_NODES;
use canopen_common::{Frame, NmtCommand, NmtState, SdoValue};
use log::{error, info};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// State that exists only while the connection is open.
struct Link {
    /// Distinguishes this connection from later ones on the same master.
    epoch: u64,
    requests: mpsc::UnboundedSender<SdoTransfer>,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

/// A CANopen master on one bus.
///
/// All protocol work happens on a worker task spawned by [`open`]. The
/// methods here only validate, enqueue and read snapshots, so none of them
/// wait on the bus.
///
/// [`open`]: CanOpenMaster::open
pub struct CanOpenMaster {
    transport: Arc<dyn Transport>,
    config: MasterConfig,
    observers: Arc<Observers>,
    nodes: Arc<NodeTracker>,
    pdo_handlers: Arc<PdoHandlers>,
    pending: Arc<AtomicUsize>,
    fault: Arc<Mutex<Option<WorkerFault>>>,
    link: Arc<Mutex<Option<Link>>>,
    epoch: AtomicU64,
}

impl CanOpenMaster {
    pub fn new<T: Transport>(transport: T, config: MasterConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            config,
            observers: Arc::new(Observers::default()),
            nodes: Arc::new(NodeTracker::new()),
            pdo_handlers: Arc::new(PdoHandlers::default()),
            pending: Arc::new(AtomicUsize::new(0)),
            fault: Arc::new(Mutex::new(None)),
            link: Arc::new(Mutex::new(None)),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Notification topics, one per message class.
    pub fn events(&self) -> &Observers {
        &self.observers
    }

    /// Buses the transport can open.
    pub fn available_buses(&self) -> Result<Vec<String>> {
        Ok(self.transport.enumerate()?)
    }

    /// Open the bus and start the worker on the current tokio runtime.
    pub fn open(&self, bus: &str, bit_rate: BitRate) -> Result<()> {
        let mut link = lock(&self.link);
        if link.is_some() {
            return Err(MasterError::AlreadyOpen);
        }
        let runtime = Handle::try_current().map_err(|_| MasterError::NoRuntime)?;

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        self.transport.open(bus, bit_rate, FrameSink::new(frame_tx))?;

        let (requests, request_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(
            self.observers.clone(),
            self.nodes.clone(),
            self.pdo_handlers.clone(),
        );
        let worker = Worker::new(
            self.transport.clone(),
            frame_rx,
            request_rx,
            shutdown_rx,
            dispatcher,
            TransferManager::new(self.pending.clone()),
        );

        *lock(&self.fault) = None;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let teardown = Teardown {
            epoch,
            link: self.link.clone(),
            fault: self.fault.clone(),
            transport: self.transport.clone(),
            observers: self.observers.clone(),
            pending: self.pending.clone(),
        };
        let worker = runtime.spawn(async move {
            if let Err(e) = worker.run().await {
                teardown.on_fault(e);
            }
        });

        *link = Some(Link {
            epoch,
            requests,
            shutdown,
            worker,
        });

        // Announced under the lock so a worker fault cannot report the
        // disconnect first
        info!("connected to {} at {}", bus, bit_rate);
        self.observers.connection_changed(true);
        Ok(())
    }

    /// Open the configured interface, recording a bus trace if enabled.
    pub fn open_configured(&self) -> Result<()> {
        if !self.config.enable_trace {
            return self.open(&self.config.can_interface, self.config.bit_rate);
        }

        Handle::try_current().map_err(|_| MasterError::NoRuntime)?;
        let Some(directory) = self.config.trace_directory_or_default() else {
            return self.open(&self.config.can_interface, self.config.bit_rate);
        };

        // Subscribe before opening so the connect event is recorded. The
        // recorder stops by itself on the disconnect event.
        let recorder = TraceRecorder::create(&directory)?;
        let trace = recorder.attach(&self.observers);
        if let Err(e) = self.open(&self.config.can_interface, self.config.bit_rate) {
            trace.abort();
            return Err(e);
        }
        Ok(())
    }

    /// Stop the worker and close the bus. Queued and in-flight transfers
    /// are abandoned without their callbacks running.
    pub fn close(&self) {
        let Some(link) = lock(&self.link).take() else {
            return;
        };

        let _ = link.shutdown.send(true);
        drop(link.requests);
        link.worker.abort();
        disconnect(self.transport.as_ref(), &self.pending, &self.observers);
    }

    /// False again once the worker has stopped on a fault.
    pub fn is_open(&self) -> bool {
        lock(&self.link).is_some()
    }

    /// The fault that stopped the worker, if any.
    pub fn fault(&self) -> Option<WorkerFault> {
        lock(&self.fault).clone()
    }

    pub fn send_raw(&self, frame: Frame) -> Result<()> {
        if !self.is_open() {
            return Err(MasterError::NotOpen);
        }
        Ok(self.transport.send(&frame)?)
    }

    /// Queue a write. Up to 4 bytes are sent expedited, longer payloads are
    /// segmented.
    pub fn write_sdo(
        &self,
        node: u8,
        index: u16,
        subindex: u8,
        data: Vec<u8>,
        on_complete: Option<SdoCallback>,
    ) -> Result<SdoHandle> {
        check_node(node)?;
        if data.is_empty() {
            return Err(MasterError::EmptyPayload);
        }
        if u32::try_from(data.len()).is_err() {
            return Err(MasterError::PayloadTooLarge(data.len()));
        }

        let (transfer, handle) =
            SdoTransfer::write(node, index, subindex, data, self.config.sdo_timeout(), on_complete);
        self.submit(transfer)?;
        Ok(handle)
    }

    pub fn write_sdo_value<T: SdoValue>(
        &self,
        node: u8,
        index: u16,
        subindex: u8,
        value: T,
        on_complete: Option<SdoCallback>,
    ) -> Result<SdoHandle> {
        self.write_sdo(node, index, subindex, value.to_sdo_bytes(), on_complete)
    }

    /// Queue a read. Decode the result with [`SdoStatus::value`] or
    /// [`SdoStatus::decode`].
    ///
    /// [`SdoStatus::value`]: crate::SdoStatus::value
    /// [`SdoStatus::decode`]: crate::SdoStatus::decode
    pub fn read_sdo(
        &self,
        node: u8,
        index: u16,
        subindex: u8,
        on_complete: Option<SdoCallback>,
    ) -> Result<SdoHandle> {
        check_node(node)?;
        let (transfer, handle) =
            SdoTransfer::read(node, index, subindex, self.config.sdo_timeout(), on_complete);
        self.submit(transfer)?;
        Ok(handle)
    }

    fn submit(&self, transfer: SdoTransfer) -> Result<()> {
        let link = lock(&self.link);
        let link = link.as_ref().ok_or(MasterError::NotOpen)?;

        // Counted before the worker can see it, so promotion never underflows
        self.pending.fetch_add(1, Ordering::SeqCst);
        if link.requests.send(transfer).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(MasterError::NotOpen);
        }
        Ok(())
    }

    /// Transfers waiting for their node to become free.
    pub fn pending_sdo_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Route PDOs received on `cob_id` to `handler`, replacing any previous
    /// handler for that COB-ID. Runs on the worker.
    pub fn register_pdo_handler<F>(&self, cob_id: u16, handler: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.pdo_handlers.register(cob_id, Arc::new(handler));
    }

    pub fn unregister_pdo_handler(&self, cob_id: u16) -> bool {
        self.pdo_handlers.unregister(cob_id)
    }

    pub fn write_pdo(&self, cob_id: u16, data: &[u8]) -> Result<()> {
        self.send_raw(Frame::new(cob_id, data)?)
    }

    /// Send an NMT command to `node`, or to every node when `node` is 0.
    pub fn send_nmt(&self, command: NmtCommand, node: u8) -> Result<()> {
        if node != ALL_NODES {
            check_node(node)?;
        }
        self.send_raw(command.frame(node))
    }

    pub fn nmt_start(&self, node: u8) -> Result<()> {
        self.send_nmt(NmtCommand::Start, node)
    }

    pub fn nmt_preop(&self, node: u8) -> Result<()> {
        self.send_nmt(NmtCommand::EnterPreOperational, node)
    }

    pub fn nmt_stop(&self, node: u8) -> Result<()> {
        self.send_nmt(NmtCommand::Stop, node)
    }

    pub fn nmt_reset_node(&self, node: u8) -> Result<()> {
        self.send_nmt(NmtCommand::ResetNode, node)
    }

    pub fn nmt_reset_comms(&self, node: u8) -> Result<()> {
        self.send_nmt(NmtCommand::ResetCommunication, node)
    }

    pub fn node_state(&self, node: u8) -> NmtState {
        self.nodes.state(node)
    }

    pub fn node_snapshot(&self, node: u8) -> NodeSnapshot {
        self.nodes.snapshot(node)
    }

    /// The node has sent at least one heartbeat or bootup.
    pub fn is_node_found(&self, node: u8) -> bool {
        self.nodes.is_found(node)
    }

    /// True while the node was heard from within `max_age`.
    pub fn check_guard(&self, node: u8, max_age: Duration) -> bool {
        self.nodes.check_guard(node, max_age, Instant::now())
    }

    /// Called on the worker on every lifecycle change of `node` and on every
    /// bootup it sends. Replaces any previous callback for the node.
    pub fn on_state_change<F>(&self, node: u8, callback: F)
    where
        F: Fn(u8, NmtState) + Send + Sync + 'static,
    {
        self.nodes.set_callback(node, Arc::new(callback));
    }
}

impl Drop for CanOpenMaster {
    fn drop(&mut self) {
        self.close();
    }
}

/// What the worker task needs to close the connection when it stops on
/// its own.
struct Teardown {
    epoch: u64,
    link: Arc<Mutex<Option<Link>>>,
    fault: Arc<Mutex<Option<WorkerFault>>>,
    transport: Arc<dyn Transport>,
    observers: Arc<Observers>,
    pending: Arc<AtomicUsize>,
}

impl Teardown {
    fn on_fault(self, fault: WorkerFault) {
        error!("worker stopped: {}", fault);
        *lock(&self.fault) = Some(fault);

        let link = {
            let mut link = lock(&self.link);
            // A close and reopen may have raced the fault
            match link.as_ref() {
                Some(current) if current.epoch == self.epoch => link.take(),
                _ => None,
            }
        };
        if link.is_some() {
            disconnect(self.transport.as_ref(), &self.pending, &self.observers);
        }
    }
}

fn disconnect(transport: &dyn Transport, pending: &AtomicUsize, observers: &Observers) {
    transport.close();
    pending.store(0, Ordering::SeqCst);
    info!("connection closed");
    observers.connection_changed(false);
}

fn check_node(node: u8) -> Result<()> {
    if is_valid_node(node) {
        Ok(())
    } else {
        Err(MasterError::InvalidNodeId(node))
    }
}
