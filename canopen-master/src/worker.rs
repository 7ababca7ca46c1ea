//! The task that owns all mutable protocol state.
//!
//! Each iteration takes at most one inbound frame, dispatches it, then runs
//! one admission cycle of the transfer manager. When there is nothing to do
//! the worker sleeps until a frame, a new transfer, shutdown, or the next
//! transfer deadline.

use crate::dispatch::Dispatcher;
use crate::error::WorkerFault;
use crate::sdo::{SdoTransfer, TransferManager};
use crate::transport::{BusEvent, Transport};
use canopen_common::Frame;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

enum Wake {
    Shutdown,
    Frame(Option<BusEvent>),
    Request(Option<SdoTransfer>),
    Deadline,
}

pub(crate) struct Worker {
    transport: Arc<dyn Transport>,
    inbound: mpsc::UnboundedReceiver<BusEvent>,
    requests: mpsc::UnboundedReceiver<SdoTransfer>,
    shutdown: watch::Receiver<bool>,
    dispatcher: Dispatcher,
    manager: TransferManager,
    outbox: Vec<Frame>,
}

impl Worker {
    pub fn new(
        transport: Arc<dyn Transport>,
        inbound: mpsc::UnboundedReceiver<BusEvent>,
        requests: mpsc::UnboundedReceiver<SdoTransfer>,
        shutdown: watch::Receiver<bool>,
        dispatcher: Dispatcher,
        manager: TransferManager,
    ) -> Self {
        Self {
            transport,
            inbound,
            requests,
            shutdown,
            dispatcher,
            manager,
            outbox: Vec::new(),
        }
    }

    /// Runs until shutdown. Returns an error when the transport fails or
    /// an invariant breaks.
    pub async fn run(mut self) -> Result<(), WorkerFault> {
        debug!("worker started");

        loop {
            self.drain_requests();

            let mut next = match self.inbound.try_recv() {
                Ok(event) => Some(event),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => return self.inbound_closed(),
            };

            if next.is_none() && !self.manager.has_admissible_head() {
                match self.wait().await {
                    Wake::Shutdown => break,
                    Wake::Frame(Some(event)) => next = Some(event),
                    Wake::Frame(None) => return self.inbound_closed(),
                    Wake::Request(Some(transfer)) => self.manager.enqueue(transfer),
                    // The master owns the sender for as long as the link is open
                    Wake::Request(None) => break,
                    Wake::Deadline => {}
                }
            }

            // Abandon everything once shutdown is requested
            if *self.shutdown.borrow() {
                break;
            }

            let now = Instant::now();
            match next {
                Some(BusEvent::Frame(inbound)) => {
                    self.dispatcher
                        .dispatch(inbound, &mut self.manager, now, &mut self.outbox);
                }
                Some(BusEvent::Failed(e)) => return Err(WorkerFault::Transport(Arc::new(e))),
                None => {}
            }
            self.dispatcher.flush_pdo_batch();

            self.manager.pump(now, &mut self.outbox)?;
            self.flush_outbox();
        }

        debug!("worker stopped");
        Ok(())
    }

    fn drain_requests(&mut self) {
        while let Ok(transfer) = self.requests.try_recv() {
            self.manager.enqueue(transfer);
        }
    }

    async fn wait(&mut self) -> Wake {
        let deadline = self.manager.next_deadline();

        tokio::select! {
            biased;
            _ = self.shutdown.changed() => Wake::Shutdown,
            inbound = self.inbound.recv() => Wake::Frame(inbound),
            transfer = self.requests.recv() => Wake::Request(transfer),
            _ = sleep_until_deadline(deadline) => Wake::Deadline,
        }
    }

    fn flush_outbox(&mut self) {
        for frame in self.outbox.drain(..) {
            debug!("TX {}", frame);
            if let Err(e) = self.transport.send(&frame) {
                warn!("failed to send {}: {}", frame, e);
            }
        }
    }

    /// The transport drops its sink on close, so a closed queue is only a
    /// fault while shutdown has not been requested.
    fn inbound_closed(&self) -> Result<(), WorkerFault> {
        if *self.shutdown.borrow() {
            Ok(())
        } else {
            Err(WorkerFault::InboundClosed)
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmt::NodeTracker;
    use crate::observer::Observers;
    use crate::dispatch::PdoHandlers;
    use crate::error::TransportError;
    use crate::sdo::SdoState;
    use crate::transport::{BitRate, FrameSink, VirtualBus};
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Running {
        bus: VirtualBus,
        requests: mpsc::UnboundedSender<SdoTransfer>,
        shutdown: watch::Sender<bool>,
        task: tokio::task::JoinHandle<Result<(), WorkerFault>>,
    }

    fn start(bus: VirtualBus) -> Running {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        bus.open("virtual0", BitRate::default(), FrameSink::new(frame_tx)).unwrap();

        let (requests, request_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(
            Arc::new(Observers::default()),
            Arc::new(NodeTracker::new()),
            Arc::new(PdoHandlers::default()),
        );
        let worker = Worker::new(
            Arc::new(bus.clone()),
            frame_rx,
            request_rx,
            shutdown_rx,
            dispatcher,
            TransferManager::new(Arc::new(AtomicUsize::new(0))),
        );

        Running {
            bus,
            requests,
            shutdown,
            task: tokio::spawn(worker.run()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_read_times_out() {
        let running = start(VirtualBus::new());
        let (transfer, mut handle) = SdoTransfer::read(9, 0x1000, 0, Duration::from_millis(1000), None);
        running.requests.send(transfer).unwrap();

        let status = handle.finished().await.unwrap();
        assert_eq!(status.state, SdoState::Timeout);
        assert_eq!(running.bus.sent().len(), 1);

        running.shutdown.send(true).unwrap();
        assert!(running.task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_abandons_transfers() {
        let running = start(VirtualBus::new());
        let (transfer, mut handle) = SdoTransfer::read(9, 0x1000, 0, Duration::from_secs(60), None);
        running.requests.send(transfer).unwrap();
        tokio::task::yield_now().await;

        running.shutdown.send(true).unwrap();
        assert!(running.task.await.unwrap().is_ok());
        assert!(handle.finished().await.is_err());
    }

    #[tokio::test]
    async fn test_closed_inbound_queue_is_a_fault() {
        let running = start(VirtualBus::new());
        running.bus.close();
        assert!(matches!(
            running.task.await.unwrap(),
            Err(WorkerFault::InboundClosed)
        ));
    }

    #[tokio::test]
    async fn test_receive_failure_is_a_transport_fault() {
        let running = start(VirtualBus::new());
        assert!(running.bus.fail(TransportError::Io(io::Error::other("bus off"))));

        match running.task.await.unwrap() {
            Err(WorkerFault::Transport(e)) => {
                assert!(matches!(e.as_ref(), TransportError::Io(_)));
            }
            other => panic!("unexpected worker result: {:?}", other),
        }
    }
}
