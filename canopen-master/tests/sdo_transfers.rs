//! SDO transfers between the master and a simulated node on a virtual bus.

use canopen_master::{
    BitRate, CanOpenMaster, Frame, MasterConfig, MasterError, SdoCallback, SdoState, SdoStatus,
    VirtualBus,
};
use mock_canopen_node::{NodeSimulator, ObjectDictionary};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NODE: u8 = 4;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A bus on which the given nodes answer every frame the master sends.
fn simulated_bus(node_ids: &[u8]) -> VirtualBus {
    let mut nodes: Vec<NodeSimulator> = node_ids
        .iter()
        .map(|&node_id| {
            let mut dict = ObjectDictionary::new();
            dict.add_test_objects(node_id);
            let mut node = NodeSimulator::new(node_id, dict);
            node.boot();
            node
        })
        .collect();

    VirtualBus::with_responder(move |frame| {
        nodes
            .iter_mut()
            .flat_map(|node| node.handle_frame(frame))
            .collect()
    })
}

fn open_master(bus: &VirtualBus) -> CanOpenMaster {
    init_logging();
    let master = CanOpenMaster::new(bus.clone(), MasterConfig::default());
    master.open("virtual0", BitRate::Kbps500).unwrap();
    master
}

fn requests_to(bus: &VirtualBus, node: u8) -> Vec<Frame> {
    bus.sent()
        .into_iter()
        .filter(|frame| frame.cob_id() == 0x600 + node as u16)
        .collect()
}

/// Let the worker process everything that is queued.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn counting_callback() -> (SdoCallback, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let callback: SdoCallback = Box::new(move |_: &SdoStatus| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (callback, calls)
}

#[tokio::test]
async fn test_expedited_write_takes_one_round_trip() {
    let bus = simulated_bus(&[NODE]);
    let master = open_master(&bus);

    for len in 1..=4usize {
        bus.clear_sent();
        let payload = vec![0xA5; len];
        let mut handle = master
            .write_sdo(NODE, 0x2100, 0x02, payload.clone(), None)
            .unwrap();

        let status = handle.finished().await.unwrap();
        assert_eq!(status.state, SdoState::Finished, "{} byte write", len);

        let requests = requests_to(&bus, NODE);
        assert_eq!(requests.len(), 1);
        assert_eq!(&requests[0].data()[4..4 + len], payload.as_slice());

        let mut read = master.read_sdo(NODE, 0x2100, 0x02, None).unwrap();
        assert_eq!(read.finished().await.unwrap().data, payload);
    }
}

#[tokio::test]
async fn test_segmented_write_alternates_toggle() {
    let bus = simulated_bus(&[NODE]);
    let master = open_master(&bus);
    let payload: Vec<u8> = (1..=20).collect();

    let mut handle = master
        .write_sdo(NODE, 0x2100, 0x02, payload.clone(), None)
        .unwrap();
    assert_eq!(handle.finished().await.unwrap().state, SdoState::Finished);

    // Initiate plus ceil(20 / 7) segments
    let requests = requests_to(&bus, NODE);
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[0].data()[0], 0x21);
    let commands: Vec<u8> = requests[1..].iter().map(|frame| frame.data()[0]).collect();
    assert_eq!(commands, vec![0x00, 0x10, 0x03]);

    let mut read = master.read_sdo(NODE, 0x2100, 0x02, None).unwrap();
    assert_eq!(read.finished().await.unwrap().data, payload);
}

#[tokio::test]
async fn test_reads_return_server_bytes() {
    let bus = simulated_bus(&[NODE]);
    let master = open_master(&bus);

    let mut device_type = master.read_sdo(NODE, 0x1000, 0x00, None).unwrap();
    let status = device_type.finished().await.unwrap();
    assert!(status.is_success());
    assert_eq!(status.value::<u32>(), Ok(0x191));

    let mut name = master.read_sdo(NODE, 0x1008, 0x00, None).unwrap();
    assert_eq!(name.finished().await.unwrap().data, b"MockCANopenNode".to_vec());
}

#[tokio::test]
async fn test_typed_write_and_read() {
    let bus = simulated_bus(&[NODE]);
    let master = open_master(&bus);

    let mut write = master
        .write_sdo_value(NODE, 0x2003, 0x02, 0x0006u16, None)
        .unwrap();
    assert!(write.finished().await.unwrap().is_success());

    let mut read = master.read_sdo(NODE, 0x2003, 0x02, None).unwrap();
    assert_eq!(read.finished().await.unwrap().value::<u16>(), Ok(0x0006));
}

#[tokio::test]
async fn test_abort_reaches_caller() {
    let bus = simulated_bus(&[NODE]);
    let master = open_master(&bus);
    let (callback, calls) = counting_callback();

    let mut handle = master.read_sdo(NODE, 0x3000, 0x00, Some(callback)).unwrap();
    let status = handle.finished().await.unwrap();

    assert_eq!(status.state, SdoState::Error);
    assert_eq!(status.abort_code, Some(0x0602_0000));
    assert_eq!(status.abort_description().unwrap(), "Object does not exist in the object dictionary");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_silent_node_times_out_once() {
    let bus = simulated_bus(&[NODE]);
    let master = open_master(&bus);
    let (callback, calls) = counting_callback();

    let start = tokio::time::Instant::now();
    let mut handle = master.read_sdo(9, 0x1000, 0x00, Some(callback)).unwrap();
    let status = handle.finished().await.unwrap();

    assert_eq!(status.state, SdoState::Timeout);
    assert!(start.elapsed() >= Duration::from_millis(1000));
    assert!(start.elapsed() < Duration::from_millis(1100));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The node slot is free again
    let mut next = master.read_sdo(NODE, 0x1000, 0x00, None).unwrap();
    assert!(next.finished().await.unwrap().is_success());
}

#[tokio::test(start_paused = true)]
async fn test_one_active_transfer_per_node() {
    init_logging();
    let bus = VirtualBus::new();
    let master = open_master(&bus);

    let mut first = master.read_sdo(NODE, 0x1000, 0x00, None).unwrap();
    let second = master.read_sdo(NODE, 0x1001, 0x00, None).unwrap();
    let other = master.read_sdo(5, 0x1000, 0x00, None).unwrap();
    settle().await;

    // The second node-4 read blocks the queue head, node 5 waits behind it
    assert_eq!(bus.sent().len(), 1);
    assert_eq!(master.pending_sdo_count(), 2);
    assert_eq!(second.state(), SdoState::Init);
    assert_eq!(other.state(), SdoState::Init);

    bus.inject(Frame::new(0x584, &[0x4F, 0x00, 0x10, 0x00, 0x01, 0, 0, 0]).unwrap());
    assert!(first.finished().await.unwrap().is_success());
    settle().await;

    assert_eq!(second.state(), SdoState::Sent);
    assert_eq!(other.state(), SdoState::Sent);
    assert_eq!(master.pending_sdo_count(), 0);
    let sent: Vec<u16> = bus.sent().iter().map(Frame::cob_id).collect();
    assert_eq!(sent, vec![0x604, 0x604, 0x605]);
}

#[tokio::test(start_paused = true)]
async fn test_short_reply_is_ignored() {
    let bus = VirtualBus::new();
    let master = open_master(&bus);

    let mut handle = master.read_sdo(NODE, 0x1000, 0x00, None).unwrap();
    settle().await;
    bus.inject(Frame::new(0x584, &[0x4F, 0x00, 0x10, 0x00, 0x01]).unwrap());
    settle().await;
    assert_eq!(handle.state(), SdoState::Sent);

    bus.inject(Frame::new(0x584, &[0x4F, 0x00, 0x10, 0x00, 0x07, 0, 0, 0]).unwrap());
    assert_eq!(handle.finished().await.unwrap().data, vec![0x07]);
}

#[tokio::test]
async fn test_close_abandons_transfers() {
    let bus = VirtualBus::new();
    let master = open_master(&bus);
    let (callback, calls) = counting_callback();

    let mut handle = master.read_sdo(NODE, 0x1000, 0x00, Some(callback)).unwrap();
    settle().await;
    master.close();

    assert!(matches!(handle.finished().await, Err(MasterError::TransferAbandoned)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(master.pending_sdo_count(), 0);
    assert!(!master.is_open());
    assert!(master.fault().is_none());
}
