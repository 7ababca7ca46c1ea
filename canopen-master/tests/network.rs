//! NMT tracking, PDO routing and observer topics over a virtual bus.

use canopen_master::{
    BitRate, CanOpenMaster, Frame, MasterConfig, NmtState, VirtualBus,
};
use mock_canopen_node::{NodeSimulator, ObjectDictionary};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn open_master(bus: &VirtualBus) -> CanOpenMaster {
    init_logging();
    let master = CanOpenMaster::new(bus.clone(), MasterConfig::default());
    master.open("virtual0", BitRate::Kbps500).unwrap();
    master
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_drive_node_state() {
    let bus = VirtualBus::new();
    let master = open_master(&bus);
    assert!(!master.is_node_found(5));

    bus.inject(Frame::new(0x705, &[0x00]).unwrap());
    settle().await;
    assert_eq!(master.node_state(5), NmtState::PreOperational);
    assert!(master.is_node_found(5));

    bus.inject(Frame::new(0x705, &[0x05]).unwrap());
    settle().await;
    assert_eq!(master.node_state(5), NmtState::Operational);
    assert!(master.check_guard(5, Duration::from_millis(500)));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!master.check_guard(5, Duration::from_millis(500)));
    assert!(!master.check_guard(6, Duration::from_millis(500)));

    // Traffic for another node does not refresh node 5
    bus.inject(Frame::new(0x706, &[0x05]).unwrap());
    settle().await;
    assert!(!master.check_guard(5, Duration::from_millis(500)));
    assert!(master.check_guard(6, Duration::from_millis(500)));
}

#[tokio::test]
async fn test_reset_node_reports_bootup() {
    let mut dict = ObjectDictionary::new();
    dict.add_test_objects(4);
    let mut node = NodeSimulator::new(4, dict);
    node.boot();
    let bus = VirtualBus::with_responder(move |frame| node.handle_frame(frame));
    let master = open_master(&bus);

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = transitions.clone();
    master.on_state_change(4, move |node_id, state| {
        seen.lock().unwrap().push((node_id, state));
    });

    master.nmt_reset_node(4).unwrap();
    settle().await;
    master.nmt_reset_node(4).unwrap();
    settle().await;

    // Every bootup is reported, even without a state change
    assert_eq!(
        *transitions.lock().unwrap(),
        vec![(4, NmtState::PreOperational), (4, NmtState::PreOperational)]
    );
    assert_eq!(master.node_snapshot(4).state, NmtState::PreOperational);
}

#[tokio::test]
async fn test_pdo_handlers_and_batches() {
    let bus = VirtualBus::new();
    let master = open_master(&bus);
    let mut batches = master.events().pdo.subscribe();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    master.register_pdo_handler(0x184, move |payload| {
        sink.lock().unwrap().push(payload.to_vec());
    });
    master.register_pdo_handler(0x185, |_| panic!("wrong handler"));

    bus.inject(Frame::new(0x184, &[0x2E, 0x09, 0xF5, 0x03, 0x01]).unwrap());
    let batch = batches.recv().await.unwrap();
    assert_eq!(batch.frames.len(), 1);
    assert_eq!(batch.frames[0].cob_id(), 0x184);
    assert_eq!(*received.lock().unwrap(), vec![vec![0x2E, 0x09, 0xF5, 0x03, 0x01]]);

    assert!(master.unregister_pdo_handler(0x184));
    master.write_pdo(0x204, &[1, 2]).unwrap();
    assert_eq!(bus.sent()[0].data(), &[1, 2]);
}

#[tokio::test]
async fn test_topics_per_class() {
    let bus = VirtualBus::new();
    let master = open_master(&bus);
    let events = master.events();
    let mut raw = events.raw.subscribe();
    let mut sync = events.sync.subscribe();
    let mut emcy = events.emcy.subscribe();
    let mut time = events.time.subscribe();
    let mut lss = events.lss.subscribe();
    let mut nmt = events.nmt.subscribe();

    for (cob_id, data) in [
        (0x080, vec![]),
        (0x084, vec![0x10, 0x81, 0x11, 0, 0, 0, 0, 0]),
        (0x100, vec![0, 0, 0, 0, 0, 0]),
        (0x7E5, vec![0x04, 0x01]),
        (0x000, vec![0x01, 0x04]),
    ] {
        bus.inject(Frame::new(cob_id, &data).unwrap());
    }

    assert_eq!(sync.recv().await.unwrap().frame.cob_id(), 0x080);
    assert_eq!(emcy.recv().await.unwrap().frame.cob_id(), 0x084);
    assert_eq!(time.recv().await.unwrap().frame.cob_id(), 0x100);
    assert_eq!(lss.recv().await.unwrap().frame.cob_id(), 0x7E5);
    assert_eq!(nmt.recv().await.unwrap().frame.cob_id(), 0x000);

    let mut order = Vec::new();
    for _ in 0..5 {
        order.push(raw.recv().await.unwrap().frame.cob_id());
    }
    assert_eq!(order, vec![0x080, 0x084, 0x100, 0x7E5, 0x000]);
}

#[tokio::test]
async fn test_echoed_frames_are_not_raw_traffic() {
    let bus = VirtualBus::new();
    bus.set_echo(true);
    let master = open_master(&bus);
    let mut raw = master.events().raw.subscribe();
    let mut nmt = master.events().nmt.subscribe();

    master.nmt_start(4).unwrap();
    assert_eq!(nmt.recv().await.unwrap().frame.data(), &[0x01, 0x04]);
    assert!(raw.try_recv().is_err());
}

#[tokio::test]
async fn test_configured_open_writes_trace() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = MasterConfig {
        can_interface: "virtual0".to_string(),
        enable_trace: true,
        trace_directory: Some(dir.path().to_string_lossy().into_owned()),
        ..MasterConfig::default()
    };
    let bus = VirtualBus::new();
    let master = CanOpenMaster::new(bus.clone(), config);

    master.open_configured().unwrap();
    assert_eq!(bus.bus_name().as_deref(), Some("virtual0"));
    bus.inject(Frame::new(0x181, &[0xAB]).unwrap());
    settle().await;
    master.close();

    let path = std::fs::read_dir(dir.path())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let mut contents = String::new();
    for _ in 0..100 {
        contents = std::fs::read_to_string(&path).unwrap();
        if contents.contains("Disconnected") {
            break;
        }
        settle().await;
    }

    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines[0], "Timestamp,Class,COB-ID,Length,Data");
    assert!(lines[1].ends_with(",CONNECTION,,,Connected"));
    assert!(lines[2].ends_with(",PDO,181,1,AB"));
    assert!(lines[3].ends_with(",CONNECTION,,,Disconnected"));
}
