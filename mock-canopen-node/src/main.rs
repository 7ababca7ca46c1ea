//! # Mock CANopen Node
//!
//! Runs the simulated device on a SocketCAN interface.
//!
//! ## Usage
//!
//! ```bash
//! # Start the mock node on vcan0 with node ID 4
//! cargo run -p mock-canopen-node -- --interface vcan0 --node-id 4
//! ```

use canopen_common::Frame;
use clap::Parser;
use log::{debug, error, info, warn};
use mock_canopen_node::{NodeSimulator, ObjectDictionary};
use socketcan::{CanFrame, CanSocket, Socket};
use std::io;
use std::process::ExitCode;
use std::time::{Duration, Instant};

#[derive(Debug, Parser)]
#[clap(author, version, about = "Simulated CANopen node")]
struct Args {
    /// CAN interface to attach to
    #[clap(short, long, default_value = "vcan0")]
    interface: String,

    /// Node id (1-127)
    #[clap(short, long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(1..=127))]
    node_id: u8,

    /// Heartbeat period in milliseconds, 0 disables the heartbeat
    #[clap(long, default_value_t = 1000)]
    heartbeat_ms: u64,

    /// TPDO1 period in milliseconds while operational
    #[clap(long, default_value_t = 100)]
    tpdo_ms: u64,
}

fn send(socket: &CanSocket, frame: &Frame) {
    match CanFrame::try_from(frame) {
        Ok(can_frame) => {
            if let Err(e) = socket.write_frame(&can_frame) {
                warn!("failed to send {}: {}", frame, e);
            }
        }
        Err(e) => warn!("cannot encode {}: {}", frame, e),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let socket = match CanSocket::open(&args.interface) {
        Ok(socket) => socket,
        Err(e) => {
            error!("failed to open {}: {}", args.interface, e);
            error!("create a virtual interface with:");
            error!("  sudo modprobe vcan");
            error!("  sudo ip link add dev vcan0 type vcan");
            error!("  sudo ip link set up vcan0");
            return ExitCode::FAILURE;
        }
    };

    // Set read timeout to avoid busy-waiting
    if let Err(e) = socket.set_read_timeout(Duration::from_millis(10)) {
        error!("failed to set socket timeout: {}", e);
        return ExitCode::FAILURE;
    }

    let mut object_dict = ObjectDictionary::new();
    object_dict.add_test_objects(args.node_id);
    info!("object dictionary loaded with {} objects", object_dict.len());
    for line in object_dict.summary() {
        info!("  {}", line);
    }

    let mut node = NodeSimulator::new(args.node_id, object_dict);
    send(&socket, &node.boot());
    info!(
        "node {} running on {}: SDO on 0x{:03X}, TPDO1 on 0x{:03X}",
        args.node_id,
        args.interface,
        0x600 + args.node_id as u16,
        0x180 + args.node_id as u16
    );

    let heartbeat_interval = Duration::from_millis(args.heartbeat_ms);
    let tpdo_interval = Duration::from_millis(args.tpdo_ms);
    let mut last_heartbeat = Instant::now();
    let mut last_tpdo = Instant::now();

    loop {
        match socket.read_frame() {
            Ok(can_frame) => match Frame::try_from(&can_frame) {
                Ok(frame) => {
                    for reply in node.handle_frame(&frame) {
                        send(&socket, &reply);
                    }
                }
                Err(e) => debug!("skipping frame: {}", e),
            },
            Err(err) => {
                // Timeout or no data - this is normal, just continue
                if err.kind() != io::ErrorKind::WouldBlock && err.kind() != io::ErrorKind::TimedOut {
                    warn!("CAN read error: {}", err);
                }
            }
        }

        if args.heartbeat_ms > 0 && last_heartbeat.elapsed() >= heartbeat_interval {
            send(&socket, &node.heartbeat());
            last_heartbeat = Instant::now();
        }

        if last_tpdo.elapsed() >= tpdo_interval {
            if let Some(tpdo) = node.tpdo() {
                send(&socket, &tpdo);
            }
            last_tpdo = Instant::now();
        }
    }
}
