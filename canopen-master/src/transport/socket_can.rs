// socket_can.rs - Linux SocketCAN transport
use super::{BitRate, FrameSink, Transport};
use crate::error::TransportError;
use crate::lock;
use canopen_common::Frame;
use log::{debug, info, warn};
use socketcan::{CanFrame, CanSocket, Socket};
use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// How long a blocked read waits before re-checking the run flag.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

const SYS_CLASS_NET: &str = "/sys/class/net";

/// `ARPHRD_CAN` in the interface `type` attribute.
const ARPHRD_CAN: &str = "280";

struct Link {
    socket: Arc<CanSocket>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// Raw CAN socket on an interface such as `can0` or `vcan0`. The bit rate
/// is configured by the OS, so the requested rate is only logged.
#[derive(Default)]
pub struct SocketCanTransport {
    link: Mutex<Option<Link>>,
}

impl SocketCanTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for SocketCanTransport {
    fn open(&self, bus: &str, bit_rate: BitRate, sink: FrameSink) -> Result<(), TransportError> {
        let mut link = lock(&self.link);
        if link.is_some() {
            return Err(TransportError::AlreadyOpen);
        }

        let socket = CanSocket::open(bus).map_err(|source| TransportError::Open {
            bus: bus.to_string(),
            source,
        })?;

        // Set read timeout to avoid busy-waiting
        socket.set_read_timeout(READ_TIMEOUT)?;

        debug!("{} requested for {}; bit rate is set by the interface", bit_rate, bus);

        let socket = Arc::new(socket);
        let running = Arc::new(AtomicBool::new(true));

        let reader = {
            let socket = socket.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name("canopen-rx".to_string())
                .spawn(move || receive_loop(&socket, &running, &sink))?
        };

        info!("SocketCAN interface {} opened", bus);
        *link = Some(Link {
            socket,
            running,
            reader: Some(reader),
        });
        Ok(())
    }

    fn close(&self) {
        let Some(mut link) = lock(&self.link).take() else {
            return;
        };

        link.running.store(false, Ordering::SeqCst);
        if let Some(reader) = link.reader.take() {
            if reader.join().is_err() {
                warn!("CAN receive thread panicked");
            }
        }
        info!("SocketCAN interface closed");
    }

    fn is_open(&self) -> bool {
        lock(&self.link).is_some()
    }

    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let link = lock(&self.link);
        let link = link.as_ref().ok_or(TransportError::NotOpen)?;

        let can_frame = CanFrame::try_from(frame)?;
        link.socket.write_frame(&can_frame)?;
        Ok(())
    }

    /// CAN network interfaces (`can0`, `vcan0`, ...) known to the kernel.
    fn enumerate(&self) -> Result<Vec<String>, TransportError> {
        let mut interfaces = Vec::new();
        for entry in fs::read_dir(SYS_CLASS_NET)? {
            let entry = entry?;
            let is_can = fs::read_to_string(entry.path().join("type"))
                .map(|kind| kind.trim() == ARPHRD_CAN)
                .unwrap_or(false);
            if is_can {
                interfaces.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        interfaces.sort();
        Ok(interfaces)
    }
}

fn receive_loop(socket: &CanSocket, running: &AtomicBool, sink: &FrameSink) {
    while running.load(Ordering::SeqCst) {
        match socket.read_frame() {
            Ok(can_frame) => match Frame::try_from(&can_frame) {
                Ok(frame) => {
                    if !sink.deliver(frame, false) {
                        break; // Worker is gone
                    }
                }
                Err(e) => debug!("Skipping received frame: {}", e),
            },
            Err(err) => {
                // Timeout or no data - this is normal, just continue
                if err.kind() != io::ErrorKind::WouldBlock && err.kind() != io::ErrorKind::TimedOut {
                    warn!("CAN read error: {}", err);
                    sink.fail(TransportError::Io(err));
                    break;
                }
            }
        }
    }
    debug!("CAN receive thread exiting");
}
