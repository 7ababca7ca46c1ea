//! Client side of one SDO transfer.
//!
//! `pump` drives the sending side once per worker cycle; `on_reply` consumes
//! one server frame. Both return the frame to put on the bus, if any.

use super::{Direction, SdoCallback, SdoHandle, SdoState, SdoStatus};
use canopen_common::sdo::{
    self, specifier, CommandByte, ABORT_INVALID_COMMAND, ABORT_OUT_OF_MEMORY, SEGMENT_DATA_LEN,
};
use canopen_common::Frame;
use log::{debug, warn};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Largest segmented upload a server may announce.
const MAX_UPLOAD_SIZE: u32 = 1024 * 1024;

/// Result of feeding a reply to a transfer.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    pub terminal: bool,
    pub send: Option<Frame>,
}

impl Progress {
    fn done() -> Self {
        Self {
            terminal: true,
            send: None,
        }
    }

    fn next(frame: Frame) -> Self {
        Self {
            terminal: false,
            send: Some(frame),
        }
    }
}

pub(crate) struct SdoTransfer {
    node: u8,
    index: u16,
    subindex: u8,
    direction: Direction,
    /// Bytes to write, or the read result being assembled.
    payload: Vec<u8>,
    state: SdoState,
    expedited: bool,
    /// Whether a segmented upload announced its size.
    size_known: bool,
    total_expected: u32,
    total_transferred: u32,
    toggle: bool,
    deadline: Option<Instant>,
    timeout: Duration,
    abort_code: Option<u32>,
    on_complete: Option<SdoCallback>,
    status: watch::Sender<SdoStatus>,
}

impl SdoTransfer {
    pub fn read(
        node: u8,
        index: u16,
        subindex: u8,
        timeout: Duration,
        on_complete: Option<SdoCallback>,
    ) -> (Self, SdoHandle) {
        Self::new(node, index, subindex, Direction::Read, Vec::new(), timeout, on_complete)
    }

    /// `payload` must not be empty; the public API rejects empty writes.
    pub fn write(
        node: u8,
        index: u16,
        subindex: u8,
        payload: Vec<u8>,
        timeout: Duration,
        on_complete: Option<SdoCallback>,
    ) -> (Self, SdoHandle) {
        Self::new(node, index, subindex, Direction::Write, payload, timeout, on_complete)
    }

    fn new(
        node: u8,
        index: u16,
        subindex: u8,
        direction: Direction,
        payload: Vec<u8>,
        timeout: Duration,
        on_complete: Option<SdoCallback>,
    ) -> (Self, SdoHandle) {
        let (status, receiver) = watch::channel(SdoStatus {
            node,
            index,
            subindex,
            direction,
            state: SdoState::Init,
            data: payload.clone(),
            abort_code: None,
        });

        let transfer = Self {
            node,
            index,
            subindex,
            direction,
            payload,
            state: SdoState::Init,
            expedited: false,
            size_known: false,
            total_expected: 0,
            total_transferred: 0,
            toggle: false,
            deadline: None,
            timeout,
            abort_code: None,
            on_complete,
            status,
        };
        (transfer, SdoHandle::new(receiver))
    }

    pub fn node(&self) -> u8 {
        self.node
    }

    pub fn state(&self) -> SdoState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Sending side. Arms the deadline and issues the initiate frame on the
    /// first call; afterwards only checks for expiry.
    pub fn pump(&mut self, now: Instant) -> Option<Frame> {
        if self.state.is_terminal() {
            return None;
        }

        if self.state != SdoState::Init {
            if self.deadline.is_some_and(|deadline| now >= deadline) {
                debug!(
                    "SDO timeout on node {} {:04X}/{:02X}",
                    self.node, self.index, self.subindex
                );
                self.finish(SdoState::Timeout);
            }
            return None;
        }

        self.deadline = Some(now + self.timeout);
        self.set_state(SdoState::Sent);
        Some(self.initiate_frame())
    }

    fn initiate_frame(&mut self) -> Frame {
        match self.direction {
            Direction::Read => sdo::upload_request(self.node, self.index, self.subindex),
            Direction::Write => {
                if let Some(frame) =
                    sdo::expedited_download_request(self.node, self.index, self.subindex, &self.payload)
                {
                    self.expedited = true;
                    return frame;
                }

                // Bigger than 4 bytes we use segmented transfer
                self.expedited = false;
                self.total_expected = self.payload.len() as u32;
                self.total_transferred = 0;
                sdo::segmented_download_request(self.node, self.index, self.subindex, self.total_expected)
            }
        }
    }

    /// Receiving side. `frame` is an 8-byte reply on this node's SDO reply
    /// COB-ID.
    pub fn on_reply(&mut self, frame: &Frame, now: Instant) -> Progress {
        if self.state.is_terminal() {
            return Progress::done();
        }

        let data = frame.data();
        let command = CommandByte::decode(data[0]);
        self.deadline = Some(now + self.timeout);

        match (command.specifier, self.direction) {
            (specifier::ABORT, _) => {
                let code = sdo::data_word(data);
                debug!(
                    "SDO abort 0x{:08X} on node {} {:04X}/{:02X}",
                    code, self.node, self.index, self.subindex
                );
                self.abort_code = Some(code);
                self.finish(SdoState::Error);
                Progress::done()
            }

            (specifier::DOWNLOAD_ACK, Direction::Write) => {
                if self.expedited {
                    self.finish(SdoState::Finished);
                    return Progress::done();
                }
                self.set_state(SdoState::Handshake);
                self.toggle = false;
                Progress::next(self.next_download_segment())
            }

            (specifier::DOWNLOAD_SEGMENT_ACK, Direction::Write) => {
                self.check_toggle(command.toggle);
                if self.total_transferred >= self.total_expected {
                    self.finish(SdoState::Finished);
                    return Progress::done();
                }
                self.toggle = !self.toggle;
                Progress::next(self.next_download_segment())
            }

            (specifier::INITIATE_UPLOAD, Direction::Read) if command.expedited => {
                let len = command.expedited_len();
                self.payload = data[4..4 + len].to_vec();
                self.finish(SdoState::Finished);
                Progress::done()
            }

            (specifier::INITIATE_UPLOAD, Direction::Read) => {
                self.size_known = command.size_indicated;
                self.total_expected = if self.size_known { sdo::data_word(data) } else { 0 };
                if self.total_expected > MAX_UPLOAD_SIZE {
                    warn!(
                        "node {} announced {} bytes for {:04X}/{:02X}",
                        self.node, self.total_expected, self.index, self.subindex
                    );
                    return self.abort(ABORT_OUT_OF_MEMORY);
                }
                self.total_transferred = 0;
                self.payload = Vec::with_capacity(self.total_expected as usize);
                self.toggle = false;
                self.set_state(SdoState::Handshake);
                Progress::next(sdo::upload_segment_request(self.node, self.toggle))
            }

            (specifier::SEGMENT, Direction::Read) => {
                self.check_toggle(command.toggle);
                self.store_segment(&data[1..1 + command.segment_len()]);

                // Segments are padded to seven bytes on the wire
                self.total_transferred += SEGMENT_DATA_LEN as u32;

                let more = !self.size_known || self.total_transferred < self.total_expected;
                if more && !command.last {
                    self.toggle = !self.toggle;
                    return Progress::next(sdo::upload_segment_request(self.node, self.toggle));
                }
                if self.size_known {
                    self.payload.resize(self.total_expected as usize, 0);
                }
                self.finish(SdoState::Finished);
                Progress::done()
            }

            _ => {
                warn!(
                    "unexpected SDO command 0x{:02X} from node {} during {:?}",
                    data[0], self.node, self.direction
                );
                self.abort(ABORT_INVALID_COMMAND)
            }
        }
    }

    /// End in `Error` and tell the server why.
    fn abort(&mut self, code: u32) -> Progress {
        self.abort_code = Some(code);
        self.finish(SdoState::Error);
        Progress {
            terminal: true,
            send: Some(sdo::abort_request(self.node, self.index, self.subindex, code)),
        }
    }

    fn next_download_segment(&mut self) -> Frame {
        let start = self.total_transferred as usize;
        let end = (start + SEGMENT_DATA_LEN).min(self.payload.len());
        let last = end >= self.payload.len();

        let frame = sdo::download_segment_request(self.node, self.toggle, last, &self.payload[start..end]);
        self.total_transferred = end as u32;
        frame
    }

    fn store_segment(&mut self, bytes: &[u8]) {
        if !self.size_known {
            self.payload.extend_from_slice(bytes);
            return;
        }

        // Bytes past the announced size are dropped
        let offset = self.total_transferred as usize;
        let end = (offset + bytes.len()).min(self.total_expected as usize);
        if end > offset {
            if self.payload.len() < end {
                self.payload.resize(end, 0);
            }
            self.payload[offset..end].copy_from_slice(&bytes[..end - offset]);
        }
    }

    /// Mismatches are logged and otherwise accepted.
    fn check_toggle(&self, received: bool) {
        if received != self.toggle {
            warn!(
                "SDO toggle mismatch from node {} {:04X}/{:02X}: expected {}, got {}",
                self.node, self.index, self.subindex, self.toggle as u8, received as u8
            );
        }
    }

    fn snapshot(&self) -> SdoStatus {
        SdoStatus {
            node: self.node,
            index: self.index,
            subindex: self.subindex,
            direction: self.direction,
            state: self.state,
            data: self.payload.clone(),
            abort_code: self.abort_code,
        }
    }

    fn set_state(&mut self, state: SdoState) {
        self.state = state;
        self.status.send_replace(self.snapshot());
    }

    fn finish(&mut self, state: SdoState) {
        self.set_state(state);
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(&self.snapshot());
        }
    }
}
