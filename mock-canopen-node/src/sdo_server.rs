//! SDO server answering upload and download requests from the dictionary

use crate::object_dictionary::ObjectDictionary;
use canopen_common::cob::sdo_request_cob;
use canopen_common::sdo::{
    self, specifier, CommandByte, ABORT_INVALID_COMMAND, ABORT_LENGTH_MISMATCH, ABORT_OBJECT_MISSING,
    ABORT_TOGGLE, EXPEDITED_MAX, SEGMENT_DATA_LEN,
};
use canopen_common::Frame;
use log::{debug, info, warn};

/// Segmented transfer in progress.
enum Session {
    Idle,
    Upload {
        index: u16,
        subindex: u8,
        data: Vec<u8>,
        offset: usize,
        toggle: bool,
    },
    Download {
        index: u16,
        subindex: u8,
        data: Vec<u8>,
        expected: Option<usize>,
        toggle: bool,
    },
}

pub struct SdoServer {
    node_id: u8,
    object_dict: ObjectDictionary,
    session: Session,
}

impl SdoServer {
    pub fn new(node_id: u8, object_dict: ObjectDictionary) -> Self {
        Self {
            node_id,
            object_dict,
            session: Session::Idle,
        }
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn object_dict(&self) -> &ObjectDictionary {
        &self.object_dict
    }

    /// Handle an incoming frame. Returns the reply if it was an SDO
    /// request for this node.
    pub fn handle_frame(&mut self, frame: &Frame) -> Option<Frame> {
        if frame.cob_id() != sdo_request_cob(self.node_id) {
            return None; // Not for us
        }
        if frame.len() != 8 {
            debug!("ignoring short SDO request {}", frame);
            return None;
        }

        let data = frame.data();
        let command = CommandByte::decode(data[0]);
        let (index, subindex) = sdo::multiplexer(data);

        match command.specifier {
            specifier::INITIATE_UPLOAD => self.initiate_upload(index, subindex),
            specifier::UPLOAD_SEGMENT => self.upload_segment(command),
            specifier::INITIATE_DOWNLOAD => self.initiate_download(index, subindex, command, data),
            specifier::SEGMENT => self.download_segment(command, data),
            specifier::ABORT => {
                warn!(
                    "client aborted 0x{:04X}:{:02X}: {}",
                    index,
                    subindex,
                    sdo::abort_code_description(sdo::data_word(data))
                );
                self.session = Session::Idle;
                None
            }
            _ => Some(self.abort(index, subindex, ABORT_INVALID_COMMAND)),
        }
    }

    fn initiate_upload(&mut self, index: u16, subindex: u8) -> Option<Frame> {
        info!("SDO upload request 0x{:04X}:{:02X}", index, subindex);

        let Some((data, data_type)) = self.object_dict.get(index, subindex) else {
            warn!("object not found: 0x{:04X}:{:02X}", index, subindex);
            return Some(self.abort(index, subindex, ABORT_OBJECT_MISSING));
        };
        debug!("uploading {:02X?} ({:?})", data, data_type);

        if !data.is_empty() && data.len() <= EXPEDITED_MAX {
            self.session = Session::Idle;
            return sdo::expedited_upload_response(self.node_id, index, subindex, &data);
        }

        let size = data.len() as u32;
        self.session = Session::Upload {
            index,
            subindex,
            data,
            offset: 0,
            toggle: false,
        };
        Some(sdo::segmented_upload_response(self.node_id, index, subindex, size))
    }

    fn upload_segment(&mut self, command: CommandByte) -> Option<Frame> {
        let node_id = self.node_id;
        let Session::Upload {
            index,
            subindex,
            data,
            offset,
            toggle,
        } = &mut self.session
        else {
            return Some(self.abort(0, 0, ABORT_INVALID_COMMAND));
        };

        if command.toggle != *toggle {
            let (index, subindex) = (*index, *subindex);
            self.session = Session::Idle;
            return Some(self.abort(index, subindex, ABORT_TOGGLE));
        }

        let end = (*offset + SEGMENT_DATA_LEN).min(data.len());
        let last = end >= data.len();
        let reply = sdo::upload_segment_response(node_id, *toggle, last, &data[*offset..end]);
        *offset = end;
        *toggle = !*toggle;

        if last {
            self.session = Session::Idle;
        }
        Some(reply)
    }

    fn initiate_download(&mut self, index: u16, subindex: u8, command: CommandByte, data: &[u8]) -> Option<Frame> {
        info!("SDO download request 0x{:04X}:{:02X}", index, subindex);

        if command.expedited {
            let len = command.expedited_len();
            return match self.object_dict.write(index, subindex, data[4..4 + len].to_vec()) {
                Ok(()) => Some(sdo::download_response(self.node_id, index, subindex)),
                Err(code) => Some(self.abort(index, subindex, code)),
            };
        }

        if let Err(code) = self.object_dict.check_writable(index, subindex) {
            return Some(self.abort(index, subindex, code));
        }
        self.session = Session::Download {
            index,
            subindex,
            data: Vec::new(),
            expected: command.size_indicated.then(|| sdo::data_word(data) as usize),
            toggle: false,
        };
        Some(sdo::download_response(self.node_id, index, subindex))
    }

    fn download_segment(&mut self, command: CommandByte, data: &[u8]) -> Option<Frame> {
        let node_id = self.node_id;
        let Session::Download {
            index,
            subindex,
            data: received,
            expected,
            toggle,
        } = &mut self.session
        else {
            return Some(self.abort(0, 0, ABORT_INVALID_COMMAND));
        };
        let (index, subindex) = (*index, *subindex);

        if command.toggle != *toggle {
            self.session = Session::Idle;
            return Some(self.abort(index, subindex, ABORT_TOGGLE));
        }

        received.extend_from_slice(&data[1..1 + command.segment_len()]);
        let ack = sdo::download_segment_response(node_id, *toggle);
        *toggle = !*toggle;

        if !command.last {
            return Some(ack);
        }

        let received = std::mem::take(received);
        let expected = *expected;
        self.session = Session::Idle;

        if expected.is_some_and(|expected| expected != received.len()) {
            return Some(self.abort(index, subindex, ABORT_LENGTH_MISMATCH));
        }
        match self.object_dict.write(index, subindex, received) {
            Ok(()) => Some(ack),
            Err(code) => Some(self.abort(index, subindex, code)),
        }
    }

    fn abort(&self, index: u16, subindex: u8, code: u32) -> Frame {
        debug!("aborting 0x{:04X}:{:02X} with 0x{:08X}", index, subindex, code);
        sdo::abort_response(self.node_id, index, subindex, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopen_common::sdo::ABORT_READ_ONLY;

    fn server() -> SdoServer {
        let mut dict = ObjectDictionary::new();
        dict.add_test_objects(4);
        SdoServer::new(4, dict)
    }

    fn request(data: [u8; 8]) -> Frame {
        Frame::new(0x604, &data).unwrap()
    }

    #[test]
    fn test_ignores_other_nodes() {
        let mut server = server();
        let frame = Frame::new(0x605, &[0x40, 0x00, 0x10, 0x00, 0, 0, 0, 0]).unwrap();
        assert!(server.handle_frame(&frame).is_none());
    }

    #[test]
    fn test_expedited_upload() {
        let mut server = server();
        let reply = server
            .handle_frame(&request([0x40, 0x00, 0x10, 0x00, 0, 0, 0, 0]))
            .unwrap();
        assert_eq!(reply.cob_id(), 0x584);
        assert_eq!(reply.data(), &[0x43, 0x00, 0x10, 0x00, 0x91, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_segmented_upload() {
        let mut server = server();
        let initiate = server
            .handle_frame(&request([0x40, 0x08, 0x10, 0x00, 0, 0, 0, 0]))
            .unwrap();
        assert_eq!(initiate.data(), &[0x41, 0x08, 0x10, 0x00, 15, 0, 0, 0]);

        let first = server.handle_frame(&request([0x60, 0, 0, 0, 0, 0, 0, 0])).unwrap();
        assert_eq!(first.data(), &[0x00, b'M', b'o', b'c', b'k', b'C', b'A', b'N']);
        let second = server.handle_frame(&request([0x70, 0, 0, 0, 0, 0, 0, 0])).unwrap();
        assert_eq!(&second.data()[1..8], b"openNod");
        // one data byte, last segment
        let third = server.handle_frame(&request([0x60, 0, 0, 0, 0, 0, 0, 0])).unwrap();
        assert_eq!(third.data()[0], 0x0D);
        assert_eq!(third.data()[1], b'e');
    }

    #[test]
    fn test_toggle_error_aborts() {
        let mut server = server();
        server.handle_frame(&request([0x40, 0x08, 0x10, 0x00, 0, 0, 0, 0]));
        let reply = server.handle_frame(&request([0x70, 0, 0, 0, 0, 0, 0, 0])).unwrap();
        assert_eq!(reply.data()[0], 0x80);
        assert_eq!(sdo::data_word(reply.data()), ABORT_TOGGLE);
    }

    #[test]
    fn test_expedited_download() {
        let mut server = server();
        let reply = server
            .handle_frame(&request([0x23, 0x00, 0x21, 0x01, 0x78, 0x56, 0x34, 0x12]))
            .unwrap();
        assert_eq!(reply.data()[0], 0x60);
        assert_eq!(
            server.object_dict().get(0x2100, 0x01).unwrap().0,
            vec![0x78, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn test_segmented_download() {
        let mut server = server();
        let ack = server
            .handle_frame(&request([0x21, 0x00, 0x21, 0x02, 10, 0, 0, 0]))
            .unwrap();
        assert_eq!(ack.data()[0], 0x60);

        let first = server.handle_frame(&request([0x00, 1, 2, 3, 4, 5, 6, 7])).unwrap();
        assert_eq!(first.data()[0], 0x20);
        // toggle set, four unused bytes, last
        let second = server.handle_frame(&request([0x19, 8, 9, 10, 0, 0, 0, 0])).unwrap();
        assert_eq!(second.data()[0], 0x30);
        assert_eq!(
            server.object_dict().get(0x2100, 0x02).unwrap().0,
            (1..=10).collect::<Vec<u8>>()
        );
    }

    #[test]
    fn test_download_to_read_only_aborts() {
        let mut server = server();
        let reply = server
            .handle_frame(&request([0x2F, 0x01, 0x10, 0x00, 0xFF, 0, 0, 0]))
            .unwrap();
        assert_eq!(sdo::data_word(reply.data()), ABORT_READ_ONLY);
    }

    #[test]
    fn test_missing_object_aborts() {
        let mut server = server();
        let reply = server
            .handle_frame(&request([0x40, 0x00, 0x30, 0x00, 0, 0, 0, 0]))
            .unwrap();
        assert_eq!(reply.data(), &[0x80, 0x00, 0x30, 0x00, 0x00, 0x00, 0x02, 0x06]);
    }
}
