// sdo.rs - SDO command-byte codec and frame builders shared by client and server
use crate::cob::{sdo_reply_cob, sdo_request_cob};
use crate::frame::Frame;
use std::fmt;
use thiserror::Error;

/// Largest value carried by an expedited transfer.
pub const EXPEDITED_MAX: usize = 4;

/// Payload bytes carried by one segment.
pub const SEGMENT_DATA_LEN: usize = 7;

/// SDO abort code the client sends when the server answers with a command
/// specifier the transfer cannot handle.
pub const ABORT_INVALID_COMMAND: u32 = 0x0504_0001;

/// Abort code the client sends when a server announces more data than it
/// will buffer.
pub const ABORT_OUT_OF_MEMORY: u32 = 0x0504_0005;

/// Abort code for a missing object.
pub const ABORT_OBJECT_MISSING: u32 = 0x0602_0000;

/// Abort code for a toggle bit that did not alternate.
pub const ABORT_TOGGLE: u32 = 0x0503_0000;

/// Abort code for a write to a read-only object.
pub const ABORT_READ_ONLY: u32 = 0x0601_0002;

/// Abort code for a download whose length does not match the announced size.
pub const ABORT_LENGTH_MISMATCH: u32 = 0x0607_0010;

/// Fixed command bytes
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum SdoCommand {
    /// Initiate domain upload (read)
    InitiateUploadRequest = 0x40,
    /// Expedited upload response, size bits cleared
    ExpeditedUploadResponse = 0x43,
    /// Segmented upload response with size indicated
    SegmentedUploadResponse = 0x41,
    /// Upload segment request, toggle cleared
    UploadSegmentRequest = 0x60,
    /// Segmented download initiate with size indicated
    SegmentedDownloadRequest = 0x21,
    /// Download segment acknowledged, toggle cleared
    DownloadSegmentResponse = 0x20,
    /// Abort transfer
    AbortTransfer = 0x80,
}

/// Download initiate acknowledged. Shares its value with
/// `UploadSegmentRequest`; the COB-ID tells the two apart.
pub const DOWNLOAD_RESPONSE: u8 = 0x60;

/// Command specifiers, as found in the top three bits of the command byte.
pub mod specifier {
    pub const SEGMENT: u8 = 0;
    pub const DOWNLOAD_SEGMENT_ACK: u8 = 1;
    pub const INITIATE_DOWNLOAD: u8 = 1;
    pub const INITIATE_UPLOAD: u8 = 2;
    pub const DOWNLOAD_ACK: u8 = 3;
    pub const UPLOAD_SEGMENT: u8 = 3;
    pub const ABORT: u8 = 4;
}

/// The bit fields of an SDO command byte. Which fields are meaningful
/// depends on the specifier; all of them are decoded unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandByte {
    pub specifier: u8,
    /// Bytes of the 4-byte data field that do not carry data (expedited).
    pub n: u8,
    pub expedited: bool,
    pub size_indicated: bool,
    /// Bytes of the 7-byte segment that do not carry data.
    pub segment_unused: u8,
    pub toggle: bool,
    /// No more segments follow.
    pub last: bool,
}

impl CommandByte {
    pub fn decode(byte: u8) -> Self {
        Self {
            specifier: byte >> 5,
            n: (byte >> 2) & 0x03,
            expedited: (byte >> 1) & 0x01 == 1,
            size_indicated: byte & 0x01 == 1,
            segment_unused: (byte >> 1) & 0x07,
            toggle: (byte >> 4) & 0x01 == 1,
            last: byte & 0x01 == 1,
        }
    }

    /// Data bytes in an expedited frame.
    pub fn expedited_len(&self) -> usize {
        if self.size_indicated {
            EXPEDITED_MAX - self.n as usize
        } else {
            EXPEDITED_MAX
        }
    }

    /// Data bytes in a segment frame.
    pub fn segment_len(&self) -> usize {
        SEGMENT_DATA_LEN - self.segment_unused as usize
    }
}

/// Index and subindex of an SDO initiate or abort frame.
pub fn multiplexer(data: &[u8]) -> (u16, u8) {
    if data.len() < 4 {
        return (0, 0);
    }
    (u16::from_le_bytes([data[1], data[2]]), data[3])
}

/// The 32-bit value in bytes 4..8 (abort code, size, expedited data).
pub fn data_word(data: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    if data.len() >= 8 {
        word.copy_from_slice(&data[4..8]);
    }
    u32::from_le_bytes(word)
}

fn initiate_frame(cob_id: u16, command: u8, index: u16, subindex: u8, payload: &[u8]) -> Frame {
    let mut data = [0u8; 8];
    data[0] = command;
    data[1..3].copy_from_slice(&index.to_le_bytes());
    data[3] = subindex;

    let count = payload.len().min(EXPEDITED_MAX);
    data[4..4 + count].copy_from_slice(&payload[..count]);

    Frame::full(cob_id, data)
}

fn segment_frame(cob_id: u16, base: u8, toggle: bool, last: bool, chunk: &[u8]) -> Frame {
    let count = chunk.len().min(SEGMENT_DATA_LEN);
    let mut command = base | (((SEGMENT_DATA_LEN - count) as u8) << 1);
    if toggle {
        command |= 0x10;
    }
    if last {
        command |= 0x01;
    }

    let mut data = [0u8; 8];
    data[0] = command;
    data[1..1 + count].copy_from_slice(&chunk[..count]);

    Frame::full(cob_id, data)
}

/// Expedited command byte for a payload of 1..=4 bytes.
pub fn expedited_download_command(len: usize) -> Option<u8> {
    match len {
        1 => Some(0x2F),
        2 => Some(0x2B),
        3 => Some(0x27),
        4 => Some(0x23),
        _ => None,
    }
}

// ---- client to server ----

pub fn upload_request(node_id: u8, index: u16, subindex: u8) -> Frame {
    initiate_frame(
        sdo_request_cob(node_id),
        SdoCommand::InitiateUploadRequest as u8,
        index,
        subindex,
        &[0; 4],
    )
}

/// Expedited download; `None` unless `payload` is 1..=4 bytes.
pub fn expedited_download_request(node_id: u8, index: u16, subindex: u8, payload: &[u8]) -> Option<Frame> {
    let command = expedited_download_command(payload.len())?;
    Some(initiate_frame(sdo_request_cob(node_id), command, index, subindex, payload))
}

pub fn segmented_download_request(node_id: u8, index: u16, subindex: u8, size: u32) -> Frame {
    initiate_frame(
        sdo_request_cob(node_id),
        SdoCommand::SegmentedDownloadRequest as u8,
        index,
        subindex,
        &size.to_le_bytes(),
    )
}

pub fn download_segment_request(node_id: u8, toggle: bool, last: bool, chunk: &[u8]) -> Frame {
    segment_frame(sdo_request_cob(node_id), 0x00, toggle, last, chunk)
}

pub fn upload_segment_request(node_id: u8, toggle: bool) -> Frame {
    let mut data = [0u8; 8];
    data[0] = SdoCommand::UploadSegmentRequest as u8 | if toggle { 0x10 } else { 0x00 };
    Frame::full(sdo_request_cob(node_id), data)
}

pub fn abort_request(node_id: u8, index: u16, subindex: u8, code: u32) -> Frame {
    initiate_frame(
        sdo_request_cob(node_id),
        SdoCommand::AbortTransfer as u8,
        index,
        subindex,
        &code.to_le_bytes(),
    )
}

// ---- server to client ----

pub fn download_response(node_id: u8, index: u16, subindex: u8) -> Frame {
    initiate_frame(sdo_reply_cob(node_id), DOWNLOAD_RESPONSE, index, subindex, &[])
}

pub fn download_segment_response(node_id: u8, toggle: bool) -> Frame {
    let mut data = [0u8; 8];
    data[0] = SdoCommand::DownloadSegmentResponse as u8 | if toggle { 0x10 } else { 0x00 };
    Frame::full(sdo_reply_cob(node_id), data)
}

/// Expedited upload response; `None` unless `payload` is 1..=4 bytes.
pub fn expedited_upload_response(node_id: u8, index: u16, subindex: u8, payload: &[u8]) -> Option<Frame> {
    if payload.is_empty() || payload.len() > EXPEDITED_MAX {
        return None;
    }
    // Bits 3-2 carry the number of bytes that do NOT contain data
    let n = (EXPEDITED_MAX - payload.len()) as u8;
    let command = SdoCommand::ExpeditedUploadResponse as u8 | (n << 2);
    Some(initiate_frame(sdo_reply_cob(node_id), command, index, subindex, payload))
}

pub fn segmented_upload_response(node_id: u8, index: u16, subindex: u8, size: u32) -> Frame {
    initiate_frame(
        sdo_reply_cob(node_id),
        SdoCommand::SegmentedUploadResponse as u8,
        index,
        subindex,
        &size.to_le_bytes(),
    )
}

pub fn upload_segment_response(node_id: u8, toggle: bool, last: bool, chunk: &[u8]) -> Frame {
    segment_frame(sdo_reply_cob(node_id), 0x00, toggle, last, chunk)
}

pub fn abort_response(node_id: u8, index: u16, subindex: u8, code: u32) -> Frame {
    initiate_frame(
        sdo_reply_cob(node_id),
        SdoCommand::AbortTransfer as u8,
        index,
        subindex,
        &code.to_le_bytes(),
    )
}

/// Get human-readable description of SDO abort codes
pub fn abort_code_description(code: u32) -> String {
    match code {
        0x05030000 => "Toggle bit not alternated".to_string(),
        0x05040000 => "SDO protocol timed out".to_string(),
        0x05040001 => "Client/server command specifier not valid or unknown".to_string(),
        0x05040005 => "Out of memory".to_string(),
        0x06010000 => "Unsupported access to an object".to_string(),
        0x06010001 => "Attempt to read a write only object".to_string(),
        0x06010002 => "Attempt to write a read only object".to_string(),
        0x06020000 => "Object does not exist in the object dictionary".to_string(),
        0x06040041 => "Object cannot be mapped to the PDO".to_string(),
        0x06040042 => "The number and length of the objects to be mapped would exceed PDO length".to_string(),
        0x06040043 => "General parameter incompatibility reason".to_string(),
        0x06040047 => "General internal incompatibility in the device".to_string(),
        0x06060000 => "Access failed due to a hardware error".to_string(),
        0x06070010 => "Data type does not match, length of service parameter does not match".to_string(),
        0x06070012 => "Data type does not match, length of service parameter too high".to_string(),
        0x06070013 => "Data type does not match, length of service parameter too low".to_string(),
        0x06090011 => "Sub-index does not exist".to_string(),
        0x06090030 => "Value range of parameter exceeded (only for write access)".to_string(),
        0x06090031 => "Value of parameter written too high".to_string(),
        0x06090032 => "Value of parameter written too low".to_string(),
        0x06090036 => "Maximum value is less than minimum value".to_string(),
        0x08000000 => "General error".to_string(),
        0x08000020 => "Data cannot be transferred or stored to the application".to_string(),
        0x08000021 => "Data cannot be transferred or stored to the application because of local control".to_string(),
        0x08000022 => "Data cannot be transferred or stored to the application because of the present device state".to_string(),
        _ => format!("Unknown abort code: 0x{:08X}", code),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("insufficient data for {expected}: got {actual} bytes")]
    Insufficient { expected: &'static str, actual: usize },
}

/// Little-endian SDO encoding of a fixed-size value.
pub trait SdoValue: Sized {
    fn to_sdo_bytes(&self) -> Vec<u8>;
    fn from_sdo_bytes(bytes: &[u8]) -> Result<Self, CodecError>;
}

macro_rules! impl_sdo_value {
    ($($ty:ty),*) => {
        $(
            impl SdoValue for $ty {
                fn to_sdo_bytes(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }

                fn from_sdo_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
                    const SIZE: usize = std::mem::size_of::<$ty>();
                    let raw: [u8; SIZE] = bytes
                        .get(..SIZE)
                        .and_then(|slice| slice.try_into().ok())
                        .ok_or(CodecError::Insufficient {
                            expected: stringify!($ty),
                            actual: bytes.len(),
                        })?;
                    Ok(<$ty>::from_le_bytes(raw))
                }
            }
        )*
    };
}

impl_sdo_value!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// SDO Data Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoDataType {
    UInt8,
    UInt16,
    UInt32,
    Int8,
    Int16,
    Int32,
    Real32,
    VisibleString,
    OctetString,
}

/// A read result decoded by runtime data type
#[derive(Debug, Clone, PartialEq)]
pub enum SdoResponseData {
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Real32(f32),
    String(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for SdoResponseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UInt8(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::Int8(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::Real32(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Bytes(v) => write!(f, "{:02X?}", v),
        }
    }
}

/// Parse payload data based on expected type
pub fn parse_payload(payload: &[u8], data_type: SdoDataType) -> Result<SdoResponseData, CodecError> {
    Ok(match data_type {
        SdoDataType::UInt8 => SdoResponseData::UInt8(u8::from_sdo_bytes(payload)?),
        SdoDataType::UInt16 => SdoResponseData::UInt16(u16::from_sdo_bytes(payload)?),
        SdoDataType::UInt32 => SdoResponseData::UInt32(u32::from_sdo_bytes(payload)?),
        SdoDataType::Int8 => SdoResponseData::Int8(i8::from_sdo_bytes(payload)?),
        SdoDataType::Int16 => SdoResponseData::Int16(i16::from_sdo_bytes(payload)?),
        SdoDataType::Int32 => SdoResponseData::Int32(i32::from_sdo_bytes(payload)?),
        SdoDataType::Real32 => SdoResponseData::Real32(f32::from_sdo_bytes(payload)?),
        SdoDataType::VisibleString => {
            let string = String::from_utf8_lossy(payload).trim_end_matches('\0').to_string();
            SdoResponseData::String(string)
        }
        SdoDataType::OctetString => SdoResponseData::Bytes(payload.to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_abort() {
        let cmd = CommandByte::decode(0x80);
        assert_eq!(cmd.specifier, specifier::ABORT);
    }

    #[test]
    fn test_decode_expedited_upload() {
        // 0x4B: two data bytes, expedited, size indicated
        let cmd = CommandByte::decode(0x4B);
        assert_eq!(cmd.specifier, specifier::INITIATE_UPLOAD);
        assert!(cmd.expedited);
        assert!(cmd.size_indicated);
        assert_eq!(cmd.expedited_len(), 2);
    }

    #[test]
    fn test_decode_upload_segment() {
        // toggle set, 3 unused bytes, last segment
        let cmd = CommandByte::decode(0x17);
        assert_eq!(cmd.specifier, specifier::SEGMENT);
        assert!(cmd.toggle);
        assert!(cmd.last);
        assert_eq!(cmd.segment_len(), 4);
    }

    #[test]
    fn test_upload_request_layout() {
        let frame = upload_request(4, 0x1018, 0x01);
        assert_eq!(frame.cob_id(), 0x604);
        assert_eq!(frame.data(), &[0x40, 0x18, 0x10, 0x01, 0, 0, 0, 0]);
    }

    #[test]
    fn test_expedited_download_command_by_size() {
        let frame = expedited_download_request(1, 0x6040, 0, &[0x0F, 0x00]).unwrap();
        assert_eq!(frame.data(), &[0x2B, 0x40, 0x60, 0x00, 0x0F, 0x00, 0, 0]);
        assert!(expedited_download_request(1, 0x6040, 0, &[0; 5]).is_none());
        assert!(expedited_download_request(1, 0x6040, 0, &[]).is_none());
    }

    #[test]
    fn test_segmented_download_initiate_carries_size() {
        let frame = segmented_download_request(2, 0x1008, 0, 20);
        assert_eq!(frame.data(), &[0x21, 0x08, 0x10, 0x00, 20, 0, 0, 0]);
    }

    #[test]
    fn test_download_segment_command_bits() {
        let frame = download_segment_request(2, true, true, &[1, 2, 3, 4, 5, 6]);
        // toggle | one unused byte | last
        assert_eq!(frame.data()[0], 0x10 | (1 << 1) | 0x01);
        assert_eq!(&frame.data()[1..7], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_upload_segment_request_toggle() {
        assert_eq!(upload_segment_request(1, false).data()[0], 0x60);
        assert_eq!(upload_segment_request(1, true).data()[0], 0x70);
    }

    #[test]
    fn test_abort_code_words() {
        let frame = abort_response(3, 0x2000, 1, ABORT_OBJECT_MISSING);
        assert_eq!(frame.cob_id(), 0x583);
        assert_eq!(data_word(frame.data()), ABORT_OBJECT_MISSING);
        assert_eq!(multiplexer(frame.data()), (0x2000, 1));
    }

    #[test]
    fn test_sdo_value_encoding() {
        assert_eq!(0x1234u16.to_sdo_bytes(), vec![0x34, 0x12]);
        assert_eq!(i32::from_sdo_bytes(&(-5i32).to_le_bytes()), Ok(-5));
        assert!(u64::from_sdo_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_parse_payload_string() {
        let parsed = parse_payload(b"Mock\0\0", SdoDataType::VisibleString).unwrap();
        assert_eq!(parsed, SdoResponseData::String("Mock".to_string()));
    }

    #[test]
    fn test_abort_code_description() {
        assert_eq!(abort_code_description(0x06020000), "Object does not exist in the object dictionary");
        assert!(abort_code_description(0x12345678).starts_with("Unknown"));
    }
}
