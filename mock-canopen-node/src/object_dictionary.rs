//! Object Dictionary for the mock CANopen node
//!
//! This module defines the simulated object dictionary with test data.

use canopen_common::sdo::{ABORT_OBJECT_MISSING, ABORT_READ_ONLY};
use canopen_common::SdoDataType;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Represents a single entry in the object dictionary
pub enum ObjectEntry {
    /// Read-only value
    Static(Vec<u8>, SdoDataType),
    /// Read-only value generated on each read
    Dynamic(Box<dyn Fn() -> Vec<u8> + Send + Sync>, SdoDataType),
    /// Value that SDO downloads replace
    Writable(Vec<u8>, SdoDataType),
}

impl ObjectEntry {
    fn data_type(&self) -> SdoDataType {
        match self {
            Self::Static(_, data_type) | Self::Dynamic(_, data_type) | Self::Writable(_, data_type) => {
                *data_type
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Static(..) => "ro",
            Self::Dynamic(..) => "ro, dynamic",
            Self::Writable(..) => "rw",
        }
    }
}

/// Object dictionary mapping (index, subindex) to values
#[derive(Default)]
pub struct ObjectDictionary {
    entries: BTreeMap<(u16, u8), ObjectEntry>,
}

impl ObjectDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a static entry to the dictionary
    pub fn add_static(&mut self, index: u16, subindex: u8, data: Vec<u8>, data_type: SdoDataType) {
        self.entries.insert((index, subindex), ObjectEntry::Static(data, data_type));
    }

    /// Add a dynamic entry (value generated on each read)
    pub fn add_dynamic<F>(&mut self, index: u16, subindex: u8, generator: F, data_type: SdoDataType)
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        self.entries
            .insert((index, subindex), ObjectEntry::Dynamic(Box::new(generator), data_type));
    }

    pub fn add_writable(&mut self, index: u16, subindex: u8, data: Vec<u8>, data_type: SdoDataType) {
        self.entries.insert((index, subindex), ObjectEntry::Writable(data, data_type));
    }

    /// Get an entry from the dictionary
    pub fn get(&self, index: u16, subindex: u8) -> Option<(Vec<u8>, SdoDataType)> {
        self.entries.get(&(index, subindex)).map(|entry| match entry {
            ObjectEntry::Static(data, data_type) | ObjectEntry::Writable(data, data_type) => {
                (data.clone(), *data_type)
            }
            ObjectEntry::Dynamic(generator, data_type) => (generator(), *data_type),
        })
    }

    /// Whether a download to the object would be accepted. The error is the
    /// SDO abort code to answer with.
    pub fn check_writable(&self, index: u16, subindex: u8) -> Result<(), u32> {
        match self.entries.get(&(index, subindex)) {
            Some(ObjectEntry::Writable(..)) => Ok(()),
            Some(_) => Err(ABORT_READ_ONLY),
            None => Err(ABORT_OBJECT_MISSING),
        }
    }

    pub fn write(&mut self, index: u16, subindex: u8, data: Vec<u8>) -> Result<(), u32> {
        match self.entries.get_mut(&(index, subindex)) {
            Some(ObjectEntry::Writable(value, _)) => {
                *value = data;
                Ok(())
            }
            Some(_) => Err(ABORT_READ_ONLY),
            None => Err(ABORT_OBJECT_MISSING),
        }
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One line per object, ordered by index
    pub fn summary(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|((index, subindex), entry)| {
                format!(
                    "0x{:04X}:{:02X} - {:?} ({})",
                    index,
                    subindex,
                    entry.data_type(),
                    entry.kind()
                )
            })
            .collect()
    }

    /// Add standard test objects for demonstration
    pub fn add_test_objects(&mut self, node_id: u8) {
        // 0x1000:00 - Device Type (UInt32) - Static
        self.add_static(0x1000, 0x00, 0x0000_0191u32.to_le_bytes().to_vec(), SdoDataType::UInt32);

        // 0x1001:00 - Error Register (UInt8) - Static
        self.add_static(0x1001, 0x00, vec![0x00], SdoDataType::UInt8);

        // 0x1008:00 - Device Name (String) - longer than 4 bytes, so read segmented
        self.add_static(0x1008, 0x00, b"MockCANopenNode".to_vec(), SdoDataType::VisibleString);

        // 0x1017:00 - Producer heartbeat time in ms
        self.add_writable(0x1017, 0x00, 1000u16.to_le_bytes().to_vec(), SdoDataType::UInt16);

        // 0x1018:01 - Vendor ID, 0x1018:04 - Serial number derived from the node id
        self.add_static(0x1018, 0x01, 0x0000_0001u32.to_le_bytes().to_vec(), SdoDataType::UInt32);
        self.add_static(0x1018, 0x04, (0x1000 + node_id as u32).to_le_bytes().to_vec(), SdoDataType::UInt32);

        // 0x2000:01 - Temperature Sensor (Real32) - Dynamic
        self.add_dynamic(
            0x2000,
            0x01,
            || rand::rng().random_range(20.0f32..30.0).to_le_bytes().to_vec(),
            SdoDataType::Real32,
        );

        // 0x2001:01 - Counter (UInt32) - incremented on every read
        let counter = Arc::new(AtomicU32::new(0));
        self.add_dynamic(
            0x2001,
            0x01,
            move || counter.fetch_add(1, Ordering::SeqCst).to_le_bytes().to_vec(),
            SdoDataType::UInt32,
        );

        // 0x2003:01 - Status Word (UInt16) - Static
        self.add_static(0x2003, 0x01, 0x0031u16.to_le_bytes().to_vec(), SdoDataType::UInt16);

        // 0x2003:02 - Control Word (UInt16) - Writable
        self.add_writable(0x2003, 0x02, 0x000Fu16.to_le_bytes().to_vec(), SdoDataType::UInt16);

        // 0x2100:01 - Setpoint (UInt32) - Writable
        self.add_writable(0x2100, 0x01, vec![0; 4], SdoDataType::UInt32);

        // 0x2100:02 - Free-form buffer for segmented downloads
        self.add_writable(0x2100, 0x02, Vec::new(), SdoDataType::OctetString);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_rules() {
        let mut dict = ObjectDictionary::new();
        dict.add_test_objects(4);

        assert_eq!(dict.write(0x2100, 0x01, vec![1, 2, 3, 4]), Ok(()));
        assert_eq!(dict.get(0x2100, 0x01).unwrap().0, vec![1, 2, 3, 4]);
        assert_eq!(dict.write(0x1000, 0x00, vec![0]), Err(ABORT_READ_ONLY));
        assert_eq!(dict.write(0x3000, 0x00, vec![0]), Err(ABORT_OBJECT_MISSING));
        assert_eq!(dict.check_writable(0x2001, 0x01), Err(ABORT_READ_ONLY));
    }

    #[test]
    fn test_dynamic_counter_advances() {
        let mut dict = ObjectDictionary::new();
        dict.add_test_objects(4);
        let first = dict.get(0x2001, 0x01).unwrap().0;
        let second = dict.get(0x2001, 0x01).unwrap().0;
        assert_eq!(first, 0u32.to_le_bytes().to_vec());
        assert_eq!(second, 1u32.to_le_bytes().to_vec());
        assert_eq!(dict.summary().len(), dict.len());
    }
}
