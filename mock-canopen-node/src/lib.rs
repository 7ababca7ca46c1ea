//! # Mock CANopen Node
//!
//! A simulated CANopen device used to exercise the master, either in-process
//! over a virtual bus or as the `mock-node` binary on a SocketCAN interface.
//!
//! The simulated device:
//! - Answers SDO uploads and downloads (expedited and segmented) from an
//!   object dictionary with static, dynamic and writable entries
//! - Follows NMT commands and sends bootup and heartbeat messages
//! - Broadcasts TPDO1 sensor data while operational

pub mod node;
pub mod object_dictionary;
pub mod sdo_server;

pub use node::NodeSimulator;
pub use object_dictionary::{ObjectDictionary, ObjectEntry};
pub use sdo_server::SdoServer;
