//! # CANopen master
//!
//! Client-side CANopen stack on top of a pluggable CAN transport.
//!
//! This library provides:
//! - SDO client transfers (expedited and segmented) with timeouts
//! - At most one active SDO transfer per node, later ones queued in order
//! - NMT commands and per-node lifecycle tracking from heartbeats
//! - PDO handlers and per-class notification topics
//! - SocketCAN and in-process virtual bus transports
//! - TOML configuration and CSV bus traces
//!
//! ```no_run
//! use canopen_master::{CanOpenMaster, MasterConfig, SocketCanTransport};
//!
//! # async fn run() -> canopen_master::Result<()> {
//! let master = CanOpenMaster::new(SocketCanTransport::new(), MasterConfig::load());
//! master.open_configured()?;
//!
//! let mut handle = master.read_sdo(5, 0x1018, 1, None)?;
//! let status = handle.finished().await?;
//! println!("vendor id: {:?}", status.value::<u32>());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod master;
pub mod nmt;
pub mod observer;
pub mod sdo;
pub mod trace;
pub mod transport;
mod worker;

pub use config::{ConfigError, MasterConfig};
pub use dispatch::PdoHandler;
pub use error::{MasterError, Result, TransportError, WorkerFault};
pub use master::CanOpenMaster;
pub use nmt::{NodeSnapshot, StateCallback};
pub use observer::{ConnectionEvent, FrameEvent, Observers, PdoBatch, Topic};
pub use sdo::{Direction, SdoCallback, SdoHandle, SdoState, SdoStatus};
pub use trace::{TraceError, TraceRecorder};
pub use transport::{BitRate, FrameSink, SocketCanTransport, Transport, VirtualBus};

pub use canopen_common::{Frame, NmtCommand, NmtState, SdoDataType, SdoValue};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
