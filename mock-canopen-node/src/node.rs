//! NMT behaviour of the simulated device

use crate::object_dictionary::ObjectDictionary;
use crate::sdo_server::SdoServer;
use canopen_common::cob::NMT_COMMAND_COB;
use canopen_common::nmt::{heartbeat_frame, ALL_NODES};
use canopen_common::{Frame, NmtCommand, NmtState};
use log::info;

/// TPDO1 sensor values
struct ProcessData {
    temperature: u16, // 0.01 °C
    pressure: u16,    // hPa
    status: u8,
}

pub struct NodeSimulator {
    state: NmtState,
    sdo: SdoServer,
    process: ProcessData,
}

impl NodeSimulator {
    pub fn new(node_id: u8, object_dict: ObjectDictionary) -> Self {
        Self {
            state: NmtState::Initializing,
            sdo: SdoServer::new(node_id, object_dict),
            process: ProcessData {
                temperature: 2350,
                pressure: 1013,
                status: 1,
            },
        }
    }

    pub fn node_id(&self) -> u8 {
        self.sdo.node_id()
    }

    pub fn state(&self) -> NmtState {
        self.state
    }

    pub fn sdo_server(&self) -> &SdoServer {
        &self.sdo
    }

    /// Finish initialisation: enter pre-operational and return the bootup
    /// message.
    pub fn boot(&mut self) -> Frame {
        self.state = NmtState::PreOperational;
        info!("node {} booted", self.node_id());
        heartbeat_frame(self.node_id(), 0x00)
    }

    pub fn heartbeat(&self) -> Frame {
        heartbeat_frame(self.node_id(), self.state.code().unwrap_or(0x00))
    }

    /// React to a received frame, returning whatever the device sends back.
    pub fn handle_frame(&mut self, frame: &Frame) -> Vec<Frame> {
        if frame.cob_id() == NMT_COMMAND_COB {
            return self.handle_nmt(frame);
        }

        // SDO is not available while stopped
        if self.state == NmtState::Stopped {
            return Vec::new();
        }
        self.sdo.handle_frame(frame).into_iter().collect()
    }

    fn handle_nmt(&mut self, frame: &Frame) -> Vec<Frame> {
        let [code, target] = frame.data() else {
            return Vec::new();
        };
        if *target != ALL_NODES && *target != self.node_id() {
            return Vec::new();
        }
        let Some(command) = NmtCommand::from_code(*code) else {
            return Vec::new();
        };

        info!("node {} received NMT {:?}", self.node_id(), command);
        match command {
            NmtCommand::Start => self.state = NmtState::Operational,
            NmtCommand::Stop => self.state = NmtState::Stopped,
            NmtCommand::EnterPreOperational => self.state = NmtState::PreOperational,
            NmtCommand::ResetNode | NmtCommand::ResetCommunication => return vec![self.boot()],
        }
        Vec::new()
    }

    /// Next TPDO1 sample. Only sent while operational.
    pub fn tpdo(&mut self) -> Option<Frame> {
        if self.state != NmtState::Operational {
            return None;
        }

        // Update test values (simulate changing sensor data)
        let process = &mut self.process;
        process.temperature = (process.temperature + 1) % 3000;
        process.pressure = 1000 + (process.pressure - 1000 + 1) % 50;
        process.status = if process.status == 1 { 2 } else { 1 };

        // Mapping: Temperature (16-bit), Pressure (16-bit), Status (8-bit)
        let mut data = [0u8; 5];
        data[0..2].copy_from_slice(&process.temperature.to_le_bytes());
        data[2..4].copy_from_slice(&process.pressure.to_le_bytes());
        data[4] = process.status;

        Frame::new(0x180 + self.node_id() as u16, &data).ok()
    }
}
