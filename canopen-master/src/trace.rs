//! CSV recording of bus traffic.

use crate::observer::{ConnectionEvent, FrameEvent, Observers};
use canopen_common::MessageClass;
use chrono::{DateTime, Local};
use csv::Writer;
use log::{info, warn};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::task::JoinHandle;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub struct TraceRecorder {
    writer: Writer<File>,
    path: PathBuf,
}

impl TraceRecorder {
    /// Create a new trace file named after the current local time.
    pub fn create(directory: &Path) -> Result<Self, TraceError> {
        fs::create_dir_all(directory)?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = directory.join(format!("canopen_trace_{}.csv", timestamp));

        let mut writer = Writer::from_writer(File::create(&path)?);
        writer.write_record(["Timestamp", "Class", "COB-ID", "Length", "Data"])?;
        writer.flush()?;

        info!("recording bus trace to {:?}", path);
        Ok(Self { writer, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_frame(&mut self, event: &FrameEvent) -> Result<(), TraceError> {
        let frame = &event.frame;
        let data = frame
            .data()
            .iter()
            .map(|byte| format!("{:02X}", byte))
            .collect::<Vec<_>>()
            .join(" ");

        self.write_row(
            &event.timestamp,
            MessageClass::classify(frame.cob_id()).label(),
            &format!("{:03X}", frame.cob_id()),
            &frame.len().to_string(),
            &data,
        )
    }

    pub fn record_connection(&mut self, event: &ConnectionEvent) -> Result<(), TraceError> {
        let status = if event.connected { "Connected" } else { "Disconnected" };
        self.write_row(&event.timestamp, "CONNECTION", "", "", status)
    }

    fn write_row(
        &mut self,
        timestamp: &DateTime<Local>,
        class: &str,
        cob_id: &str,
        length: &str,
        data: &str,
    ) -> Result<(), TraceError> {
        let timestamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        self.writer
            .write_record([timestamp.as_str(), class, cob_id, length, data])?;
        self.writer.flush()?;
        Ok(())
    }

    /// Record the `raw` and `connection` topics until the connection closes
    /// or the observers go away. Must be called inside a tokio runtime.
    pub fn attach(mut self, observers: &Observers) -> JoinHandle<()> {
        let mut frames = observers.raw.subscribe();
        let mut connection = observers.connection.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = connection.recv() => match event {
                        Some(event) => {
                            if !event.connected {
                                // Frames seen before the close belong above it
                                while let Ok(frame) = frames.try_recv() {
                                    self.log_frame(&frame);
                                }
                            }
                            if let Err(e) = self.record_connection(&event) {
                                warn!("failed to write trace entry: {}", e);
                            }
                            if !event.connected {
                                break;
                            }
                        }
                        None => break,
                    },
                    event = frames.recv() => match event {
                        Some(event) => self.log_frame(&event),
                        None => break,
                    },
                }
            }
            info!("bus trace {:?} closed", self.path);
        })
    }

    fn log_frame(&mut self, event: &FrameEvent) {
        if let Err(e) = self.record_frame(event) {
            warn!("failed to write trace entry: {}", e);
        }
    }
}
