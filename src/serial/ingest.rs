//! Continuous ingestion from one classified serial device.

use super::port::{SerialIo, SerialOpener};
use crate::config::SerialConfig;
use crate::error::{AppResult, HubError};
use crate::mapping::{ApplyReport, FieldMap};
use crate::protocol::{decode, has_frame};
use crate::state::{DeviceRole, SharedState};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::time::sleep;
use tracing::{debug, info, instrument, trace, warn};

/// Reads one device and writes what it reports into the store.
///
/// Reads are not buffered across calls: a chunk without a complete frame is dropped.
pub struct SerialIngest {
    port: String,
    baud: u32,
    role: DeviceRole,
    field_map: FieldMap,
    config: SerialConfig,
    opener: Arc<dyn SerialOpener>,
    state: Arc<SharedState>,
}

impl SerialIngest {
    /// Ingest for `port` at the rate it was classified with.
    pub fn new(
        port: impl Into<String>,
        baud: u32,
        role: DeviceRole,
        config: SerialConfig,
        opener: Arc<dyn SerialOpener>,
        state: Arc<SharedState>,
    ) -> Self {
        Self {
            port: port.into(),
            baud,
            role,
            field_map: FieldMap::for_role(role),
            config,
            opener,
            state,
        }
    }

    /// Port name.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Device role.
    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// Decode one read and apply it. `None` if the chunk held no complete frame.
    pub fn process_chunk(&self, chunk: &[u8]) -> Option<ApplyReport> {
        let text = String::from_utf8_lossy(chunk);
        if !has_frame(&text) {
            trace!(port = %self.port, bytes = chunk.len(), "Discarding chunk without a complete frame");
            return None;
        }
        match decode(&text) {
            Ok(frame) => Some(self.field_map.apply(&frame, &self.state)),
            Err(e) => {
                debug!(port = %self.port, error = %e, "Dropping malformed frame");
                None
            }
        }
    }

    /// Read `io` until it ends.
    ///
    /// Read errors are logged and retried after the retry delay.
    ///
    /// # Errors
    /// The last read error once `reopen_after_errors` reads in a row have failed.
    pub async fn pump(&self, io: &mut dyn SerialIo) -> AppResult<()> {
        let mut buffer = vec![0u8; self.config.read_buffer_bytes.max(1)];
        let mut consecutive_errors = 0u32;

        loop {
            match io.read(&mut buffer).await {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    consecutive_errors = 0;
                    self.process_chunk(&buffer[..n]);
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        port = %self.port,
                        error = %e,
                        consecutive_errors,
                        "Serial read failed"
                    );
                    if consecutive_errors >= self.config.reopen_after_errors.max(1) {
                        return Err(HubError::Io(e));
                    }
                    sleep(self.config.retry_delay()).await;
                }
            }
        }
    }

    /// Open the port and ingest forever, reopening it when it ends or keeps failing.
    #[instrument(skip(self), fields(port = %self.port, role = %self.role, baud = self.baud))]
    pub async fn run(self) {
        loop {
            match self.opener.open(&self.port, self.baud) {
                Ok(mut io) => {
                    info!("Serial ingest started");
                    match self.pump(io.as_mut()).await {
                        Ok(()) => warn!("Serial stream ended; reopening"),
                        Err(e) => warn!(error = %e, "Too many read errors; reopening"),
                    }
                }
                Err(e) => warn!(error = %e, "Could not open serial port"),
            }
            sleep(self.config.retry_delay()).await;
        }
    }
}

impl std::fmt::Debug for SerialIngest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialIngest")
            .field("port", &self.port)
            .field("baud", &self.baud)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// An opener whose ports always fail, for ingest tests that only feed chunks.
#[cfg(test)]
pub(crate) struct NoPorts;

#[cfg(test)]
impl SerialOpener for NoPorts {
    fn available_ports(&self) -> AppResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn open(&self, port: &str, _baud: u32) -> AppResult<Box<dyn SerialIo>> {
        Err(HubError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{port} does not exist"),
        )))
    }
}
