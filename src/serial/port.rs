//! Access to the platform's serial ports.
//!
//! Discovery and ingestion go through [`SerialOpener`] so that tests can hand them
//! in-memory devices instead of real hardware.

use crate::error::AppResult;
use tokio::io::AsyncRead;
use tokio_serial::SerialPortBuilderExt;

/// A readable serial byte stream.
pub trait SerialIo: AsyncRead + Unpin + Send {}

impl<T: AsyncRead + Unpin + Send> SerialIo for T {}

/// Enumerates and opens serial ports.
pub trait SerialOpener: Send + Sync {
    /// Port names the platform reports.
    fn available_ports(&self) -> AppResult<Vec<String>>;

    /// Open `port` at `baud`, 8N1, no flow control.
    fn open(&self, port: &str, baud: u32) -> AppResult<Box<dyn SerialIo>>;
}

/// The host's serial ports through `tokio-serial`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSerial;

impl SerialOpener for SystemSerial {
    fn available_ports(&self) -> AppResult<Vec<String>> {
        Ok(tokio_serial::available_ports()?
            .into_iter()
            .map(|info| info.port_name)
            .collect())
    }

    fn open(&self, port: &str, baud: u32) -> AppResult<Box<dyn SerialIo>> {
        let stream = tokio_serial::new(port, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;
        Ok(Box::new(stream))
    }
}
