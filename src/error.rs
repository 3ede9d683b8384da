//! Custom error types for the hub.
//!
//! This module defines the primary error type, `HubError`, shared by every link
//! component. Using the `thiserror` crate, it provides one consistent taxonomy for
//! the failures the aggregation layer has to survive.
//!
//! ## Error Hierarchy
//!
//! - **`ConnectionFault`**: refused, reset or timed-out stream/ping sockets. Drives
//!   the reconnect state machine of the owning link and is never fatal.
//! - **`NotConnected`**: a command was issued on a link that currently has no socket.
//! - **`FormatFault`**: a frame without both delimiters. The message is dropped and
//!   no state is mutated.
//! - **`DeviceUnclassified`**: a serial port that could not be probed. The port is
//!   marked `Unreadable` once its probe attempts are exhausted.
//! - **`ImageDecodeFault`**: an image datagram that did not decode. The datagram is
//!   dropped, the socket stays open.
//! - **`Config`** / **`Configuration`**: loading and semantic validation of
//!   `HubConfig`.
//!
//! None of these terminate the process. Loops log them and carry on; operators see
//! their effect through channels of the shared state (streaming, ping, emergency).

use thiserror::Error;

/// Convenience alias for results using the hub error type.
pub type AppResult<T> = std::result::Result<T, HubError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum HubError {
    #[error("Connection fault on {link}: {source}")]
    ConnectionFault {
        link: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Link '{0}' is not connected")]
    NotConnected(String),

    #[error("Malformed frame: {0}")]
    FormatFault(String),

    #[error("Port {port} could not be classified: {reason}")]
    DeviceUnclassified { port: String, reason: String },

    #[error("Image decode failed: {0}")]
    ImageDecodeFault(String),

    #[error("No reverse path known yet; no image datagram has been received")]
    NoReversePath,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid value '{value}' for channel {channel}")]
    InvalidValue { channel: String, value: String },

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
}

impl HubError {
    /// Wrap an I/O error raised on the named link as a connection fault.
    pub fn connection(link: impl Into<String>, source: std::io::Error) -> Self {
        HubError::ConnectionFault {
            link: link.into(),
            source,
        }
    }

    /// True for failures that should push a link into its reconnect cycle.
    #[must_use]
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            HubError::ConnectionFault { .. } | HubError::NotConnected(_)
        )
    }
}

impl From<figment::Error> for HubError {
    fn from(value: figment::Error) -> Self {
        HubError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_faults_are_recognised() {
        let err = HubError::connection(
            "rov",
            std::io::Error::from(std::io::ErrorKind::ConnectionReset),
        );
        assert!(err.is_connection_fault());
        assert!(err.to_string().contains("rov"));

        assert!(HubError::NotConnected("camera".into()).is_connection_fault());
        assert!(!HubError::FormatFault("x".into()).is_connection_fault());
    }
}
