//! Round-trip latency probe against the vehicle controller.
//!
//! The probe connects lazily on the first tick and after every fault once the retry
//! delay has passed. A garbled reply only writes the "unreachable" sentinel. A slow
//! reply writes the sentinel and drops the socket, so a late answer can never be
//! taken for the next probe's reply; the next tick reconnects without a retry delay.
//! An I/O error drops the socket and waits out the retry delay.

use super::state::{LinkState, LinkStatus};
use crate::config::PingConfig;
use crate::error::{AppResult, HubError};
use crate::protocol::decode;
use crate::state::{Measurement, SharedState};
use parking_lot::Mutex as SyncMutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Latency value meaning "no valid reply".
pub const UNREACHABLE_MS: f64 = 999.99;

/// Line sent as the probe.
pub const PROBE_TOKEN: &str = "ping";

/// Latency probe.
pub struct PingLink {
    config: PingConfig,
    state: Arc<SharedState>,
    connection: Mutex<Option<BufStream<TcpStream>>>,
    status: LinkStatus,
    retry_at: SyncMutex<Option<Instant>>,
}

impl PingLink {
    /// Build a probe; it connects on the first [`probe`](Self::probe).
    pub fn new(config: PingConfig, state: Arc<SharedState>) -> Self {
        Self {
            config,
            state,
            connection: Mutex::new(None),
            status: LinkStatus::new("ping"),
            retry_at: SyncMutex::new(None),
        }
    }

    /// Connection state and transitions.
    pub fn status(&self) -> &LinkStatus {
        &self.status
    }

    /// One probe. Returns the measured latency, or `None` when the sentinel was
    /// written instead.
    ///
    /// # Errors
    /// [`HubError::NotConnected`] while waiting out the retry delay, and
    /// [`HubError::ConnectionFault`] when connecting or the exchange fails.
    pub async fn probe(&self) -> AppResult<Option<Duration>> {
        let mut guard = self.connection.lock().await;

        if guard.is_none() {
            let waiting = self
                .retry_at
                .lock()
                .is_some_and(|at| Instant::now() < at);
            if waiting {
                return Err(HubError::NotConnected("ping".into()));
            }
            *guard = Some(self.connect().await?);
        }

        let Some(connection) = guard.as_mut() else {
            return Err(HubError::NotConnected("ping".into()));
        };

        let started = Instant::now();
        if let Err(e) = send_probe(connection).await {
            *guard = None;
            return Err(self.fault(e));
        }

        let mut line = String::new();
        match timeout(self.config.reply_timeout(), connection.read_line(&mut line)).await {
            Err(_) => {
                debug!("Ping reply timed out, dropping the connection");
                *guard = None;
                self.status.set(LinkState::Disconnected);
                self.write_latency(UNREACHABLE_MS);
                Ok(None)
            }
            Ok(Err(e)) => {
                *guard = None;
                Err(self.fault(e))
            }
            Ok(Ok(0)) => {
                *guard = None;
                Err(self.fault(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "remote closed the connection",
                )))
            }
            Ok(Ok(_)) => {
                if is_valid_reply(&line) {
                    let elapsed = started.elapsed();
                    self.write_latency(elapsed.as_secs_f64() * 1000.0);
                    Ok(Some(elapsed))
                } else {
                    debug!(reply = %line.trim(), "Unexpected ping reply");
                    self.write_latency(UNREACHABLE_MS);
                    Ok(None)
                }
            }
        }
    }

    async fn connect(&self) -> AppResult<BufStream<TcpStream>> {
        self.status.set(LinkState::Connecting);
        let address = self.config.address();
        let error = match timeout(self.config.connect_timeout(), TcpStream::connect(&address)).await
        {
            Ok(Ok(stream)) => {
                self.status.set(LinkState::Connected);
                info!(addr = %address, "Ping link connected");
                return Ok(BufStream::new(stream));
            }
            Ok(Err(e)) => e,
            Err(_) => io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
        };

        self.status.set(LinkState::Disconnected);
        self.schedule_retry();
        self.write_latency(UNREACHABLE_MS);
        warn!(addr = %address, error = %error, "Ping connect failed");
        Err(HubError::connection("ping", error))
    }

    fn fault(&self, error: io::Error) -> HubError {
        self.status.set(LinkState::Faulted);
        self.schedule_retry();
        self.write_latency(UNREACHABLE_MS);
        warn!(error = %error, "Ping link faulted");
        HubError::connection("ping", error)
    }

    fn schedule_retry(&self) {
        *self.retry_at.lock() = Some(Instant::now() + self.config.retry_delay());
    }

    fn write_latency(&self, ms: f64) {
        self.state.set_measurement(Measurement::RovPing, ms);
    }
}

async fn send_probe(connection: &mut BufStream<TcpStream>) -> io::Result<()> {
    connection.write_all(PROBE_TOKEN.as_bytes()).await?;
    connection.write_all(b"\n").await?;
    connection.flush().await
}

/// A valid reply decodes to exactly `[("ping", "true")]`.
fn is_valid_reply(line: &str) -> bool {
    decode(line).is_ok_and(|frame| frame.len() == 1 && frame.get(PROBE_TOKEN) == Some("true"))
}

impl std::fmt::Debug for PingLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PingLink")
            .field("address", &self.config.address())
            .field("state", &self.status.get())
            .finish_non_exhaustive()
    }
}
