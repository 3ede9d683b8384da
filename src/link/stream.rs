//! Auto-reconnecting request/response link to a remote controller.
//!
//! One TCP connection, one frame per line in each direction. [`StreamLink::run`]
//! owns the connection lifecycle; [`StreamLink::send_command`] performs exchanges on
//! whatever connection is currently open. The connection sits behind an async mutex
//! that is held for a whole write-then-read exchange, so at most one request is in
//! flight and concurrent callers queue up behind it.

use super::state::{LinkState, LinkStatus};
use crate::config::StreamLinkConfig;
use crate::error::{AppResult, HubError};
use crate::mapping::{ApplyReport, FieldMap};
use crate::protocol::{decode, encode, Command};
use crate::state::{EmergencyCause, SharedState};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// Marker of a soft failure in a response body.
pub const NOT_READY: &str = "not ready";

/// Placeholder character the controller uses for fields it has no value for yet.
const PLACEHOLDER: char = '?';

type Connection = BufStream<TcpStream>;

/// Outcome of a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A fetch-all reply was decoded and applied.
    Applied(ApplyReport),
    /// The remote answered "not ready".
    NotReady,
    /// Any other command was answered; the body is discarded.
    Accepted,
}

/// A persistent link to one remote controller.
pub struct StreamLink {
    config: StreamLinkConfig,
    fetch: Command,
    field_map: FieldMap,
    state: Arc<SharedState>,
    connection: Mutex<Option<Connection>>,
    status: LinkStatus,
    fault: Notify,
}

impl StreamLink {
    /// Build a link. Nothing connects until [`run`](Self::run) is spawned.
    ///
    /// `fetch` is the command [`fetch_all`](Self::fetch_all) sends; its replies are
    /// applied to `state` through `field_map`.
    pub fn new(
        config: StreamLinkConfig,
        fetch: Command,
        field_map: FieldMap,
        state: Arc<SharedState>,
    ) -> Self {
        let status = LinkStatus::new(config.name.clone());
        Self {
            config,
            fetch,
            field_map,
            state,
            connection: Mutex::new(None),
            status,
            fault: Notify::new(),
        }
    }

    /// Link name from configuration.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Connection state and transitions.
    pub fn status(&self) -> &LinkStatus {
        &self.status
    }

    /// Shorthand for `status().get()`.
    pub fn link_state(&self) -> LinkState {
        self.status.get()
    }

    /// Connection supervisor. Never returns; spawn it.
    #[instrument(skip(self), fields(link = %self.config.name, addr = %self.config.address()))]
    pub async fn run(self: Arc<Self>) {
        let address = self.config.address();
        loop {
            self.status.set(LinkState::Connecting);
            match timeout(self.config.connect_timeout(), TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(error = %e, "Could not disable Nagle");
                    }
                    *self.connection.lock().await = Some(BufStream::new(stream));
                    self.status.set(LinkState::Connected);
                    info!("Connected");

                    // a fault is signalled by the exchange that hit it
                    self.fault.notified().await;
                }
                Ok(Err(e)) => {
                    self.status.set(LinkState::Disconnected);
                    warn!(error = %e, retry_in_ms = self.config.retry_delay_ms, "Connect failed");
                }
                Err(_) => {
                    self.status.set(LinkState::Disconnected);
                    warn!(retry_in_ms = self.config.retry_delay_ms, "Connect timed out");
                }
            }
            sleep(self.config.retry_delay()).await;
        }
    }

    /// Send the configured fetch-all command and apply its reply.
    pub async fn fetch_all(&self) -> AppResult<Response> {
        let command = self.fetch.clone();
        self.send_command(&command).await
    }

    /// One request/response exchange.
    ///
    /// # Errors
    /// - [`HubError::InvalidCommand`] if the command fails [`Command::validate`];
    ///   nothing is sent
    /// - [`HubError::NotConnected`] if no connection is open
    /// - [`HubError::ConnectionFault`] on timeout, reset or EOF; the link drops the
    ///   connection and moves to `Faulted`
    /// - [`HubError::FormatFault`] if a fetch-all reply has no frame; the store is
    ///   not touched and the link stays connected
    pub async fn send_command(&self, command: &Command) -> AppResult<Response> {
        command.validate()?;
        let mut guard = self.connection.lock().await;
        let Some(connection) = guard.as_mut() else {
            return Err(HubError::NotConnected(self.config.name.clone()));
        };

        let request = encode(&command.to_string());
        let reply = match timeout(self.config.io_timeout(), exchange(connection, &request)).await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(self.fault(guard, e)),
            Err(_) => {
                let e = io::Error::new(io::ErrorKind::TimedOut, "no response within io timeout");
                return Err(self.fault(guard, e));
            }
        };
        drop(guard);

        if reply.contains(NOT_READY) {
            debug!(link = %self.config.name, %command, "Remote not ready");
            return Ok(Response::NotReady);
        }

        if !command.is_fetch_all() {
            return Ok(Response::Accepted);
        }

        let cleaned: String = reply.chars().filter(|&c| c != PLACEHOLDER).collect();
        let frame = decode(&cleaned).inspect_err(|e| {
            warn!(link = %self.config.name, error = %e, "Dropping malformed reply");
        })?;
        if let Some(extra) = frame.trailing() {
            debug!(link = %self.config.name, token = extra, "Dropped unpaired trailing token");
        }
        Ok(Response::Applied(self.field_map.apply(&frame, &self.state)))
    }

    fn fault(&self, mut guard: MutexGuard<'_, Option<Connection>>, error: io::Error) -> HubError {
        *guard = None;
        drop(guard);

        let previous = self.status.set(LinkState::Faulted);
        warn!(link = %self.config.name, error = %error, "Link faulted");
        if previous == LinkState::Connected && self.config.emergency_on_loss {
            self.state
                .raise_emergency(EmergencyCause::LinkLost(self.config.name.clone()));
        }
        self.fault.notify_one();
        HubError::connection(self.config.name.clone(), error)
    }
}

async fn exchange(connection: &mut Connection, request: &str) -> io::Result<String> {
    connection.write_all(request.as_bytes()).await?;
    connection.write_all(b"\n").await?;
    connection.flush().await?;

    let mut line = String::new();
    if connection.read_line(&mut line).await? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "remote closed the connection",
        ));
    }
    Ok(line)
}

impl std::fmt::Debug for StreamLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLink")
            .field("name", &self.config.name)
            .field("address", &self.config.address())
            .field("state", &self.status.get())
            .finish_non_exhaustive()
    }
}
