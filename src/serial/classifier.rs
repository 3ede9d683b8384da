//! Serial port auto-discovery.
//!
//! A discovery round runs one pass per configured baud rate. In each pass every
//! port that has no registry entry yet is opened, given time to start talking, read
//! once, and fingerprinted. After the pass, classified ports are promoted into the
//! registry of the shared state and handed to the caller (which spawns their
//! ingests). Rounds repeat until enough distinct roles are known.
//!
//! - an I/O failure while probing is retried up to `max_probe_attempts` times within
//!   the pass; after that the port is marked `Unreadable` and never probed again
//! - a clean read without any fingerprint leaves the port for the next pass
//! - a port is only promoted with at least one matched fingerprint key

use super::fingerprint::{fingerprint, Fingerprint};
use super::ingest::SerialIngest;
use super::port::SerialOpener;
use crate::config::SerialConfig;
use crate::error::{AppResult, HubError};
use crate::state::SharedState;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// A port classified during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortCandidate {
    /// Port name.
    pub port: String,
    /// Rate the sample was read at.
    pub baud: u32,
    /// What identified it.
    pub fingerprint: Fingerprint,
}

/// Summary of [`PortClassifier::discover`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    /// Rounds run.
    pub rounds: u32,
    /// Ports promoted into the registry, in promotion order.
    pub promoted: Vec<PortCandidate>,
    /// Ports marked unreadable.
    pub unreadable: Vec<String>,
}

/// Finds and identifies serial devices.
pub struct PortClassifier {
    config: SerialConfig,
    opener: Arc<dyn SerialOpener>,
    state: Arc<SharedState>,
}

impl PortClassifier {
    /// Build a classifier over `opener`'s ports, writing into `state`'s registry.
    pub fn new(config: SerialConfig, opener: Arc<dyn SerialOpener>, state: Arc<SharedState>) -> Self {
        Self {
            config,
            opener,
            state,
        }
    }

    /// Run discovery without starting any ingest.
    pub async fn discover(&self) -> DiscoveryReport {
        self.discover_with(|_| {}).await
    }

    /// Run discovery and spawn one [`SerialIngest`] per promoted port into
    /// `ingests`, right after the pass that promoted it. Dropping the set stops them.
    pub async fn discover_into(&self, ingests: &mut JoinSet<()>) -> DiscoveryReport {
        self.discover_with(|candidate| {
            ingests.spawn(self.ingest_for(candidate).run());
        })
        .await
    }

    /// The ingest for a promoted port, at the rate it was classified with.
    pub fn ingest_for(&self, candidate: &PortCandidate) -> SerialIngest {
        SerialIngest::new(
            candidate.port.clone(),
            candidate.baud,
            candidate.fingerprint.role,
            self.config.clone(),
            self.opener.clone(),
            self.state.clone(),
        )
    }

    /// Run rounds until `min_roles` distinct roles are registered or `max_rounds`
    /// is reached (0 never gives up). `on_promoted` is called after each pass for
    /// every port that pass promoted.
    #[instrument(skip_all)]
    pub async fn discover_with(&self, mut on_promoted: impl FnMut(&PortCandidate)) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        loop {
            report.rounds += 1;
            match self.ports() {
                Ok(ports) => {
                    debug!(round = report.rounds, ports = ?ports, "Discovery round");
                    for &baud in &self.config.baud_rates {
                        self.pass(&ports, baud, &mut report, &mut on_promoted).await;
                    }
                }
                Err(e) => warn!(error = %e, "Could not enumerate serial ports"),
            }

            let roles = self.state.registry().classified_roles().len();
            if roles >= self.config.min_roles {
                info!(roles, rounds = report.rounds, "Discovery complete");
                break;
            }
            if self.config.max_rounds != 0 && report.rounds >= self.config.max_rounds {
                warn!(
                    roles,
                    wanted = self.config.min_roles,
                    rounds = report.rounds,
                    "Giving up discovery"
                );
                break;
            }
            info!(
                roles,
                wanted = self.config.min_roles,
                "Too few devices found; restarting discovery"
            );
            sleep(self.config.restart_delay()).await;
        }

        report
    }

    fn ports(&self) -> AppResult<Vec<String>> {
        let mut ports = self.opener.available_ports()?;
        if let Some(filter) = &self.config.port_filter {
            ports.retain(|port| port.contains(filter.as_str()));
        }
        Ok(ports)
    }

    async fn pass(
        &self,
        ports: &[String],
        baud: u32,
        report: &mut DiscoveryReport,
        on_promoted: &mut impl FnMut(&PortCandidate),
    ) {
        let mut found = Vec::new();

        for port in ports {
            if self.state.device_role(port).is_some() {
                continue;
            }
            match self.probe(port, baud).await {
                Ok(Some(fingerprint)) => {
                    debug!(port = %port, baud, role = %fingerprint.role, keys = ?fingerprint.matched, "Port fingerprinted");
                    found.push(PortCandidate {
                        port: port.clone(),
                        baud,
                        fingerprint,
                    });
                }
                Ok(None) => debug!(port = %port, baud, "No fingerprint in sample"),
                Err(e) => {
                    warn!(port = %port, error = %e, "Marking port unreadable");
                    if self.state.mark_unreadable(port) {
                        report.unreadable.push(port.clone());
                    }
                }
            }
        }

        for candidate in found {
            if candidate.fingerprint.matched.is_empty() {
                continue;
            }
            let promotion = self
                .state
                .promote_device(&candidate.port, candidate.fingerprint.role);
            if promotion.applied() {
                info!(port = %candidate.port, role = %candidate.fingerprint.role, baud, "Device promoted");
                on_promoted(&candidate);
                report.promoted.push(candidate);
            }
        }
    }

    /// Probe one port at one rate, retrying I/O failures.
    ///
    /// # Errors
    /// [`HubError::DeviceUnclassified`] once every attempt has failed.
    pub async fn probe(&self, port: &str, baud: u32) -> AppResult<Option<Fingerprint>> {
        let attempts = self.config.max_probe_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.sample(port, baud).await {
                Ok(sample) => return Ok(sample.as_deref().and_then(fingerprint)),
                Err(e) => {
                    debug!(port, baud, attempt, error = %e, "Probe failed");
                    last_error = Some(e);
                }
            }
        }

        Err(HubError::DeviceUnclassified {
            port: port.to_string(),
            reason: last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string()),
        })
    }

    /// Open, wait for the device to talk, read once. `None` if it stayed silent.
    async fn sample(&self, port: &str, baud: u32) -> AppResult<Option<String>> {
        let mut io = self.opener.open(port, baud)?;
        sleep(self.config.settle()).await;

        let mut buffer = vec![0u8; self.config.read_buffer_bytes.max(1)];
        match timeout(self.config.probe_timeout(), io.read(&mut buffer)).await {
            Ok(Ok(0)) | Err(_) => Ok(None),
            Ok(Ok(n)) => Ok(Some(String::from_utf8_lossy(&buffer[..n]).into_owned())),
            Ok(Err(e)) => Err(HubError::Io(e)),
        }
    }
}

impl std::fmt::Debug for PortClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortClassifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
