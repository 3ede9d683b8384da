//! Wiring of the whole hub.
//!
//! [`Hub::start`] builds the shared state from configuration, starts the enabled
//! links, the polling jobs and serial discovery, and hands collaborators (display,
//! CSV logger, recorder) the store and the links to send commands on.

use crate::config::HubConfig;
use crate::error::AppResult;
use crate::link::{PingLink, StreamLink};
use crate::mapping::FieldMap;
use crate::protocol::Command;
use crate::scheduler::Scheduler;
use crate::serial::{PortClassifier, SerialOpener, SystemSerial};
use crate::state::{EmergencyCause, SharedState};
use crate::video::DatagramImageLink;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

/// A running hub.
pub struct Hub {
    config: HubConfig,
    state: Arc<SharedState>,
    rov: Arc<StreamLink>,
    camera: Arc<StreamLink>,
    ping: Arc<PingLink>,
    video: Option<Arc<DatagramImageLink>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Hub {
    /// Start with the host's serial ports.
    pub async fn start(config: HubConfig) -> AppResult<Self> {
        Self::start_with(config, Arc::new(SystemSerial)).await
    }

    /// Start with a custom serial backend.
    ///
    /// # Errors
    /// Fails only if the image socket cannot be bound; every other component
    /// recovers on its own.
    pub async fn start_with(config: HubConfig, opener: Arc<dyn SerialOpener>) -> AppResult<Self> {
        let state = Arc::new(SharedState::new(&config.state));

        let rov = Arc::new(StreamLink::new(
            config.rov.clone(),
            Command::FetchAllData,
            FieldMap::rov(),
            state.clone(),
        ));
        let camera = Arc::new(StreamLink::new(
            config.camera.clone(),
            Command::GetData,
            FieldMap::camera(),
            state.clone(),
        ));
        let ping = Arc::new(PingLink::new(config.ping.clone(), state.clone()));

        let scheduler = Scheduler::new(config.scheduler.clone());
        let mut tasks = Vec::new();

        for (link, enabled) in [(&rov, config.rov.enabled), (&camera, config.camera.enabled)] {
            if enabled {
                tasks.push(tokio::spawn(link.clone().run()));
                tasks.push(scheduler.spawn_fetch(link.clone()));
            }
        }
        if config.ping.enabled {
            tasks.push(scheduler.spawn_ping(ping.clone()));
        }

        let video = if config.video.enabled {
            let link = DatagramImageLink::bind(config.video.clone(), state.clone()).await?;
            tasks.push(tokio::spawn(link.clone().run()));
            Some(link)
        } else {
            None
        };

        if config.serial.enabled {
            let classifier = PortClassifier::new(config.serial.clone(), opener, state.clone());
            tasks.push(tokio::spawn(async move {
                let mut ingests = JoinSet::new();
                let report = classifier.discover_into(&mut ingests).await;
                info!(
                    promoted = report.promoted.len(),
                    unreadable = report.unreadable.len(),
                    "Serial discovery finished"
                );
                while let Some(result) = ingests.join_next().await {
                    if let Err(e) = result {
                        warn!(error = %e, "Serial ingest task ended");
                    }
                }
            }));
        }

        info!(tasks = tasks.len(), "Hub started");
        Ok(Self {
            config,
            state,
            rov,
            camera,
            ping,
            video,
            tasks,
        })
    }

    /// Effective configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The shared store.
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Vehicle controller link.
    pub fn rov(&self) -> &Arc<StreamLink> {
        &self.rov
    }

    /// Camera controller link.
    pub fn camera(&self) -> &Arc<StreamLink> {
        &self.camera
    }

    /// Latency probe.
    pub fn ping(&self) -> &Arc<PingLink> {
        &self.ping
    }

    /// Image link, if enabled.
    pub fn video(&self) -> Option<&Arc<DatagramImageLink>> {
        self.video.as_ref()
    }

    /// Raise emergency mode and order the vehicle to surface.
    ///
    /// Emergency mode is raised even if the command cannot be delivered.
    pub async fn emergency_surface(&self) -> AppResult<()> {
        self.state.raise_emergency(EmergencyCause::Operator);
        self.rov
            .send_command(&Command::EmergencySurface)
            .await
            .map(|_| ())
    }

    /// Stop every task the hub spawned.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        info!("Hub stopped");
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("state", &self.state)
            .field("rov", &self.rov)
            .field("camera", &self.camera)
            .field("ping", &self.ping)
            .field("video", &self.video)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
