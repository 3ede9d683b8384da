//! Fixed-rate polling of the links.
//!
//! Each job runs on its own task: wait the start delay, then run once per period.
//! A job that overruns its period makes the scheduler skip the missed ticks rather
//! than fire them back to back. Jobs that share a link queue on the link's own
//! exchange lock.

use crate::config::SchedulerConfig;
use crate::error::HubError;
use crate::link::{PingLink, StreamLink};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Spawns the periodic jobs.
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    /// Scheduler with the configured periods.
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Run `job` every `period`, the first time after `start_delay`.
    pub fn every<F, Fut>(start_delay: Duration, period: Duration, mut job: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + start_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                job().await;
            }
        })
    }

    /// Poll `link` with its fetch-all command every fetch period.
    pub fn spawn_fetch(&self, link: Arc<StreamLink>) -> JoinHandle<()> {
        Self::every(
            self.config.start_delay(),
            self.config.fetch_period(),
            move || {
                let link = link.clone();
                async move {
                    match link.fetch_all().await {
                        Ok(response) => trace!(link = link.name(), ?response, "Fetched"),
                        Err(HubError::NotConnected(_)) => {}
                        Err(e) => debug!(link = link.name(), error = %e, "Fetch failed"),
                    }
                }
            },
        )
    }

    /// Probe latency every ping period.
    pub fn spawn_ping(&self, ping: Arc<PingLink>) -> JoinHandle<()> {
        Self::every(
            self.config.start_delay(),
            self.config.ping_period(),
            move || {
                let ping = ping.clone();
                async move {
                    match ping.probe().await {
                        Ok(Some(latency)) => trace!(?latency, "Ping"),
                        Ok(None) | Err(HubError::NotConnected(_)) => {}
                        Err(e) => debug!(error = %e, "Ping failed"),
                    }
                }
            },
        )
    }
}
