//! Layered hub configuration using Figment.
//!
//! Configuration is merged from, in increasing priority:
//! 1. compiled-in defaults ([`HubConfig::default`])
//! 2. a TOML file (`config/rov-hub.toml` unless another path is given)
//! 3. environment variables prefixed with `ROV_HUB_`, with `__` separating nested keys
//!
//! Durations are stored as integer milliseconds and exposed as [`Duration`] through
//! accessors.
//!
//! # Example
//! ```no_run
//! use rov_hub::config::HubConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // ROV_HUB_ROV__HOST=10.0.0.5 overrides rov.host
//! let config = HubConfig::load()?;
//! config.validate()?;
//! println!("vehicle controller at {}", config.rov.address());
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, HubError};
use crate::state::Channel;
use crate::validation;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/rov-hub.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "ROV_HUB_";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Vehicle controller stream link
    pub rov: StreamLinkConfig,
    /// Camera controller stream link
    pub camera: StreamLinkConfig,
    /// Latency probe
    pub ping: PingConfig,
    /// Datagram image link
    pub video: VideoConfig,
    /// Serial discovery and ingestion
    pub serial: SerialConfig,
    /// Polling periods
    pub scheduler: SchedulerConfig,
    /// Shared state
    pub state: StateConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            rov: StreamLinkConfig::rov(),
            camera: StreamLinkConfig::camera(),
            ping: PingConfig::default(),
            video: VideoConfig::default(),
            serial: SerialConfig::default(),
            scheduler: SchedulerConfig::default(),
            state: StateConfig::default(),
        }
    }
}

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored (development)
    Pretty,
    /// One line per event, no colors
    Compact,
    /// JSON objects for log aggregation
    Json,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "ROV Hub".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// One request/response stream link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamLinkConfig {
    /// Name used in logs and errors.
    pub name: String,
    /// Whether the hub starts this link.
    pub enabled: bool,
    /// Remote IP address.
    pub host: String,
    /// Remote TCP port.
    pub port: u16,
    /// Connect attempt timeout.
    pub connect_timeout_ms: u64,
    /// Timeout of one write plus its response line.
    pub io_timeout_ms: u64,
    /// Delay before reconnecting after a failed connect or a fault.
    pub retry_delay_ms: u64,
    /// Raise emergency mode when an established connection faults.
    pub emergency_on_loss: bool,
}

impl StreamLinkConfig {
    /// Defaults for the vehicle controller.
    pub fn rov() -> Self {
        Self {
            name: "rov".to_string(),
            enabled: true,
            host: "192.168.0.101".to_string(),
            port: 8088,
            connect_timeout_ms: 3000,
            io_timeout_ms: 3000,
            retry_delay_ms: 5000,
            emergency_on_loss: true,
        }
    }

    /// Defaults for the camera controller.
    pub fn camera() -> Self {
        Self {
            name: "camera".to_string(),
            host: "192.168.0.102".to_string(),
            port: 9006,
            emergency_on_loss: false,
            ..Self::rov()
        }
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// I/O timeout as a [`Duration`].
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Reconnect delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    fn validate(&self, section: &str) -> AppResult<()> {
        check(section, "host", validation::is_valid_ip(&self.host))?;
        check(section, "port", validation::is_valid_port(self.port))?;
        check(
            section,
            "connect_timeout_ms",
            validation::is_nonzero_ms(self.connect_timeout_ms),
        )?;
        check(
            section,
            "io_timeout_ms",
            validation::is_nonzero_ms(self.io_timeout_ms),
        )?;
        check(
            section,
            "retry_delay_ms",
            validation::is_nonzero_ms(self.retry_delay_ms),
        )
    }
}

impl Default for StreamLinkConfig {
    fn default() -> Self {
        Self::rov()
    }
}

/// Latency probe against the vehicle controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingConfig {
    /// Whether the hub starts the probe.
    pub enabled: bool,
    /// Remote IP address.
    pub host: String,
    /// Remote TCP port.
    pub port: u16,
    /// Connect attempt timeout.
    pub connect_timeout_ms: u64,
    /// How long to wait for the reply before writing the sentinel.
    pub reply_timeout_ms: u64,
    /// Delay before reconnecting after a fault.
    pub retry_delay_ms: u64,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "192.168.0.101".to_string(),
            port: 8088,
            connect_timeout_ms: 3000,
            reply_timeout_ms: 3000,
            retry_delay_ms: 5000,
        }
    }
}

impl PingConfig {
    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reply timeout as a [`Duration`].
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Reconnect delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Datagram image link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Whether the hub starts the image link.
    pub enabled: bool,
    /// Local address to bind.
    pub bind_address: String,
    /// Local UDP port.
    pub port: u16,
    /// The socket is closed and reopened this often.
    pub refresh_interval_ms: u64,
    /// Receive buffer size; larger datagrams are truncated and fail to decode.
    pub max_datagram_bytes: usize,
    /// Root of the photo archive.
    pub photo_dir: PathBuf,
    /// In photo mode, a frame after a longer wait counts as a new still photo.
    pub photo_wait_threshold_ms: u64,
    /// Photo writes allowed in flight; frames arriving beyond that are not archived.
    pub max_pending_photos: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 8083,
            refresh_interval_ms: 60_000,
            max_datagram_bytes: 60_000,
            photo_dir: PathBuf::from("photos"),
            photo_wait_threshold_ms: 500,
            max_pending_photos: 4,
        }
    }
}

impl VideoConfig {
    /// `bind_address:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Socket reopen interval as a [`Duration`].
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Photo counting threshold as a [`Duration`].
    pub fn photo_wait_threshold(&self) -> Duration {
        Duration::from_millis(self.photo_wait_threshold_ms)
    }
}

/// Serial discovery and ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Whether the hub runs discovery at startup.
    pub enabled: bool,
    /// Candidate rates; one discovery pass per entry.
    pub baud_rates: Vec<u32>,
    /// Wait after opening a port before the probe read.
    pub settle_ms: u64,
    /// Bound on the single probe read.
    pub probe_timeout_ms: u64,
    /// Failed probe attempts before a port is marked unreadable.
    pub max_probe_attempts: u32,
    /// Classified roles required before discovery stops restarting.
    pub min_roles: usize,
    /// Pause between discovery rounds.
    pub restart_delay_ms: u64,
    /// Discovery rounds before giving up; 0 keeps trying.
    pub max_rounds: u32,
    /// Only ports whose name contains this substring are probed.
    pub port_filter: Option<String>,
    /// Size of one read.
    pub read_buffer_bytes: usize,
    /// Pause after a failed read or open in an ingest loop.
    pub retry_delay_ms: u64,
    /// Consecutive read errors after which an ingest reopens its port.
    pub reopen_after_errors: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            baud_rates: vec![115_200, 9600, 4800],
            settle_ms: 5000,
            probe_timeout_ms: 2000,
            max_probe_attempts: 3,
            min_roles: 3,
            restart_delay_ms: 1000,
            max_rounds: 0,
            port_filter: None,
            read_buffer_bytes: 1024,
            retry_delay_ms: 1000,
            reopen_after_errors: 10,
        }
    }
}

impl SerialConfig {
    /// Settle time as a [`Duration`].
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Probe read bound as a [`Duration`].
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Discovery restart pause as a [`Duration`].
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Ingest retry pause as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Polling periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period of the fetch-all requests on both stream links.
    pub fetch_period_ms: u64,
    /// Period of the latency probe.
    pub ping_period_ms: u64,
    /// Delay before the first tick.
    pub start_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fetch_period_ms: 100,
            ping_period_ms: 1000,
            start_delay_ms: 1000,
        }
    }
}

impl SchedulerConfig {
    /// Fetch period as a [`Duration`].
    pub fn fetch_period(&self) -> Duration {
        Duration::from_millis(self.fetch_period_ms)
    }

    /// Probe period as a [`Duration`].
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    /// Initial delay as a [`Duration`].
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}

/// Shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// A voltage reading below this (and above the floor) raises emergency mode.
    pub undervoltage_threshold: f64,
    /// Readings at or below this are treated as "no supply measured".
    pub voltage_floor: f64,
    /// Capacity of the vehicle depth history.
    pub rov_depth_history: usize,
    /// Capacity of the depth-beneath-boat history.
    pub depth_beneath_boat_history: usize,
    /// Persisted operator settings, channel name to value.
    pub seed: BTreeMap<String, String>,
}

impl Default for StateConfig {
    fn default() -> Self {
        let seed = [
            ("ip_rov", "192.168.0.101"),
            ("ip_camera", "192.168.0.102"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            undervoltage_threshold: 28.0,
            voltage_floor: 25.0,
            rov_depth_history: 260,
            depth_beneath_boat_history: 300,
            seed,
        }
    }
}

impl HubConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment. A missing file is not an
    /// error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// The merged provider chain, exposed so callers can layer extra providers.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(HubConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AppResult<()> {
        check(
            "application",
            "log_level",
            validation::is_valid_log_level(&self.application.log_level),
        )?;

        self.rov.validate("rov")?;
        self.camera.validate("camera")?;

        check("ping", "host", validation::is_valid_ip(&self.ping.host))?;
        check("ping", "port", validation::is_valid_port(self.ping.port))?;
        check(
            "ping",
            "connect_timeout_ms",
            validation::is_nonzero_ms(self.ping.connect_timeout_ms),
        )?;
        check(
            "ping",
            "reply_timeout_ms",
            validation::is_nonzero_ms(self.ping.reply_timeout_ms),
        )?;
        check(
            "ping",
            "retry_delay_ms",
            validation::is_nonzero_ms(self.ping.retry_delay_ms),
        )?;

        check(
            "video",
            "bind_address",
            validation::is_valid_ip(&self.video.bind_address),
        )?;
        check(
            "video",
            "refresh_interval_ms",
            validation::is_nonzero_ms(self.video.refresh_interval_ms),
        )?;
        check(
            "video",
            "max_datagram_bytes",
            validation::is_in_range(self.video.max_datagram_bytes, 1..=65_535),
        )?;
        check(
            "video",
            "max_pending_photos",
            validation::is_in_range(self.video.max_pending_photos, 1..=usize::MAX),
        )?;
        check(
            "video",
            "photo_dir",
            validation::is_valid_path(&self.video.photo_dir.to_string_lossy()),
        )?;

        if self.serial.baud_rates.is_empty() {
            return Err(HubError::Configuration(
                "serial.baud_rates must list at least one rate".into(),
            ));
        }
        for &baud in &self.serial.baud_rates {
            check("serial", "baud_rates", validation::is_valid_baud(baud))?;
        }
        check(
            "serial",
            "probe_timeout_ms",
            validation::is_nonzero_ms(self.serial.probe_timeout_ms),
        )?;
        check(
            "serial",
            "max_probe_attempts",
            validation::is_in_range(self.serial.max_probe_attempts, 1..=u32::MAX),
        )?;
        check(
            "serial",
            "read_buffer_bytes",
            validation::is_in_range(self.serial.read_buffer_bytes, 1..=usize::MAX),
        )?;
        check(
            "serial",
            "retry_delay_ms",
            validation::is_nonzero_ms(self.serial.retry_delay_ms),
        )?;

        check(
            "scheduler",
            "fetch_period_ms",
            validation::is_nonzero_ms(self.scheduler.fetch_period_ms),
        )?;
        check(
            "scheduler",
            "ping_period_ms",
            validation::is_nonzero_ms(self.scheduler.ping_period_ms),
        )?;

        for (key, value) in &self.state.seed {
            let channel: Channel = key.parse().map_err(|_| {
                HubError::Configuration(format!("state.seed: unknown channel '{key}'"))
            })?;
            if crate::state::ChannelValue::parse(channel.kind(), value).is_none() {
                return Err(HubError::Configuration(format!(
                    "state.seed.{key}: '{value}' is not a valid {:?} value",
                    channel.kind()
                )));
            }
        }

        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| HubError::Configuration(format!("failed to render configuration: {e}")))
    }
}

fn check(section: &str, field: &str, result: Result<(), &'static str>) -> AppResult<()> {
    result.map_err(|reason| HubError::Configuration(format!("{section}.{field}: {reason}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = HubConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rov.address(), "192.168.0.101:8088");
        assert_eq!(config.camera.address(), "192.168.0.102:9006");
        assert_eq!(config.video.port, 8083);
        assert_eq!(config.serial.baud_rates, vec![115_200, 9600, 4800]);
        assert_eq!(config.scheduler.fetch_period(), Duration::from_millis(100));
        assert_eq!(config.state.rov_depth_history, 260);
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = HubConfig::default();
        config.application.log_level = "loud".into();
        assert!(matches!(
            config.validate(),
            Err(HubError::Configuration(msg)) if msg.contains("log_level")
        ));
    }

    #[test]
    fn zero_period_and_empty_bauds_are_rejected() {
        let mut config = HubConfig::default();
        config.scheduler.fetch_period_ms = 0;
        assert!(config.validate().is_err());

        let mut config = HubConfig::default();
        config.serial.baud_rates.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let mut config = HubConfig::default();
        config.ping.connect_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(HubError::Configuration(msg)) if msg.starts_with("ping.connect_timeout_ms")
        ));

        let mut config = HubConfig::default();
        config.serial.probe_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(HubError::Configuration(msg)) if msg.starts_with("serial.probe_timeout_ms")
        ));

        let mut config = HubConfig::default();
        config.video.max_pending_photos = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_seed_channel_is_rejected() {
        let mut config = HubConfig::default();
        config.state.seed.insert("warp_drive".into(), "1".into());
        assert!(config.validate().is_err());

        let mut config = HubConfig::default();
        config.state.seed.insert("photo_delay".into(), "soon".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn renders_toml() {
        let rendered = HubConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[rov]"));
        assert!(rendered.contains("port = 8088"));
    }
}
