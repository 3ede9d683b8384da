//! The shared, concurrently-mutated store of every telemetry channel.
//!
//! [`SharedState`] is built once at startup and shared as `Arc<SharedState>` by every
//! link, ingest task and collaborator. Each channel is guarded on its own:
//!
//! - numeric and boolean channels live in atomics, so a reader sees either the old
//!   or the new value, never a torn one
//! - text channels, the image slot, each history buffer and the device registry sit
//!   behind their own `parking_lot::RwLock`
//!
//! There is no cross-channel transaction. Every write fires the subscriber callbacks
//! synchronously on the writer's thread.
//!
//! # Emergency mode
//!
//! `emergency_mode` is sticky. It is raised by a leak, an I²C error, a voltage
//! reading in the undervoltage window, or a lost link, and only an explicit
//! write of `false` ([`SharedState::clear_emergency`]) lowers it again.

mod channel;
mod history;
mod observer;
mod registry;

pub use channel::{Channel, ChannelKind, ChannelValue, Flag, Measurement, Setting};
pub use history::{HistoryBuffer, HistoryKind, Sample};
pub use observer::{StateObserver, SubscriptionId};
pub use registry::{DeviceRegistry, DeviceRole, Promotion};

use crate::config::StateConfig;
use crate::error::{AppResult, HubError};
use chrono::Local;
use image::DynamicImage;
use observer::ObserverSet;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why emergency mode was raised.
#[derive(Debug, Clone, PartialEq)]
pub enum EmergencyCause {
    /// Water ingress reported.
    Leak,
    /// I²C bus failure reported.
    I2cError,
    /// Supply voltage reading below the threshold.
    Undervoltage(f64),
    /// An established link faulted.
    LinkLost(String),
    /// Raised by the operator.
    Operator,
}

impl fmt::Display for EmergencyCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmergencyCause::Leak => write!(f, "leak detected"),
            EmergencyCause::I2cError => write!(f, "I2C error"),
            EmergencyCause::Undervoltage(v) => write!(f, "undervoltage ({v} V)"),
            EmergencyCause::LinkLost(link) => write!(f, "lost link '{link}'"),
            EmergencyCause::Operator => write!(f, "operator request"),
        }
    }
}

/// The shared store.
pub struct SharedState {
    numbers: Vec<AtomicU64>,
    flags: Vec<AtomicBool>,
    settings: Vec<RwLock<String>>,
    image: RwLock<Option<Arc<DynamicImage>>>,
    image_sequence: AtomicU64,
    rov_depth_history: RwLock<HistoryBuffer<Sample>>,
    depth_beneath_boat_history: RwLock<HistoryBuffer<Sample>>,
    registry: RwLock<DeviceRegistry>,
    emergency_cause: RwLock<Option<EmergencyCause>>,
    undervoltage_threshold: f64,
    voltage_floor: f64,
    observers: ObserverSet,
}

impl SharedState {
    /// Build a store holding every channel's initial value, then apply the seed.
    ///
    /// Seed entries are validated by [`HubConfig::validate`](crate::config::HubConfig::validate);
    /// any that still fail to apply are logged and skipped.
    pub fn new(config: &StateConfig) -> Self {
        let state = Self {
            numbers: Measurement::ALL
                .iter()
                .map(|m| AtomicU64::new(m.initial().to_bits()))
                .collect(),
            flags: Flag::ALL
                .iter()
                .map(|f| AtomicBool::new(f.initial()))
                .collect(),
            settings: Setting::ALL
                .iter()
                .map(|s| RwLock::new(s.initial()))
                .collect(),
            image: RwLock::new(None),
            image_sequence: AtomicU64::new(0),
            rov_depth_history: RwLock::new(HistoryBuffer::new(config.rov_depth_history)),
            depth_beneath_boat_history: RwLock::new(HistoryBuffer::new(
                config.depth_beneath_boat_history,
            )),
            registry: RwLock::new(DeviceRegistry::new()),
            emergency_cause: RwLock::new(None),
            undervoltage_threshold: config.undervoltage_threshold,
            voltage_floor: config.voltage_floor,
            observers: ObserverSet::default(),
        };

        for (name, value) in &config.seed {
            let applied = name
                .parse::<Channel>()
                .and_then(|channel| state.set_from_str(channel, value));
            if let Err(e) = applied {
                warn!(channel = %name, value = %value, error = %e, "Ignoring seed entry");
            }
        }

        state
    }

    // ---- numeric channels ----

    /// Current value of a numeric channel.
    pub fn measurement(&self, channel: Measurement) -> f64 {
        f64::from_bits(self.numbers[channel.index()].load(Ordering::Acquire))
    }

    /// Write a numeric channel.
    ///
    /// Depth channels with a history also append a time-tagged sample. A voltage
    /// above the floor but below the undervoltage threshold raises emergency mode;
    /// readings at or below the floor are taken as a sensor without supply.
    pub fn set_measurement(&self, channel: Measurement, value: f64) {
        self.numbers[channel.index()].store(value.to_bits(), Ordering::Release);

        match channel {
            Measurement::RovDepth => self.record(HistoryKind::RovDepth, value),
            Measurement::DepthBeneathBoat => self.record(HistoryKind::DepthBeneathBoat, value),
            Measurement::Voltage
                if value > self.voltage_floor && value < self.undervoltage_threshold =>
            {
                self.latch_emergency(EmergencyCause::Undervoltage(value));
            }
            _ => {}
        }

        self.observers.notify();
    }

    // ---- boolean channels ----

    /// Current value of a boolean channel.
    pub fn flag(&self, channel: Flag) -> bool {
        self.flags[channel.index()].load(Ordering::Acquire)
    }

    /// Write a boolean channel.
    ///
    /// `leak` or `i2c_error` set to true raises emergency mode; setting them false
    /// leaves it as it is. Writing `emergency_mode` directly is the operator path
    /// and is applied as given.
    pub fn set_flag(&self, channel: Flag, value: bool) {
        match channel {
            Flag::EmergencyMode if value => self.latch_emergency(EmergencyCause::Operator),
            Flag::EmergencyMode => self.lower_emergency(),
            _ => {
                self.flags[channel.index()].store(value, Ordering::Release);
                if value {
                    match channel {
                        Flag::Leak => self.latch_emergency(EmergencyCause::Leak),
                        Flag::I2cError => self.latch_emergency(EmergencyCause::I2cError),
                        _ => {}
                    }
                }
            }
        }

        self.observers.notify();
    }

    // ---- text channels ----

    /// Current value of a text channel.
    pub fn setting(&self, channel: Setting) -> String {
        self.settings[channel.index()].read().clone()
    }

    /// Write a text channel.
    pub fn set_setting(&self, channel: Setting, value: impl Into<String>) {
        *self.settings[channel.index()].write() = value.into();
        self.observers.notify();
    }

    // ---- name-addressed access ----

    /// Current value of any channel.
    pub fn get(&self, channel: Channel) -> ChannelValue {
        match channel {
            Channel::Measurement(m) => ChannelValue::Number(self.measurement(m)),
            Channel::Flag(f) => ChannelValue::Flag(self.flag(f)),
            Channel::Setting(s) => ChannelValue::Text(self.setting(s)),
        }
    }

    /// Write any channel with a value of the matching kind.
    pub fn set(&self, channel: Channel, value: ChannelValue) -> AppResult<()> {
        match (channel, value) {
            (Channel::Measurement(m), ChannelValue::Number(v)) => self.set_measurement(m, v),
            (Channel::Flag(f), ChannelValue::Flag(v)) => self.set_flag(f, v),
            (Channel::Setting(s), ChannelValue::Text(v)) => self.set_setting(s, v),
            (channel, value) => {
                return Err(HubError::InvalidValue {
                    channel: channel.name().to_string(),
                    value: value.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Parse `raw` according to the channel's kind and write it.
    pub fn set_from_str(&self, channel: Channel, raw: &str) -> AppResult<()> {
        let value =
            ChannelValue::parse(channel.kind(), raw).ok_or_else(|| HubError::InvalidValue {
                channel: channel.name().to_string(),
                value: raw.to_string(),
            })?;
        self.set(channel, value)
    }

    /// Every channel by name, for loggers and status output.
    pub fn snapshot(&self) -> BTreeMap<&'static str, ChannelValue> {
        Channel::all()
            .map(|channel| (channel.name(), self.get(channel)))
            .collect()
    }

    // ---- emergency mode ----

    /// Raise emergency mode.
    pub fn raise_emergency(&self, cause: EmergencyCause) {
        self.latch_emergency(cause);
        self.observers.notify();
    }

    /// Lower emergency mode. The operator's explicit acknowledgement.
    pub fn clear_emergency(&self) {
        self.lower_emergency();
        self.observers.notify();
    }

    /// Cause of the most recent raise, if emergency mode is active.
    pub fn emergency_cause(&self) -> Option<EmergencyCause> {
        self.emergency_cause.read().clone()
    }

    // Flag and cause only change together, under the cause lock.
    fn latch_emergency(&self, cause: EmergencyCause) {
        let mut slot = self.emergency_cause.write();
        let was_active = self.flags[Flag::EmergencyMode.index()].swap(true, Ordering::AcqRel);
        if !was_active {
            warn!(cause = %cause, "Emergency mode raised");
        }
        *slot = Some(cause);
    }

    fn lower_emergency(&self) {
        let mut slot = self.emergency_cause.write();
        let was_active = self.flags[Flag::EmergencyMode.index()].swap(false, Ordering::AcqRel);
        if was_active {
            warn!("Emergency mode cleared by operator");
        }
        *slot = None;
    }

    // ---- image ----

    /// Publish the latest decoded frame.
    pub fn set_image(&self, image: DynamicImage) {
        *self.image.write() = Some(Arc::new(image));
        self.image_sequence.fetch_add(1, Ordering::AcqRel);
        self.observers.notify();
    }

    /// Latest frame, if any has arrived.
    pub fn image(&self) -> Option<Arc<DynamicImage>> {
        self.image.read().clone()
    }

    /// Frames published so far; lets consumers skip frames they have already seen.
    pub fn image_sequence(&self) -> u64 {
        self.image_sequence.load(Ordering::Acquire)
    }

    // ---- history ----

    fn history_buffer(&self, kind: HistoryKind) -> &RwLock<HistoryBuffer<Sample>> {
        match kind {
            HistoryKind::RovDepth => &self.rov_depth_history,
            HistoryKind::DepthBeneathBoat => &self.depth_beneath_boat_history,
        }
    }

    fn record(&self, kind: HistoryKind, value: f64) {
        self.history_buffer(kind).write().push(Sample {
            time: Local::now(),
            value,
        });
    }

    /// Samples of one history, oldest first.
    pub fn history(&self, kind: HistoryKind) -> Vec<Sample> {
        self.history_buffer(kind).read().snapshot()
    }

    /// Configured capacity of one history.
    pub fn history_capacity(&self, kind: HistoryKind) -> usize {
        self.history_buffer(kind).read().capacity()
    }

    // ---- device registry ----

    /// Record a classified device; see [`DeviceRegistry::promote`].
    pub fn promote_device(&self, port: &str, role: DeviceRole) -> Promotion {
        let promotion = self.registry.write().promote(port, role);
        if promotion.applied() {
            debug!(port = %port, role = %role, "Device registered");
            self.observers.notify();
        }
        promotion
    }

    /// Exclude a port from further probing.
    pub fn mark_unreadable(&self, port: &str) -> bool {
        let marked = self.registry.write().mark_unreadable(port);
        if marked {
            self.observers.notify();
        }
        marked
    }

    /// Role recorded for `port`.
    pub fn device_role(&self, port: &str) -> Option<DeviceRole> {
        self.registry.read().get(port)
    }

    /// Copy of the registry.
    pub fn registry(&self) -> DeviceRegistry {
        self.registry.read().clone()
    }

    // ---- subscription ----

    /// Register a change callback. The store keeps only a weak handle: the observer
    /// stops being called once the caller drops its `Arc`.
    pub fn subscribe(&self, observer: &Arc<dyn StateObserver>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    /// Remove a callback before its `Arc` is dropped.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Live or not-yet-pruned subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.observers.len()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(&StateConfig::default())
    }
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedState")
            .field("emergency_mode", &self.flag(Flag::EmergencyMode))
            .field("image_sequence", &self.image_sequence())
            .field("devices", &self.registry.read().len())
            .field("subscribers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn starts_from_initial_values_and_seed() {
        let mut config = StateConfig::default();
        config.seed.insert("kp_depth".into(), "1.5".into());
        config.seed.insert("photo_delay".into(), "2.0".into());
        let state = SharedState::new(&config);

        assert_eq!(state.measurement(Measurement::RovPing), 999.99);
        assert_eq!(state.measurement(Measurement::PhotoDelay), 2.0);
        assert_eq!(state.setting(Setting::KpDepth), "1.5");
        assert_eq!(state.setting(Setting::IpRov), "192.168.0.101");
        assert!(state.flag(Flag::Logging));
        assert!(!state.flag(Flag::EmergencyMode));
    }

    #[test]
    fn leak_latches_emergency() {
        let state = SharedState::default();
        state.set_flag(Flag::Leak, true);
        assert!(state.flag(Flag::EmergencyMode));
        assert_eq!(state.emergency_cause(), Some(EmergencyCause::Leak));

        state.set_flag(Flag::Leak, false);
        assert!(state.flag(Flag::EmergencyMode));

        state.clear_emergency();
        assert!(!state.flag(Flag::EmergencyMode));
        assert_eq!(state.emergency_cause(), None);
    }

    #[test]
    fn undervoltage_window_latches_emergency() {
        let state = SharedState::default();
        state.set_measurement(Measurement::Voltage, 30.0);
        assert!(!state.flag(Flag::EmergencyMode));
        // at or below the floor nothing is measured
        state.set_measurement(Measurement::Voltage, 0.01);
        assert!(!state.flag(Flag::EmergencyMode));
        state.set_measurement(Measurement::Voltage, 26.5);
        assert!(state.flag(Flag::EmergencyMode));
        state.set_measurement(Measurement::Voltage, 30.0);
        assert!(state.flag(Flag::EmergencyMode));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let state = SharedState::default();
        let err = state
            .set(Channel::Flag(Flag::Leak), ChannelValue::Number(1.0))
            .unwrap_err();
        assert!(matches!(err, HubError::InvalidValue { .. }));
        assert!(!state.flag(Flag::Leak));
        assert!(state
            .set_from_str(Channel::Measurement(Measurement::Roll), "abc")
            .is_err());
    }

    #[test]
    fn every_write_notifies() {
        let state = SharedState::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let observer: Arc<dyn StateObserver> = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        state.subscribe(&observer);

        state.set_measurement(Measurement::Roll, 1.0);
        state.set_flag(Flag::Streaming, true);
        state.set_setting(Setting::KdTrim, "0.1");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn depth_writes_are_recorded() {
        let config = StateConfig {
            rov_depth_history: 2,
            ..StateConfig::default()
        };
        let state = SharedState::new(&config);
        for depth in [1.0, 2.0, 3.0] {
            state.set_measurement(Measurement::RovDepth, depth);
        }
        let values: Vec<f64> = state
            .history(HistoryKind::RovDepth)
            .iter()
            .map(|s| s.value)
            .collect();
        assert_eq!(values, vec![2.0, 3.0]);
        assert!(state.history(HistoryKind::DepthBeneathBoat).is_empty());
    }
}
