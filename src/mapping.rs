//! Typed field maps: remote key to store channel.
//!
//! Every ingest path (stream link, serial device) owns one [`FieldMap`] built for the
//! device it talks to. Unknown keys are ignored; values that fail to parse are
//! skipped without touching the store.

use crate::protocol::Frame;
use crate::state::{
    Channel, ChannelKind, ChannelValue, DeviceRole, Flag, Measurement, SharedState,
};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Conversion applied to the raw value before it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Parse according to the channel's kind.
    Identity,
    /// Parse as a number and flip the sign (depths reported positive-down).
    Negate,
    /// `1` is true, `0` is false, anything else is ignored.
    BinaryCode,
}

/// Where one remote key goes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldBinding {
    /// Destination channel.
    pub channel: Channel,
    /// Conversion of the raw text.
    pub transform: Transform,
}

impl FieldBinding {
    /// Convert `raw` for this binding's channel.
    pub fn convert(&self, raw: &str) -> Option<ChannelValue> {
        match self.transform {
            Transform::Identity => ChannelValue::parse(self.channel.kind(), raw),
            Transform::Negate => match ChannelValue::parse(ChannelKind::Number, raw)? {
                ChannelValue::Number(v) => Some(ChannelValue::Number(-v)),
                _ => None,
            },
            Transform::BinaryCode => match raw.trim() {
                "1" => Some(ChannelValue::Flag(true)),
                "0" => Some(ChannelValue::Flag(false)),
                _ => None,
            },
        }
    }
}

/// Counters from one [`FieldMap::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Pairs written to the store.
    pub applied: usize,
    /// Keys without a binding.
    pub unknown: usize,
    /// Bound keys whose value did not convert.
    pub invalid: usize,
}

/// Key table for one device.
#[derive(Debug, Clone)]
pub struct FieldMap {
    name: &'static str,
    bindings: HashMap<&'static str, FieldBinding>,
}

impl FieldMap {
    /// Empty map; `name` shows up in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            bindings: HashMap::new(),
        }
    }

    /// Add a binding with [`Transform::Identity`].
    #[must_use]
    pub fn bind(self, key: &'static str, channel: impl Into<Channel>) -> Self {
        self.bind_with(key, channel, Transform::Identity)
    }

    /// Add a binding with an explicit transform.
    #[must_use]
    pub fn bind_with(
        mut self,
        key: &'static str,
        channel: impl Into<Channel>,
        transform: Transform,
    ) -> Self {
        self.bindings.insert(
            key,
            FieldBinding {
                channel: channel.into(),
                transform,
            },
        );
        self
    }

    /// Name of the device this map belongs to.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Binding for `key`.
    pub fn binding(&self, key: &str) -> Option<&FieldBinding> {
        self.bindings.get(key)
    }

    /// Number of bound keys.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Write every recognized pair of `frame` into `state`, in frame order.
    pub fn apply(&self, frame: &Frame, state: &SharedState) -> ApplyReport {
        let mut report = ApplyReport::default();
        for (key, raw) in frame.iter() {
            let Some(binding) = self.bindings.get(key) else {
                trace!(map = self.name, key, "Ignoring unmapped key");
                report.unknown += 1;
                continue;
            };
            match binding.convert(raw) {
                Some(value) => match state.set(binding.channel, value) {
                    Ok(()) => report.applied += 1,
                    Err(e) => {
                        debug!(map = self.name, key, error = %e, "Rejected value");
                        report.invalid += 1;
                    }
                },
                None => {
                    debug!(map = self.name, key, value = raw, "Unparseable value");
                    report.invalid += 1;
                }
            }
        }
        report
    }

    /// Feedback fields of the vehicle controller (`fb_allData`).
    pub fn rov() -> Self {
        Self::new("rov")
            .bind("Fb_wingPosSb", Measurement::WingAngleSb)
            .bind("Fb_wingPosPort", Measurement::WingAnglePort)
            .bind("Fb_rollAngle", Measurement::RollAngle)
            .bind("Fb_pitchAngle", Measurement::PitchAngle)
            .bind("Fb_depthToSeabedEcho", Measurement::DepthBeneathRov)
            .bind("Fb_depthBelowTransduser", Measurement::DepthBeneathRov)
            .bind("Fb_depthBeneathROV", Measurement::DepthBeneathRov)
            .bind("Fb_tempElBoxFront", Measurement::TempElBoxFront)
            .bind("Fb_tempElBoxRear", Measurement::TempElBoxRear)
            .bind("Fb_ROVReady", Flag::RovReady)
            .bind("ERROR_I2C", Flag::I2cError)
    }

    /// Sensor fields of the camera controller (`getData`).
    pub fn camera() -> Self {
        Self::new("camera")
            .bind_with("leakAlarm", Flag::Leak, Transform::BinaryCode)
            .bind("depth", Measurement::RovDepth)
            .bind("pressure", Measurement::Pressure)
            .bind("outsideTemp", Measurement::OutsideTemp)
            .bind("insideTemp", Measurement::InsideTemp)
            .bind("humidity", Measurement::Humidity)
    }

    /// Key table of a classified serial device. Unreadable ports get an empty map.
    pub fn for_role(role: DeviceRole) -> Self {
        match role {
            DeviceRole::Imu => Self::new("imu")
                .bind("Roll", Measurement::Roll)
                .bind("Pitch", Measurement::Pitch)
                .bind("Heading", Measurement::Heading)
                .bind("Voltage", Measurement::Voltage),
            DeviceRole::Gps => Self::new("gps")
                .bind("Satelites_in_view_value_0", Measurement::Satellites)
                .bind("Altitude", Measurement::Altitude)
                .bind("GPSAngle", Measurement::GpsAngle)
                .bind("Speed", Measurement::Speed)
                .bind("GPS_and_DOP_and_active_satalites_value_0", Measurement::Latitude)
                .bind("Global_Positions_System_fix_data_value_1", Measurement::Longitude)
                .bind("Voltage", Measurement::Voltage),
            DeviceRole::EchoSounder => Self::echo_sounder("echo_sounder"),
            DeviceRole::Simulation => Self::echo_sounder("simulation")
                .bind("Roll", Measurement::Roll)
                .bind("Pitch", Measurement::Pitch)
                .bind("Heading", Measurement::Heading)
                .bind("TestDepth", Measurement::TestDepth),
            DeviceRole::Unreadable => Self::new("unreadable"),
        }
    }

    fn echo_sounder(name: &'static str) -> Self {
        let negated = [
            "Depth_of_water_0",
            "Depth_of_water_1",
            "Depth_of_water_2",
            "Depth_of_water_value_0",
            "Depth_below_Transducer_M",
        ];
        negated
            .into_iter()
            .fold(Self::new(name), |map, key| {
                map.bind_with(key, Measurement::DepthBeneathBoat, Transform::Negate)
            })
            .bind("Mean_Temprature_Water_C", Measurement::Temperature)
            .bind("Voltage", Measurement::Voltage)
    }
}
