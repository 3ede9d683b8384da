//! Channel catalogue of the shared state.
//!
//! Channels come in three kinds, each with its own closed enum so that writes are
//! typed at compile time:
//!
//! | Kind | Enum | Storage |
//! |------|------|---------|
//! | numeric | [`Measurement`] | `f64` |
//! | boolean | [`Flag`] | `bool` |
//! | text / identifier | [`Setting`] | `String` |
//!
//! [`Channel`] unifies them for name-based lookups (collaborators that address fields
//! by their string name, such as the CSV logger).

use crate::error::{AppResult, HubError};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

macro_rules! channel_enum {
    (
        $(#[$meta:meta])*
        $name:ident : $value:ty {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal = $default:expr ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )*
        }

        impl $name {
            /// Every channel of this kind, in declaration order.
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )* ];

            /// Stable channel name used by collaborators and logs.
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => $wire, )*
                }
            }

            /// Value the channel holds before anything writes to it.
            #[must_use]
            pub fn initial(self) -> $value {
                match self {
                    $( $name::$variant => <$value>::from($default), )*
                }
            }

            pub(crate) fn index(self) -> usize {
                self as usize
            }

            /// Reverse of [`name`](Self::name).
            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|c| c.name() == name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

channel_enum! {
    /// Numeric channels.
    Measurement: f64 {
        /// GPS satellites in view.
        Satellites => "satellites" = 0.0,
        /// GPS altitude.
        Altitude => "altitude" = 0.0,
        /// GPS course over ground, degrees.
        GpsAngle => "gps_angle" = 0.0,
        /// GPS speed over ground.
        Speed => "speed" = 0.0,
        /// Boat latitude.
        Latitude => "latitude" = 0.0,
        /// Boat longitude.
        Longitude => "longitude" = 0.0,
        /// Depth reported by the boat-side sensors.
        Depth => "depth" = 0.01,
        /// Water temperature at the boat, °C.
        Temperature => "temperature" = 0.01,
        /// Supply voltage.
        Voltage => "voltage" = 0.01,
        /// Echo-sounder depth below the boat (negative down).
        DepthBeneathBoat => "depth_beneath_boat" = 0.0,
        /// Depth reported by a simulation rig.
        TestDepth => "test_depth" = 0.0,
        /// Boat roll from the IMU, degrees.
        Roll => "roll" = 0.0,
        /// Boat pitch from the IMU, degrees.
        Pitch => "pitch" = 0.0,
        /// Boat heading, degrees.
        Heading => "heading" = 100.0,
        /// Port wing angle feedback.
        WingAnglePort => "wing_angle_port" = 0.0,
        /// Starboard wing angle feedback.
        WingAngleSb => "wing_angle_sb" = 0.0,
        /// Vehicle roll, degrees.
        RollAngle => "roll_angle" = 0.0,
        /// Vehicle pitch, degrees.
        PitchAngle => "pitch_angle" = 0.0,
        /// Distance from the vehicle to the seabed.
        DepthBeneathRov => "depth_beneath_rov" = 0.0,
        /// Front electronics box temperature.
        TempElBoxFront => "temp_el_box_front" = 0.0,
        /// Rear electronics box temperature.
        TempElBoxRear => "temp_el_box_rear" = 0.0,
        /// Vehicle depth below the surface.
        RovDepth => "rov_depth" = 0.0,
        /// Hull pressure.
        Pressure => "pressure" = 0.0,
        /// Water temperature at the vehicle.
        OutsideTemp => "outside_temp" = 0.0,
        /// Temperature inside the camera housing.
        InsideTemp => "inside_temp" = 0.0,
        /// Humidity inside the camera housing.
        Humidity => "humidity" = 0.0,
        /// Round-trip latency to the vehicle, ms. 999.99 means unreachable.
        RovPing => "rov_ping" = 999.99,
        /// Requested seconds between still photos.
        PhotoDelay => "photo_delay" = 1.0,
        /// Observed seconds between received frames.
        PhotoDelayFeedback => "photo_delay_feedback" = 1.0,
        /// Still photos taken since the counter was last reset.
        ImageNumber => "image_number" = 0.0,
        /// Camera tilt step.
        CameraPitch => "camera_pitch" = 0.0,
    }
}

channel_enum! {
    /// Boolean channels.
    Flag: bool {
        /// Water ingress detected in the vehicle.
        Leak => "leak" = false,
        /// The vehicle controller lost its I²C bus.
        I2cError => "i2c_error" = false,
        /// The vehicle controller reports ready.
        RovReady => "rov_ready" = false,
        /// Operator steers the wings by hand.
        ManualMode => "manual_mode" = false,
        /// Sticky emergency state; see [`SharedState`](super::SharedState).
        EmergencyMode => "emergency_mode" = false,
        /// Image datagrams are arriving.
        Streaming => "streaming" = false,
        /// The CSV logger should be writing.
        Logging => "logging" = true,
        /// Still-photo mode of the camera.
        PhotoMode => "photo_mode" = false,
        /// Depth controller on the vehicle is engaged.
        ControllerEnabled => "controller_enabled" = false,
    }
}

channel_enum! {
    /// Text channels (addresses and operator-entered tuning strings).
    Setting: String {
        /// Address of the vehicle controller.
        IpRov => "ip_rov" = "0",
        /// Address of the camera controller.
        IpCamera => "ip_camera" = "0",
        /// Depth loop P.
        KpDepth => "kp_depth" = "0",
        /// Depth loop I.
        KiDepth => "ki_depth" = "0",
        /// Depth loop D.
        KdDepth => "kd_depth" = "0",
        /// Seafloor loop P.
        KpSeafloor => "kp_seafloor" = "0",
        /// Seafloor loop I.
        KiSeafloor => "ki_seafloor" = "0",
        /// Seafloor loop D.
        KdSeafloor => "kd_seafloor" = "0",
        /// Trim loop P.
        KpTrim => "kp_trim" = "0",
        /// Trim loop I.
        KiTrim => "ki_trim" = "0",
        /// Trim loop D.
        KdTrim => "kd_trim" = "0",
        /// Offset applied to the depth beneath the vehicle.
        OffsetDepthBeneathRov => "offset_depth_beneath_rov" = "0.00",
        /// Offset applied to the vehicle depth.
        OffsetRovDepth => "offset_rov_depth" = "0.00",
    }
}

/// Kind of value a channel holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// `f64`
    Number,
    /// `bool`
    Flag,
    /// `String`
    Text,
}

/// Any channel, addressed by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// A numeric channel.
    Measurement(Measurement),
    /// A boolean channel.
    Flag(Flag),
    /// A text channel.
    Setting(Setting),
}

impl Channel {
    /// Every channel of every kind.
    pub fn all() -> impl Iterator<Item = Channel> {
        Measurement::ALL
            .iter()
            .map(|&m| Channel::Measurement(m))
            .chain(Flag::ALL.iter().map(|&f| Channel::Flag(f)))
            .chain(Setting::ALL.iter().map(|&s| Channel::Setting(s)))
    }

    /// Stable channel name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Channel::Measurement(m) => m.name(),
            Channel::Flag(f) => f.name(),
            Channel::Setting(s) => s.name(),
        }
    }

    /// Kind of value stored.
    #[must_use]
    pub fn kind(self) -> ChannelKind {
        match self {
            Channel::Measurement(_) => ChannelKind::Number,
            Channel::Flag(_) => ChannelKind::Flag,
            Channel::Setting(_) => ChannelKind::Text,
        }
    }
}

impl From<Measurement> for Channel {
    fn from(value: Measurement) -> Self {
        Channel::Measurement(value)
    }
}

impl From<Flag> for Channel {
    fn from(value: Flag) -> Self {
        Channel::Flag(value)
    }
}

impl From<Setting> for Channel {
    fn from(value: Setting) -> Self {
        Channel::Setting(value)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = HubError;

    fn from_str(s: &str) -> AppResult<Self> {
        Measurement::from_name(s)
            .map(Channel::Measurement)
            .or_else(|| Flag::from_name(s).map(Channel::Flag))
            .or_else(|| Setting::from_name(s).map(Channel::Setting))
            .ok_or_else(|| HubError::InvalidValue {
                channel: "<unknown>".into(),
                value: s.to_string(),
            })
    }
}

/// A dynamically-typed channel value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChannelValue {
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Flag(bool),
    /// Text value.
    Text(String),
}

impl ChannelValue {
    /// Parse `raw` as a value of `kind`.
    ///
    /// Flags accept `true`/`false` in any case and the controller's `1`/`0`.
    pub fn parse(kind: ChannelKind, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match kind {
            ChannelKind::Number => raw.parse::<f64>().ok().map(ChannelValue::Number),
            ChannelKind::Flag => parse_flag(raw).map(ChannelValue::Flag),
            ChannelKind::Text => Some(ChannelValue::Text(raw.to_string())),
        }
    }
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelValue::Number(v) => write!(f, "{v}"),
            ChannelValue::Flag(v) => write!(f, "{v}"),
            ChannelValue::Text(v) => f.write_str(v),
        }
    }
}

pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    if raw == "1" || raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw == "0" || raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
