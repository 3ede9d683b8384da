//! Operator command vocabulary.
//!
//! [`Command`] covers everything sent over a stream link (vehicle or camera
//! controller); [`ControlMessage`] covers the ASCII control datagrams sent back to the
//! image streamer. Both render to the exact text the remote firmware expects via
//! `Display`; stream commands are additionally framed with [`encode`](super::encode)
//! before hitting the wire.

use crate::error::{AppResult, HubError};
use std::fmt;

/// Depth-control strategy of the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    /// Hold a fixed depth below the surface.
    Depth = 0,
    /// Hold a fixed distance above the seafloor.
    Seafloor = 1,
    /// Wing angle is commanded directly.
    Manual = 2,
}

impl TryFrom<u8> for TargetMode {
    type Error = HubError;

    fn try_from(value: u8) -> AppResult<Self> {
        match value {
            0 => Ok(TargetMode::Depth),
            1 => Ok(TargetMode::Seafloor),
            2 => Ok(TargetMode::Manual),
            other => Err(HubError::InvalidCommand(format!(
                "target mode must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

/// A command for a stream link.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Request every feedback field from the vehicle controller.
    FetchAllData,
    /// Request every sensor field from the camera controller.
    GetData,
    /// Round-trip probe.
    Ping,
    /// Select the depth-control strategy.
    TargetMode(TargetMode),
    /// Setpoint in meters for the active target mode.
    TargetDistance(f64),
    /// Wing angle in degrees (manual mode).
    WingAngle(f64),
    /// Abort and surface immediately.
    EmergencySurface,
    /// Proportional gain of the depth loop, as entered by the operator.
    PidP(String),
    /// Integral gain of the depth loop.
    PidI(String),
    /// Derivative gain of the depth loop.
    PidD(String),
    /// Offset applied to the depth-beneath-vehicle reading.
    OffsetDepthBeneathRov(String),
    /// Offset applied to the vehicle depth reading.
    OffsetRovDepth(String),
    /// Return the wing steppers to their reference position.
    ResetSteppers,
    /// Camera lights, percent (0–100). Prefer [`Command::set_led`].
    SetLed(u8),
    /// Camera tilt step (-10..=10). Prefer [`Command::set_pitch`].
    SetPitch(i8),
    /// Anything else; sent verbatim.
    Raw(String),
}

impl Command {
    /// Camera light level, validated to 0–100.
    pub fn set_led(percent: u8) -> AppResult<Self> {
        if percent > 100 {
            return Err(HubError::InvalidCommand(format!(
                "setLed must be within 0..=100, got {percent}"
            )));
        }
        Ok(Command::SetLed(percent))
    }

    /// Camera tilt, validated to -10..=10.
    pub fn set_pitch(step: i8) -> AppResult<Self> {
        if !(-10..=10).contains(&step) {
            return Err(HubError::InvalidCommand(format!(
                "setPitch must be within -10..=10, got {step}"
            )));
        }
        Ok(Command::SetPitch(step))
    }

    /// Range-check a command however it was built. Stream links refuse to send a
    /// command that fails this.
    ///
    /// # Errors
    /// [`HubError::InvalidCommand`] for an out-of-range light level or tilt step.
    pub fn validate(&self) -> AppResult<()> {
        match *self {
            Command::SetLed(percent) => Self::set_led(percent).map(drop),
            Command::SetPitch(step) => Self::set_pitch(step).map(drop),
            _ => Ok(()),
        }
    }

    /// True for commands whose reply carries the full field set to apply to the store.
    #[must_use]
    pub fn is_fetch_all(&self) -> bool {
        matches!(self, Command::FetchAllData | Command::GetData)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::FetchAllData => write!(f, "fb_allData"),
            Command::GetData => write!(f, "getData"),
            Command::Ping => write!(f, "ping"),
            Command::TargetMode(mode) => write!(f, "cmd_targetMode:{}", *mode as u8),
            Command::TargetDistance(meters) => write!(f, "cmd_targetDistance:{meters}"),
            Command::WingAngle(degrees) => write!(f, "cmd_wingAng:{degrees}"),
            Command::EmergencySurface => write!(f, "cmd_emergencySurface"),
            Command::PidP(v) => write!(f, "cmd_pid_p:{v}"),
            Command::PidI(v) => write!(f, "cmd_pid_i:{v}"),
            Command::PidD(v) => write!(f, "cmd_pid_d:{v}"),
            Command::OffsetDepthBeneathRov(v) => write!(f, "cmd_offsetDepthBeneathROV:{v}"),
            Command::OffsetRovDepth(v) => write!(f, "cmd_offsetROVdepth:{v}"),
            Command::ResetSteppers => write!(f, "cmd_resetSteppers"),
            Command::SetLed(percent) => write!(f, "setLed:{percent}"),
            Command::SetPitch(step) => write!(f, "setPitch:{step}"),
            Command::Raw(text) => f.write_str(text),
        }
    }
}

/// A control datagram for the image streamer.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Switch still-photo mode on or off.
    PhotoMode(bool),
    /// Seconds between still photos.
    PhotoDelay(f64),
    /// Restart the streamer's image counter.
    ResetImageNumber,
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::PhotoMode(on) => write!(f, "photoMode:{on}"),
            ControlMessage::PhotoDelay(seconds) => write!(f, "photoDelay:{seconds}"),
            ControlMessage::ResetImageNumber => write!(f, "resetImgNumber"),
        }
    }
}
