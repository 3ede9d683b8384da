//! Device identification from a sample of serial output.
//!
//! A sample is whatever one probe read returned: usually a few complete frames
//! plus fragments at either end. Every complete frame is decoded and its keys are
//! matched against the known markers:
//!
//! | Marker | Role |
//! |--------|------|
//! | key contains `EchoSounder`, or a frame opening with `<[` | echo sounder |
//! | key contains `ROVDummy` or `Test` | simulation rig |
//! | key starts with `GPS` | GPS |
//! | key contains `Roll` | IMU |
//!
//! When keys for several roles appear, the first row of the table wins.

use crate::protocol::{decode, END_DELIMITER, START_DELIMITER};
use crate::state::DeviceRole;
use serde::Serialize;

const PRIORITY: [DeviceRole; 4] = [
    DeviceRole::EchoSounder,
    DeviceRole::Simulation,
    DeviceRole::Gps,
    DeviceRole::Imu,
];

/// A classification and the keys that support it. `matched` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    /// Inferred role.
    pub role: DeviceRole,
    /// Keys of the sample that carry the role's marker.
    pub matched: Vec<String>,
}

fn role_of(key: &str) -> Option<DeviceRole> {
    if key.contains("EchoSounder") || key.starts_with('[') {
        Some(DeviceRole::EchoSounder)
    } else if key.contains("ROVDummy") || key.contains("Test") {
        Some(DeviceRole::Simulation)
    } else if key.starts_with("GPS") {
        Some(DeviceRole::Gps)
    } else if key.contains("Roll") {
        Some(DeviceRole::Imu)
    } else {
        None
    }
}

/// Every key of every complete frame in `sample`, in order.
pub fn sample_keys(sample: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = sample;
    while let Some(start) = rest.find(START_DELIMITER) {
        let Some(len) = rest[start..].find(END_DELIMITER) else {
            break;
        };
        let end = start + len + END_DELIMITER.len_utf8();
        if let Ok(frame) = decode(&rest[start..end]) {
            keys.extend(frame.keys().map(str::to_string));
            // a lone key still identifies a device
            keys.extend(frame.trailing().map(str::to_string));
        }
        rest = &rest[end..];
    }
    keys
}

/// Classify a sample. `None` if no key carries a known marker.
pub fn fingerprint(sample: &str) -> Option<Fingerprint> {
    let keys = sample_keys(sample);
    PRIORITY.into_iter().find_map(|role| {
        let matched: Vec<String> = keys
            .iter()
            .filter(|key| role_of(key) == Some(role))
            .cloned()
            .collect();
        (!matched.is_empty()).then_some(Fingerprint { role, matched })
    })
}
