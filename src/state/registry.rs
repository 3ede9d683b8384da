//! Serial device registry: which port carries which instrument.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Inferred role of a serial device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    /// Motion sensor (roll, pitch, heading).
    Imu,
    /// Satellite position receiver.
    Gps,
    /// Depth sounder under the boat.
    EchoSounder,
    /// Bench rig emitting test frames.
    Simulation,
    /// Probing failed repeatedly; never probed again.
    Unreadable,
}

impl DeviceRole {
    /// Roles that produce telemetry.
    pub const CLASSIFIED: [DeviceRole; 4] = [
        DeviceRole::Imu,
        DeviceRole::Gps,
        DeviceRole::EchoSounder,
        DeviceRole::Simulation,
    ];

    /// True for every role but [`DeviceRole::Unreadable`].
    #[must_use]
    pub fn is_classified(self) -> bool {
        self != DeviceRole::Unreadable
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceRole::Imu => "IMU",
            DeviceRole::Gps => "GPS",
            DeviceRole::EchoSounder => "EchoSounder",
            DeviceRole::Simulation => "Simulation",
            DeviceRole::Unreadable => "Unreadable",
        };
        f.write_str(name)
    }
}

/// Outcome of [`DeviceRegistry::promote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// The port was new to the registry.
    Inserted,
    /// The port had been marked unreadable and now has a role.
    Reclassified,
    /// The port already carries a role; the registry is unchanged.
    Kept(DeviceRole),
}

impl Promotion {
    /// True if the registry changed.
    #[must_use]
    pub fn applied(self) -> bool {
        !matches!(self, Promotion::Kept(_))
    }
}

/// Port name to role. A classified entry is never overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeviceRegistry {
    entries: BTreeMap<String, DeviceRole>,
}

impl DeviceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `role` for `port` unless the port already has a classified role.
    ///
    /// Promoting to [`DeviceRole::Unreadable`] behaves like
    /// [`mark_unreadable`](Self::mark_unreadable).
    pub fn promote(&mut self, port: &str, role: DeviceRole) -> Promotion {
        if !role.is_classified() {
            return if self.mark_unreadable(port) {
                Promotion::Inserted
            } else {
                Promotion::Kept(self.entries[port])
            };
        }
        match self.entries.get(port).copied() {
            Some(existing) if existing.is_classified() => Promotion::Kept(existing),
            Some(_) => {
                self.entries.insert(port.to_string(), role);
                Promotion::Reclassified
            }
            None => {
                self.entries.insert(port.to_string(), role);
                Promotion::Inserted
            }
        }
    }

    /// Mark `port` unreadable if it has no entry yet. Returns true if recorded.
    pub fn mark_unreadable(&mut self, port: &str) -> bool {
        if self.entries.contains_key(port) {
            return false;
        }
        self.entries
            .insert(port.to_string(), DeviceRole::Unreadable);
        true
    }

    /// Role of `port`.
    pub fn get(&self, port: &str) -> Option<DeviceRole> {
        self.entries.get(port).copied()
    }

    /// True if `port` has any entry (classified or unreadable); such ports are not
    /// probed again.
    pub fn is_settled(&self, port: &str) -> bool {
        self.entries.contains_key(port)
    }

    /// Distinct classified roles found so far.
    pub fn classified_roles(&self) -> BTreeSet<DeviceRole> {
        self.entries
            .values()
            .copied()
            .filter(|role| role.is_classified())
            .collect()
    }

    /// All entries, sorted by port name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, DeviceRole)> {
        self.entries.iter().map(|(port, role)| (port.as_str(), *role))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classified_entries_are_not_overwritten() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(registry.promote("/dev/ttyUSB0", DeviceRole::Imu), Promotion::Inserted);
        assert_eq!(
            registry.promote("/dev/ttyUSB0", DeviceRole::Gps),
            Promotion::Kept(DeviceRole::Imu)
        );
        assert!(!registry.mark_unreadable("/dev/ttyUSB0"));
        assert_eq!(registry.get("/dev/ttyUSB0"), Some(DeviceRole::Imu));
    }

    #[test]
    fn unreadable_can_be_reclassified() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.mark_unreadable("COM3"));
        assert!(registry.is_settled("COM3"));
        assert!(registry.classified_roles().is_empty());
        assert_eq!(registry.promote("COM3", DeviceRole::Gps), Promotion::Reclassified);
        assert_eq!(
            registry.classified_roles().into_iter().collect::<Vec<_>>(),
            vec![DeviceRole::Gps]
        );
    }
}
