//! Serial discovery and ingestion against in-memory devices.

use rov_hub::config::{SerialConfig, StateConfig};
use rov_hub::serial::{PortClassifier, SerialIo, SerialOpener};
use rov_hub::state::{DeviceRole, Measurement, SharedState};
use rov_hub::{AppResult, HubError};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};

/// What a fake port produces when opened at a given rate.
#[derive(Clone)]
enum Device {
    Talks(&'static str),
    Broken,
}

#[derive(Default)]
struct FakePorts {
    ports: Vec<String>,
    devices: HashMap<(String, u32), Device>,
    opens: parking_lot::Mutex<HashMap<String, usize>>,
    total_opens: AtomicUsize,
}

impl FakePorts {
    fn with_port(mut self, port: &str) -> Self {
        self.ports.push(port.to_string());
        self
    }

    fn at(mut self, port: &str, baud: u32, device: Device) -> Self {
        self.devices.insert((port.to_string(), baud), device);
        self
    }

    fn opens(&self, port: &str) -> usize {
        self.opens.lock().get(port).copied().unwrap_or(0)
    }
}

impl SerialOpener for FakePorts {
    fn available_ports(&self) -> AppResult<Vec<String>> {
        Ok(self.ports.clone())
    }

    fn open(&self, port: &str, baud: u32) -> AppResult<Box<dyn SerialIo>> {
        *self.opens.lock().entry(port.to_string()).or_default() += 1;
        self.total_opens.fetch_add(1, Ordering::SeqCst);
        match self.devices.get(&(port.to_string(), baud)) {
            Some(Device::Talks(output)) => Ok(Box::new(Cursor::new(output.as_bytes().to_vec()))),
            Some(Device::Broken) => Err(HubError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "access denied",
            ))),
            // silent at this rate
            None => Ok(Box::new(Cursor::new(Vec::new()))),
        }
    }
}

fn serial_config() -> SerialConfig {
    SerialConfig {
        baud_rates: vec![115_200, 9_600],
        settle_ms: 1,
        probe_timeout_ms: 100,
        max_probe_attempts: 3,
        min_roles: 2,
        restart_delay_ms: 5,
        max_rounds: 1,
        retry_delay_ms: 20,
        ..SerialConfig::default()
    }
}

fn shared_state() -> Arc<SharedState> {
    Arc::new(SharedState::new(&StateConfig::default()))
}

#[tokio::test]
async fn test_discovery_classifies_each_port() {
    let fake = Arc::new(
        FakePorts::default()
            .with_port("/dev/ttyUSB0")
            .with_port("/dev/ttyUSB1")
            .with_port("/dev/ttyUSB2")
            .at("/dev/ttyUSB0", 115_200, Device::Talks("\u{fffd}\u{fffd}x"))
            .at("/dev/ttyUSB0", 9_600, Device::Talks("ll:2>\n<Roll:1.5:Pitch:0.2:Heading:88>\n<Ro"))
            .at("/dev/ttyUSB1", 115_200, Device::Talks("<GPS_and_DOP_and_active_satalites_value_0:63.44>"))
            .at("/dev/ttyUSB2", 115_200, Device::Broken)
            .at("/dev/ttyUSB2", 9_600, Device::Broken),
    );
    let state = shared_state();
    let classifier = PortClassifier::new(serial_config(), fake.clone(), state.clone());

    let report = classifier.discover().await;

    assert_eq!(report.rounds, 1);
    assert_eq!(state.device_role("/dev/ttyUSB0"), Some(DeviceRole::Imu));
    assert_eq!(state.device_role("/dev/ttyUSB1"), Some(DeviceRole::Gps));
    assert_eq!(state.device_role("/dev/ttyUSB2"), Some(DeviceRole::Unreadable));
    assert_eq!(report.unreadable, vec!["/dev/ttyUSB2".to_string()]);

    let promoted: Vec<_> = report
        .promoted
        .iter()
        .map(|c| (c.port.as_str(), c.baud, c.fingerprint.role))
        .collect();
    assert!(promoted.contains(&("/dev/ttyUSB1", 115_200, DeviceRole::Gps)));
    assert!(promoted.contains(&("/dev/ttyUSB0", 9_600, DeviceRole::Imu)));

    // the broken port is retried within its first pass and then left alone
    assert_eq!(fake.opens("/dev/ttyUSB2"), 3);
    // the GPS was settled after the first pass
    assert_eq!(fake.opens("/dev/ttyUSB1"), 1);
}

#[tokio::test]
async fn test_no_marker_is_never_promoted() {
    let fake = Arc::new(
        FakePorts::default()
            .with_port("COM4")
            .at("COM4", 115_200, Device::Talks("<Voltage:24.6:Current:1.1>"))
            .at("COM4", 9_600, Device::Talks("<Voltage:24.6>")),
    );
    let state = shared_state();
    let config = SerialConfig {
        min_roles: 1,
        max_rounds: 2,
        ..serial_config()
    };
    let classifier = PortClassifier::new(config, fake.clone(), state.clone());

    let report = classifier.discover().await;

    assert_eq!(report.rounds, 2);
    assert!(report.promoted.is_empty());
    assert!(state.registry().is_empty());
    // probed again every pass of every round
    assert_eq!(fake.opens("COM4"), 4);
}

#[tokio::test]
async fn test_stops_once_enough_roles_are_known() {
    let fake = Arc::new(
        FakePorts::default()
            .with_port("/dev/ttyS0")
            .with_port("/dev/ttyS1")
            .at("/dev/ttyS0", 115_200, Device::Talks("<Roll:1:Pitch:2>"))
            .at("/dev/ttyS1", 115_200, Device::Talks("<[SDDBT:Depth_below_Transducer_M:3.1>")),
    );
    let state = shared_state();
    let config = SerialConfig {
        max_rounds: 0,
        ..serial_config()
    };
    let classifier = PortClassifier::new(config, fake.clone(), state.clone());

    let report = timeout(Duration::from_secs(2), classifier.discover())
        .await
        .expect("discovery should stop at min_roles");

    assert_eq!(report.rounds, 1);
    assert_eq!(state.registry().classified_roles().len(), 2);
    // second pass skipped both settled ports
    assert_eq!(fake.total_opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_port_filter_limits_probing() {
    let fake = Arc::new(
        FakePorts::default()
            .with_port("/dev/ttyUSB0")
            .with_port("/dev/ttyS0")
            .at("/dev/ttyUSB0", 115_200, Device::Talks("<Roll:1>"))
            .at("/dev/ttyS0", 115_200, Device::Talks("<GPSAngle:1>")),
    );
    let state = shared_state();
    let config = SerialConfig {
        port_filter: Some("USB".to_string()),
        ..serial_config()
    };
    let classifier = PortClassifier::new(config, fake.clone(), state.clone());

    classifier.discover().await;

    assert_eq!(fake.opens("/dev/ttyS0"), 0);
    assert_eq!(state.device_role("/dev/ttyUSB0"), Some(DeviceRole::Imu));
    assert_eq!(state.device_role("/dev/ttyS0"), None);
}

#[tokio::test]
async fn test_promoted_port_is_ingested() {
    let fake = Arc::new(
        FakePorts::default()
            .with_port("/dev/ttyUSB0")
            .at(
                "/dev/ttyUSB0",
                115_200,
                Device::Talks("<Roll:5.5:Pitch:-2.0:Heading:271.0:Voltage:24.0>"),
            ),
    );
    let state = shared_state();
    let config = SerialConfig {
        min_roles: 1,
        ..serial_config()
    };
    let classifier = PortClassifier::new(config, fake.clone(), state.clone());

    let mut ingests = JoinSet::new();
    let report = classifier.discover_into(&mut ingests).await;
    assert_eq!(report.promoted.len(), 1);
    assert_eq!(ingests.len(), 1);

    timeout(Duration::from_secs(2), async {
        while state.measurement(Measurement::Roll) != 5.5 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("ingest never applied the frame");

    assert_eq!(state.measurement(Measurement::Pitch), -2.0);
    assert_eq!(state.measurement(Measurement::Heading), 271.0);
    assert_eq!(state.measurement(Measurement::Voltage), 24.0);

    ingests.abort_all();
}
