//! Integration tests for the shared store under concurrent use.

use rov_hub::config::StateConfig;
use rov_hub::state::{
    Channel, ChannelValue, EmergencyCause, Flag, HistoryKind, Measurement, Setting, SharedState,
    StateObserver,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn test_concurrent_writers_never_tear_values() {
    let state = Arc::new(SharedState::default());
    let candidates = [1.25_f64, -3.5e7, f64::MAX, 0.0];

    thread::scope(|scope| {
        for &value in &candidates {
            let state = &state;
            scope.spawn(move || {
                for _ in 0..2_000 {
                    state.set_measurement(Measurement::Depth, value);
                }
            });
        }
        scope.spawn(|| {
            for _ in 0..2_000 {
                let read = state.measurement(Measurement::Depth);
                // the initial value or one of the written ones, nothing in between
                assert!(read == 0.01 || candidates.contains(&read), "torn read {read}");
            }
        });
    });
}

#[test]
fn test_emergency_is_sticky_until_operator_clears() {
    let state = SharedState::default();

    state.set_flag(Flag::Leak, true);
    assert!(state.flag(Flag::EmergencyMode));
    assert_eq!(state.emergency_cause(), Some(EmergencyCause::Leak));

    state.set_flag(Flag::Leak, false);
    assert!(!state.flag(Flag::Leak));
    assert!(state.flag(Flag::EmergencyMode));

    state.set_flag(Flag::EmergencyMode, false);
    assert!(!state.flag(Flag::EmergencyMode));
    assert_eq!(state.emergency_cause(), None);

    state.set_flag(Flag::I2cError, true);
    assert_eq!(state.emergency_cause(), Some(EmergencyCause::I2cError));
    state.clear_emergency();
    assert!(!state.flag(Flag::EmergencyMode));
}

#[test]
fn test_concurrent_raise_and_clear_keep_flag_and_cause_in_step() {
    for _ in 0..200 {
        let state = SharedState::default();
        thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..50 {
                    state.raise_emergency(EmergencyCause::Leak);
                }
            });
            scope.spawn(|| {
                for _ in 0..50 {
                    state.clear_emergency();
                }
            });
        });
        assert_eq!(
            state.flag(Flag::EmergencyMode),
            state.emergency_cause().is_some()
        );
    }
}

#[test]
fn test_undervoltage_window() {
    let state = SharedState::new(&StateConfig {
        undervoltage_threshold: 28.0,
        voltage_floor: 25.0,
        ..StateConfig::default()
    });

    // sensor not powered yet
    state.set_measurement(Measurement::Voltage, 0.0);
    state.set_measurement(Measurement::Voltage, 25.0);
    assert!(!state.flag(Flag::EmergencyMode));

    state.set_measurement(Measurement::Voltage, 29.1);
    assert!(!state.flag(Flag::EmergencyMode));

    state.set_measurement(Measurement::Voltage, 27.4);
    assert_eq!(
        state.emergency_cause(),
        Some(EmergencyCause::Undervoltage(27.4))
    );

    state.set_measurement(Measurement::Voltage, 29.1);
    assert!(state.flag(Flag::EmergencyMode));
}

#[test]
fn test_histories_are_bounded_and_ordered() {
    let state = SharedState::new(&StateConfig {
        rov_depth_history: 3,
        depth_beneath_boat_history: 0,
        ..StateConfig::default()
    });

    for depth in [1.0, 2.0, 3.0, 4.0, 5.0] {
        state.set_measurement(Measurement::RovDepth, depth);
        state.set_measurement(Measurement::DepthBeneathBoat, depth * 10.0);
    }

    let values: Vec<f64> = state
        .history(HistoryKind::RovDepth)
        .iter()
        .map(|s| s.value)
        .collect();
    assert_eq!(values, vec![3.0, 4.0, 5.0]);
    assert!(state
        .history(HistoryKind::RovDepth)
        .windows(2)
        .all(|w| w[0].time <= w[1].time));

    assert!(state.history(HistoryKind::DepthBeneathBoat).is_empty());
    assert_eq!(state.measurement(Measurement::DepthBeneathBoat), 50.0);
}

#[test]
fn test_observers_are_held_weakly() {
    let state = SharedState::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let observer: Arc<dyn StateObserver> = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    state.subscribe(&observer);

    state.set_setting(Setting::KpDepth, "1.5");
    state.set_flag(Flag::ManualMode, true);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    drop(observer);
    state.set_measurement(Measurement::Speed, 3.0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.subscriber_count(), 0);
}

#[test]
fn test_observer_may_read_the_store() {
    let state = Arc::new(SharedState::default());
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let (weak, sink) = (Arc::downgrade(&state), seen.clone());
    let observer: Arc<dyn StateObserver> = Arc::new(move || {
        if let Some(state) = weak.upgrade() {
            sink.lock().push(state.measurement(Measurement::Heading));
        }
    });
    let id = state.subscribe(&observer);

    state.set_measurement(Measurement::Heading, 42.0);
    assert!(state.unsubscribe(id));
    state.set_measurement(Measurement::Heading, 43.0);

    assert_eq!(*seen.lock(), vec![42.0]);
}

#[test]
fn test_name_addressed_access() {
    let state = SharedState::default();

    let channel: Channel = "ip_camera".parse().unwrap();
    state
        .set(channel, ChannelValue::Text("10.0.0.2".into()))
        .unwrap();
    assert_eq!(state.setting(Setting::IpCamera), "10.0.0.2");

    let channel: Channel = "photo_mode".parse().unwrap();
    state.set_from_str(channel, "TRUE").unwrap();
    assert!(state.flag(Flag::PhotoMode));

    assert!(state
        .set("depth".parse().unwrap(), ChannelValue::Flag(true))
        .is_err());
    assert!("no_such_channel".parse::<Channel>().is_err());

    let snapshot = state.snapshot();
    assert_eq!(snapshot.len(), Channel::all().count());
    assert_eq!(snapshot["rov_ping"], ChannelValue::Number(999.99));
    assert_eq!(snapshot["logging"], ChannelValue::Flag(true));
}
