mod common;

use std::time::Duration;

use common::{RecordingAdapter, Rig, config, id, rig, settle};
use tv_sync::{ActuatorReport, HvacMode, SafetySensor, SyncReason, ThermostatConfig};

fn valve_config() -> ThermostatConfig {
    let mut config = config(&["a"]);
    config.actuators[0].supports_valve = true;
    config
}

fn cold_room(rig: &Rig) {
    rig.sync.set_target(22.0).unwrap();
    rig.sync.on_external_temperature(19.0);
    rig.sync
        .on_actuator_report(
            &id("a"),
            ActuatorReport {
                temperature: Some(19.0),
                ..Default::default()
            },
        )
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn boost_opens_the_valve_and_maxes_the_setpoint() {
    let rig = rig(valve_config(), RecordingAdapter::new());
    cold_room(&rig);
    rig.sync.set_preset(Some("boost")).unwrap();
    assert_eq!(rig.sync.logical().target, Some(22.0));

    let pass = rig.sync.run_pass(SyncReason::PresetChanged).await;
    let summary = pass.actuator(&id("a")).unwrap();
    assert!(summary.plan.as_ref().unwrap().boost);
    assert_eq!(summary.valve_writes, vec![100.0]);
    assert_eq!(rig.adapter.writes_for("a", "temperature"), vec![30.0]);
}

#[tokio::test(start_paused = true)]
async fn boost_with_open_window_closes_the_valve_again() {
    let rig = rig(valve_config(), RecordingAdapter::new());
    cold_room(&rig);
    rig.sync.set_preset(Some("boost")).unwrap();
    rig.sync.set_safety_sensor(SafetySensor::Window, true);

    let pass = rig.sync.run_pass(SyncReason::SafetySensor).await;
    let summary = pass.actuator(&id("a")).unwrap();
    let plan = summary.plan.as_ref().unwrap();
    assert!(plan.forced_off && plan.reset_valve_after);
    assert_eq!(summary.valve_writes, vec![100.0, 0.0]);
    assert_eq!(rig.adapter.writes_for("a", "valve").last(), Some(&0.0));
    assert_eq!(rig.adapter.writes_for("a", "mode"), vec![common::mode_value(HvacMode::Off)]);
}

#[tokio::test(start_paused = true)]
async fn open_window_turns_the_actuator_off() {
    let rig = rig(config(&["a"]), RecordingAdapter::new());
    cold_room(&rig);
    rig.sync.set_safety_sensor(SafetySensor::Door, true);

    rig.sync.run_pass(SyncReason::SafetySensor).await;
    assert_eq!(rig.adapter.writes_for("a", "mode"), vec![0.0]);
}

#[tokio::test(start_paused = true)]
async fn actuator_without_off_mode_gets_its_minimum() {
    let mut config = config(&["a"]);
    config.actuators[0].has_off_mode = false;
    let rig = rig(config, RecordingAdapter::new());
    cold_room(&rig);
    rig.sync.set_call_for_heat(false);

    rig.sync.run_pass(SyncReason::SafetySensor).await;
    assert_eq!(rig.adapter.writes_for("a", "mode"), vec![1.0]);
    assert_eq!(rig.adapter.writes_for("a", "temperature"), vec![5.0]);
}

#[tokio::test(start_paused = true)]
async fn presets_come_from_the_store_before_the_config() {
    let mut config = config(&["a"]);
    config.presets.insert("eco".to_string(), 17.0);
    config.presets.insert("comfort".to_string(), 21.0);
    let rig = rig(config, RecordingAdapter::new());
    rig.sync.save_preset("eco", 18.5);

    rig.sync.set_preset(Some("eco")).unwrap();
    assert_eq!(rig.sync.logical().target, Some(18.5));
    rig.sync.set_preset(Some("comfort")).unwrap();
    assert_eq!(rig.sync.logical().target, Some(21.0));
    assert!(rig.sync.set_preset(Some("party")).is_err());
    assert_eq!(rig.sync.logical().preset.as_deref(), Some("comfort"));

    rig.sync.set_preset(None).unwrap();
    assert_eq!(rig.sync.logical().preset, None);
    assert_eq!(rig.sync.logical().target, Some(21.0));
}

/// Write 21 and let the device confirm everything.
async fn synced_at_21(rig: &Rig) {
    rig.sync.set_target(21.0).unwrap();
    rig.sync.on_external_temperature(20.0);
    rig.sync
        .on_actuator_report(
            &id("a"),
            ActuatorReport {
                temperature: Some(20.0),
                ..Default::default()
            },
        )
        .unwrap();
    rig.sync.run_pass(SyncReason::Manual).await;
    rig.sync
        .on_actuator_report(
            &id("a"),
            ActuatorReport {
                setpoint: Some(21.0),
                offset: Some(0.0),
                mode: Some(HvacMode::Heat),
                ..Default::default()
            },
        )
        .unwrap();
    settle().await;
    assert!(rig.sync.runtime(&id("a")).unwrap().ack.temperature);
}

#[tokio::test(start_paused = true)]
async fn setpoint_changed_on_the_device_moves_the_target() {
    let rig = rig(config(&["a"]), RecordingAdapter::new());
    synced_at_21(&rig).await;

    rig.sync
        .on_actuator_report(
            &id("a"),
            ActuatorReport {
                setpoint: Some(23.0),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(rig.sync.logical().target, Some(23.0));
}

#[tokio::test(start_paused = true)]
async fn stale_setpoint_after_an_unacknowledged_write_is_not_adopted() {
    let rig = rig(config(&["a"]), RecordingAdapter::new());
    synced_at_21(&rig).await;

    rig.sync.set_target(23.0).unwrap();
    rig.sync.run_pass(SyncReason::TargetChanged).await;
    assert_eq!(rig.adapter.writes_for("a", "temperature"), vec![21.0, 23.0]);

    // the device never reports 23 and the watcher gives up
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let runtime = rig.sync.runtime(&id("a")).unwrap();
    assert!(runtime.ack.temperature);
    assert!(!runtime.temperature_confirmed);

    let setpoint = |value: f64| ActuatorReport {
        setpoint: Some(value),
        ..Default::default()
    };
    rig.sync.on_actuator_report(&id("a"), setpoint(21.0)).unwrap();
    assert_eq!(rig.sync.logical().target, Some(23.0));

    // a late report of the written value confirms it again
    rig.sync.on_actuator_report(&id("a"), setpoint(23.0)).unwrap();
    assert!(rig.sync.runtime(&id("a")).unwrap().temperature_confirmed);
    rig.sync.on_actuator_report(&id("a"), setpoint(24.0)).unwrap();
    assert_eq!(rig.sync.logical().target, Some(24.0));
}

#[tokio::test(start_paused = true)]
async fn reports_during_our_own_write_are_not_adopted() {
    let rig = rig(config(&["a"]), RecordingAdapter::new());
    synced_at_21(&rig).await;

    rig.adapter.echo_during_temperature_write(rig.sync.handle(), 19.0);
    rig.sync.set_target(22.0).unwrap();
    rig.sync.run_pass(SyncReason::TargetChanged).await;

    assert_eq!(rig.adapter.writes_for("a", "temperature"), vec![21.0, 22.0]);
    assert_eq!(rig.sync.logical().target, Some(22.0));
    assert!(!rig.sync.runtime(&id("a")).unwrap().suppress_echo);
}

#[tokio::test(start_paused = true)]
async fn window_state_applies_after_it_holds() {
    let mut rig = rig(config(&["a"]), RecordingAdapter::new());
    let window = rig.sync.debounced(SafetySensor::Window);
    assert_eq!(window.sensor(), SafetySensor::Window);

    window.report(true);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!rig.sync.logical().window_open);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(rig.sync.logical().window_open);

    window.report(false);
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert!(!rig.sync.logical().window_open);

    rig.sync.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn flapping_door_never_reaches_the_thermostat() {
    let mut rig = rig(config(&["a"]), RecordingAdapter::new());
    let door = rig.sync.debounced(SafetySensor::Door);

    for _ in 0..4 {
        door.report(true);
        tokio::time::sleep(Duration::from_secs(20)).await;
        door.report(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    assert!(!rig.sync.logical().door_open);

    rig.sync.shutdown().await.unwrap();
}
