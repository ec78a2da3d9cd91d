mod common;

use common::{RecordingAdapter, Rig, config, id, rig};
use tv_sync::{ActuatorReport, CalibrationMode, HvacMode, SyncReason};

fn heating_power_rig() -> Rig {
    let mut config = config(&["a"]);
    config.actuators[0].calibration_mode = CalibrationMode::HeatingPower;
    rig(config, RecordingAdapter::new())
}

/// One simulated minute: new room reading, then a pass.
async fn minute(rig: &Rig, external: f64) {
    rig.clock.advance(60.0);
    rig.sync.on_external_temperature(external);
    rig.sync.run_pass(SyncReason::SensorUpdate).await;
}

#[tokio::test(start_paused = true)]
async fn heating_power_mode_learns_from_its_own_commands() {
    let rig = heating_power_rig();
    rig.sync.set_target(26.0).unwrap();
    rig.sync.on_external_temperature(18.0);
    rig.sync
        .on_actuator_report(
            &id("a"),
            ActuatorReport {
                temperature: Some(18.0),
                ..Default::default()
            },
        )
        .unwrap();

    let pass = rig.sync.run_pass(SyncReason::Manual).await;
    assert_eq!(pass.actuator(&id("a")).unwrap().plan.as_ref().unwrap().temperature, Some(26.0));
    // no power learned yet, the demand is read back from the written setpoint
    let demand = rig.sync.runtime(&id("a")).unwrap().last_percent.unwrap();
    assert!((demand - 900.0 / 13.0).abs() < 1e-6, "demand {demand}");

    for m in 1..=20 {
        minute(&rig, 18.0 + 0.05 * m as f64).await;
    }
    let stats = rig.sync.with_store(|store| store.thermal());
    assert!(stats.heating_power.is_some_and(|p| p > 0.0));
    assert_eq!(stats.heat_loss_rate, None);

    // switched off, the room cools and the loss rate is learned
    rig.sync.set_hvac_mode(HvacMode::Off);
    rig.sync.run_pass(SyncReason::ModeChanged).await;
    assert_eq!(rig.sync.runtime(&id("a")).unwrap().last_percent, Some(0.0));
    for m in 1..=20 {
        minute(&rig, 19.0 - 0.03 * m as f64).await;
    }
    let stats = rig.sync.with_store(|store| store.thermal());
    assert!(stats.heat_loss_rate.is_some_and(|l| l > 0.0));
    assert!(rig.sync.with_store(|store| store.is_dirty()));
}

#[tokio::test(start_paused = true)]
async fn learned_power_drives_the_demand() {
    let rig = heating_power_rig();
    rig.sync.with_store(|store| {
        let mut stats = store.thermal();
        stats.heating_power = Some(0.1);
        store.set_thermal(stats);
    });
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
    // 1 K over 30 min of 0.1 K/min available
    let demand = rig.sync.runtime(&id("a")).unwrap().last_percent.unwrap();
    assert!((demand - 100.0 / 3.0).abs() < 1e-6);
}
