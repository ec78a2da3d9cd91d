#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tv_core::{ActuatorId, ManualClock};
use tv_store::{MemoryBackend, StateStore};
use tv_sync::{
    ActuatorAdapter, ActuatorConfig, ActuatorReport, DeviceSynchronizer, HvacMode, QuirkRegistry,
    SyncHandle, ThermostatConfig, TransportError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub actuator: String,
    pub channel: &'static str,
    pub phase: Phase,
    pub value: f64,
}

/// Adapter that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingAdapter {
    events: Mutex<Vec<Event>>,
    offsets: Mutex<HashMap<String, Option<f64>>>,
    failing: Mutex<HashSet<String>>,
    offline: Mutex<HashSet<String>>,
    /// Setpoint reported back while a temperature write is in flight.
    echo: Mutex<Option<(SyncHandle, f64)>>,
    pub valve_capable: bool,
    pub delay: Duration,
}

pub fn mode_value(mode: HvacMode) -> f64 {
    match mode {
        HvacMode::Off => 0.0,
        HvacMode::Heat => 1.0,
    }
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(10),
            valve_capable: true,
            ..Default::default()
        }
    }

    pub fn set_current_offset(&self, id: &str, offset: Option<f64>) {
        self.offsets.lock().unwrap().insert(id.to_string(), offset);
    }

    pub fn set_failing(&self, id: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
    }

    pub fn set_offline(&self, id: &str) {
        self.offline.lock().unwrap().insert(id.to_string());
    }

    pub fn echo_during_temperature_write(&self, handle: SyncHandle, setpoint: f64) {
        *self.echo.lock().unwrap() = Some((handle, setpoint));
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Completed writes as `(actuator, channel, value)`.
    pub fn writes(&self) -> Vec<(String, &'static str, f64)> {
        self.events()
            .into_iter()
            .filter(|e| e.phase == Phase::End)
            .map(|e| (e.actuator, e.channel, e.value))
            .collect()
    }

    pub fn writes_for(&self, id: &str, channel: &str) -> Vec<f64> {
        self.writes()
            .into_iter()
            .filter(|(a, c, _)| a == id && *c == channel)
            .map(|(_, _, v)| v)
            .collect()
    }

    pub fn attempts(&self, id: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.actuator == id && e.phase == Phase::Start)
            .count()
    }

    fn push(&self, id: &ActuatorId, channel: &'static str, phase: Phase, value: f64) {
        self.events.lock().unwrap().push(Event {
            actuator: id.to_string(),
            channel,
            phase,
            value,
        });
    }

    async fn write(&self, id: &ActuatorId, channel: &'static str, value: f64) -> Result<(), TransportError> {
        self.push(id, channel, Phase::Start, value);
        tokio::time::sleep(self.delay).await;
        if self.offline.lock().unwrap().contains(id.as_str()) {
            return Err(TransportError::Unavailable { actuator: id.clone() });
        }
        if self.failing.lock().unwrap().contains(id.as_str()) {
            return Err(TransportError::Write {
                actuator: id.clone(),
                message: "no route".to_string(),
            });
        }
        self.push(id, channel, Phase::End, value);
        Ok(())
    }
}

impl ActuatorAdapter for RecordingAdapter {
    fn set_temperature<'a>(&'a self, id: &'a ActuatorId, value: f64) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            let echo = self.echo.lock().unwrap().clone();
            if let Some((handle, setpoint)) = echo {
                handle
                    .on_actuator_report(
                        id,
                        ActuatorReport {
                            setpoint: Some(setpoint),
                            ..Default::default()
                        },
                    )
                    .unwrap();
            }
            self.write(id, "temperature", value).await
        }
        .boxed()
    }

    fn set_offset<'a>(&'a self, id: &'a ActuatorId, value: f64) -> BoxFuture<'a, Result<(), TransportError>> {
        async move { self.write(id, "calibration", value).await }.boxed()
    }

    fn set_hvac_mode<'a>(&'a self, id: &'a ActuatorId, mode: HvacMode) -> BoxFuture<'a, Result<(), TransportError>> {
        async move { self.write(id, "mode", mode_value(mode)).await }.boxed()
    }

    fn set_valve<'a>(&'a self, id: &'a ActuatorId, percent: f64) -> BoxFuture<'a, bool> {
        async move { self.valve_capable && self.write(id, "valve", percent).await.is_ok() }.boxed()
    }

    fn current_offset<'a>(&'a self, id: &'a ActuatorId) -> BoxFuture<'a, Option<f64>> {
        async move {
            self.offsets
                .lock()
                .unwrap()
                .get(id.as_str())
                .copied()
                .unwrap_or(Some(0.0))
        }
        .boxed()
    }
}

pub fn config(actuators: &[&str]) -> ThermostatConfig {
    let mut config = ThermostatConfig {
        id: "tv1".to_string(),
        actuators: actuators.iter().map(|id| ActuatorConfig::new(*id)).collect(),
        ..Default::default()
    };
    config.ack.poll_interval_ms = 100;
    config.ack.max_polls = 10;
    config.sync.retry_delay_ms = 1_000;
    config
}

pub struct Rig {
    pub sync: DeviceSynchronizer,
    pub adapter: Arc<RecordingAdapter>,
    pub backend: MemoryBackend,
    pub clock: Arc<ManualClock>,
}

pub fn rig(config: ThermostatConfig, adapter: RecordingAdapter) -> Rig {
    rig_with(config, adapter, MemoryBackend::new(), 0.0)
}

/// Rig over existing persisted state, with the clock starting at `start_s`.
pub fn rig_with(config: ThermostatConfig, adapter: RecordingAdapter, backend: MemoryBackend, start_s: f64) -> Rig {
    let adapter = Arc::new(adapter);
    let clock = Arc::new(ManualClock::new(start_s));
    let sync = DeviceSynchronizer::new(
        config,
        adapter.clone(),
        QuirkRegistry::new(),
        StateStore::open(backend.clone()),
        clock.clone(),
    )
    .unwrap();
    Rig {
        sync,
        adapter,
        backend,
        clock,
    }
}

pub fn id(raw: &str) -> ActuatorId {
    ActuatorId::new(raw)
}

/// Let spawned watchers run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
