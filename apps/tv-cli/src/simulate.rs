//! Demo harness: runs a thermostat against a toy one-zone room so the
//! synchronizer can be watched end to end without hardware. The room is a
//! single first-order lag and makes no attempt to model real heating.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use clap::Args;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::info;
use tv_core::{ActuatorId, Clock, ManualClock, SystemClock};
use tv_store::{JsonFileBackend, MemoryBackend, StateStore};
use tv_sync::{
    ActuatorAdapter, ActuatorReport, DeviceSynchronizer, HvacMode, QuirkRegistry, ThermostatConfig,
    TransportError, load_yaml,
};

use crate::error::CliResult;

#[derive(Args)]
pub struct SimulateArgs {
    /// Path to the thermostat YAML file
    config_path: PathBuf,
    #[arg(long, default_value_t = 21.0)]
    target: f64,
    /// Room temperature at the start
    #[arg(long, default_value_t = 17.0)]
    room: f64,
    #[arg(long, default_value_t = 5.0)]
    outdoor: f64,
    /// Simulated minutes to run
    #[arg(long, default_value_t = 60)]
    minutes: u32,
    /// Wall-clock milliseconds per simulated minute
    #[arg(long, default_value_t = 50)]
    step_ms: u64,
    /// Persist learned controller state to this file
    #[arg(long)]
    state: Option<PathBuf>,
}

/// Devices sit on the radiator and read warmer than the room.
const RADIATOR_BIAS_K: f64 = 1.5;
const HEAT_GAIN_K_PER_MIN: f64 = 0.08;
const LOSS_PER_MIN: f64 = 0.01;

#[derive(Debug, Clone)]
struct SimulatedValve {
    setpoint: f64,
    offset: f64,
    mode: HvacMode,
    valve: Option<f64>,
}

impl SimulatedValve {
    fn reading(&self, room: f64) -> f64 {
        room + RADIATOR_BIAS_K + self.offset
    }

    /// Opening in `[0, 1]`.
    fn demand(&self, room: f64) -> f64 {
        match (self.mode, self.valve) {
            (HvacMode::Off, _) => 0.0,
            (HvacMode::Heat, Some(percent)) => (percent / 100.0).clamp(0.0, 1.0),
            (HvacMode::Heat, None) => ((self.setpoint - self.reading(room)) / 2.0).clamp(0.0, 1.0),
        }
    }
}

struct SimulatedRoom {
    temperature: Mutex<f64>,
    valves: Mutex<BTreeMap<ActuatorId, SimulatedValve>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SimulatedRoom {
    fn new(temperature: f64, ids: impl IntoIterator<Item = ActuatorId>) -> Self {
        let valves = ids
            .into_iter()
            .map(|id| {
                let valve = SimulatedValve {
                    setpoint: 16.0,
                    offset: 0.0,
                    mode: HvacMode::Off,
                    valve: None,
                };
                (id, valve)
            })
            .collect();
        Self {
            temperature: Mutex::new(temperature),
            valves: Mutex::new(valves),
        }
    }

    fn temperature(&self) -> f64 {
        *lock(&self.temperature)
    }

    /// Advance one minute and return the new room temperature.
    fn step(&self, outdoor: f64) -> f64 {
        let mut room = lock(&self.temperature);
        let valves = lock(&self.valves);
        let demand = if valves.is_empty() {
            0.0
        } else {
            valves.values().map(|v| v.demand(*room)).sum::<f64>() / valves.len() as f64
        };
        *room += HEAT_GAIN_K_PER_MIN * demand - LOSS_PER_MIN * (*room - outdoor);
        *room
    }

    fn report(&self, id: &ActuatorId) -> Option<ActuatorReport> {
        let room = self.temperature();
        let valves = lock(&self.valves);
        let valve = valves.get(id)?;
        Some(ActuatorReport {
            temperature: Some(valve.reading(room)),
            setpoint: Some(valve.setpoint),
            offset: Some(valve.offset),
            mode: Some(valve.mode),
            valve: valve.valve,
            available: Some(true),
        })
    }

    fn apply(&self, id: &ActuatorId, f: impl FnOnce(&mut SimulatedValve)) -> Result<(), TransportError> {
        let mut valves = lock(&self.valves);
        let valve = valves
            .get_mut(id)
            .ok_or_else(|| TransportError::Unavailable { actuator: id.clone() })?;
        f(valve);
        Ok(())
    }
}

impl ActuatorAdapter for SimulatedRoom {
    fn set_temperature<'a>(&'a self, id: &'a ActuatorId, value: f64) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            info!(actuator = %id, value, "set temperature");
            self.apply(id, |v| v.setpoint = value)
        }
        .boxed()
    }

    fn set_offset<'a>(&'a self, id: &'a ActuatorId, value: f64) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            info!(actuator = %id, value, "set offset");
            self.apply(id, |v| v.offset = value)
        }
        .boxed()
    }

    fn set_hvac_mode<'a>(&'a self, id: &'a ActuatorId, mode: HvacMode) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            info!(actuator = %id, mode = %mode, "set mode");
            self.apply(id, |v| v.mode = mode)
        }
        .boxed()
    }

    fn set_valve<'a>(&'a self, id: &'a ActuatorId, percent: f64) -> BoxFuture<'a, bool> {
        async move {
            info!(actuator = %id, percent, "set valve");
            self.apply(id, |v| v.valve = Some(percent)).is_ok()
        }
        .boxed()
    }

    fn current_offset<'a>(&'a self, id: &'a ActuatorId) -> BoxFuture<'a, Option<f64>> {
        async move { lock(&self.valves).get(id).map(|v| v.offset) }.boxed()
    }
}

pub fn run(args: &SimulateArgs) -> CliResult<()> {
    let config = load_yaml(&args.config_path)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(simulate(config, args))
}

async fn simulate(config: ThermostatConfig, args: &SimulateArgs) -> CliResult<()> {
    let ids: Vec<ActuatorId> = config.actuators.iter().map(|a| a.id.clone()).collect();
    let room = Arc::new(SimulatedRoom::new(args.room, ids.iter().cloned()));
    let store = match &args.state {
        Some(path) => StateStore::open(JsonFileBackend::new(path)),
        None => StateStore::open(MemoryBackend::new()),
    };
    // start on the wall clock so state saved by an earlier run stays in order
    let clock = Arc::new(ManualClock::new(SystemClock.now_s()));

    let mut sync = DeviceSynchronizer::new(config, room.clone(), QuirkRegistry::new(), store, clock.clone())?;
    sync.on_outdoor_temperature(Some(args.outdoor));
    sync.on_external_temperature(args.room);
    sync.set_target(args.target)?;
    sync.start()?;

    let mut ticker = tokio::time::interval(Duration::from_millis(args.step_ms.max(1)));
    for minute in 1..=args.minutes {
        ticker.tick().await;
        let temperature = room.step(args.outdoor);
        clock.advance(60.0);
        sync.on_external_temperature(temperature);
        for id in &ids {
            if let Some(report) = room.report(id) {
                sync.on_actuator_report(id, report)?;
            }
        }
        if minute % 10 == 0 {
            info!(minute, room = temperature, target = args.target, "simulated room");
        }
    }

    let temperature = room.temperature();
    sync.shutdown().await?;
    println!(
        "after {} min: room {:.2} °C, target {:.1} °C",
        args.minutes, temperature, args.target
    );
    Ok(())
}
