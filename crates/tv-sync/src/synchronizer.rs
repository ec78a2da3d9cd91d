//! Device synchronization loop.
//!
//! Every queued request runs one pass over all actuators of the thermostat.
//! Actuators are processed concurrently but their calibration and writes run
//! under one thermostat-wide lock. Per actuator the pass computes a
//! calibration, turns it into an [`ActuatorPlan`], applies boost and safety
//! overrides and writes the channels in order: mode, calibration,
//! temperature, then valve.
//!
//! Short synchronous state (logical state, runtimes, store) sits behind std
//! mutexes that are never held across an `.await`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tv_controls::TemperatureFilter;
use tv_core::{ActuatorId, Clock, string_enum, within};
use tv_store::StateStore;

use crate::ack::{AckOutcome, Desired, wait_for_ack};
use crate::adapter::ActuatorAdapter;
use crate::calibration::{CalibrationInput, CalibrationOrchestrator};
use crate::config::{ActuatorConfig, ThermostatConfig};
use crate::debounce::{DebouncedSensor, SafetySensor, spawn_debounce};
use crate::error::{SyncError, SyncResult, TransportError};
use crate::model::{ActuatorReport, ActuatorRuntime, CalibrationType, Channel, HvacMode, LogicalState};
use crate::persistence::spawn_flush_task;
use crate::plan::ActuatorPlan;
use crate::quirks::{DeviceQuirks, QuirkRegistry};

string_enum! {
    /// Why a pass was requested. Only used for logging.
    pub enum SyncReason {
        Startup => "startup",
        SensorUpdate => "sensor_update",
        ActuatorReport => "actuator_report",
        TargetChanged => "target_changed",
        ModeChanged => "mode_changed",
        PresetChanged => "preset_changed",
        SafetySensor => "safety_sensor",
        Retry => "retry",
        MaintenanceEnded => "maintenance_ended",
        Manual => "manual",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Desired value equals the last one sent.
    Unchanged,
    /// The ack was outstanding but the device already reports the value.
    SelfHealed,
    /// The ack is outstanding; nothing written this pass.
    AwaitingAck,
    Written,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorOutcome {
    Synced,
    /// The device is offline. Counts as success so it is not retried forever.
    Unavailable,
    Failed(TransportError),
    /// Calibration could not be read back; skipped without retry.
    FatalReadback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorSummary {
    pub id: ActuatorId,
    pub outcome: ActuatorOutcome,
    pub plan: Option<ActuatorPlan>,
    pub writes: Vec<(Channel, WriteOutcome)>,
    /// Valve positions the device accepted, in order.
    pub valve_writes: Vec<f64>,
}

impl ActuatorSummary {
    fn new(id: ActuatorId) -> Self {
        Self {
            id,
            outcome: ActuatorOutcome::Synced,
            plan: None,
            writes: Vec::new(),
            valve_writes: Vec::new(),
        }
    }

    pub fn write(&self, channel: Channel) -> Option<WriteOutcome> {
        self.writes
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, outcome)| *outcome)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PassReport {
    pub reason: Option<SyncReason>,
    /// Maintenance was active; the pass was deferred.
    pub suspended: bool,
    pub actuators: Vec<ActuatorSummary>,
}

impl PassReport {
    /// No actuator hit a retryable transport failure.
    pub fn is_complete(&self) -> bool {
        !self
            .actuators
            .iter()
            .any(|a| matches!(a.outcome, ActuatorOutcome::Failed(_)))
    }

    pub fn actuator(&self, id: &ActuatorId) -> Option<&ActuatorSummary> {
        self.actuators.iter().find(|a| &a.id == id)
    }
}

#[derive(Debug, Default)]
struct Maintenance {
    active: bool,
    resync_pending: bool,
}

struct Shared {
    config: ThermostatConfig,
    adapter: Arc<dyn ActuatorAdapter>,
    quirks: QuirkRegistry,
    clock: Arc<dyn Clock>,
    logical: Mutex<LogicalState>,
    filter: Mutex<TemperatureFilter>,
    runtimes: Mutex<BTreeMap<ActuatorId, ActuatorRuntime>>,
    store: Mutex<StateStore>,
    write_lock: tokio::sync::Mutex<()>,
    /// Signalled on every inbound actuator report.
    reports: Notify,
    queue: mpsc::Sender<SyncReason>,
    maintenance: Mutex<Maintenance>,
    writing: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Cloneable access to one thermostat's synchronization state.
#[derive(Clone)]
pub struct SyncHandle {
    shared: Arc<Shared>,
}

impl SyncHandle {
    pub fn config(&self) -> &ThermostatConfig {
        &self.shared.config
    }

    pub fn logical(&self) -> LogicalState {
        lock(&self.shared.logical).clone()
    }

    pub fn runtime(&self, id: &ActuatorId) -> Option<ActuatorRuntime> {
        lock(&self.shared.runtimes).get(id).cloned()
    }

    pub fn with_store<T>(&self, f: impl FnOnce(&mut StateStore) -> T) -> T {
        f(&mut lock(&self.shared.store))
    }

    pub fn is_writing(&self) -> bool {
        self.shared.writing.load(Ordering::SeqCst)
    }

    fn with_runtime<T>(&self, id: &ActuatorId, f: impl FnOnce(&mut ActuatorRuntime) -> T) -> Option<T> {
        lock(&self.shared.runtimes).get_mut(id).map(f)
    }

    fn update_logical(&self, f: impl FnOnce(&mut LogicalState)) {
        f(&mut lock(&self.shared.logical));
    }

    /// Queue a pass. Dropped when the queue is full: a later event will
    /// trigger synchronization again.
    pub fn request_sync(&self, reason: SyncReason) -> bool {
        match self.shared.queue.try_send(reason) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(reason = %reason, "sync queue full, dropping request");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(reason = %reason, "sync queue closed");
                false
            }
        }
    }

    fn schedule_retry(&self) {
        let handle = self.clone();
        let delay = Duration::from_millis(self.shared.config.sync.retry_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.request_sync(SyncReason::Retry);
        });
    }

    // ----- inbound events -----

    pub fn on_actuator_report(&self, id: &ActuatorId, report: ActuatorReport) -> SyncResult<()> {
        let adopted = {
            let mut runtimes = lock(&self.shared.runtimes);
            let runtime = runtimes
                .get_mut(id)
                .ok_or_else(|| SyncError::UnknownActuator(id.clone()))?;
            runtime.apply_report(&report);
            // a late report can still confirm a write whose watcher gave up
            if let Some(sent) = runtime.last_sent_temperature
                && Desired::Temperature(sent).is_reported(runtime, &self.shared.config.ack)
            {
                runtime.temperature_confirmed = true;
            }
            self.manual_setpoint_change(runtime, report.setpoint)
        };

        if let Some(delta) = adopted {
            let config = self.shared.config.actuator(id);
            self.update_logical(|logical| {
                if let Some(target) = logical.target {
                    let mut new_target = target + delta;
                    if let Some(cfg) = config {
                        new_target = new_target.clamp(cfg.min_temp, cfg.max_temp);
                    }
                    info!(actuator = %id, from = target, to = new_target, "adopting setpoint changed on the device");
                    logical.target = Some(new_target);
                }
            });
        }

        self.shared.reports.notify_waiters();
        self.request_sync(SyncReason::ActuatorReport);
        Ok(())
    }

    /// Shift of a setpoint changed by hand on the device, if `setpoint` is one.
    fn manual_setpoint_change(&self, runtime: &ActuatorRuntime, setpoint: Option<f64>) -> Option<f64> {
        let reported = setpoint.filter(|v| v.is_finite())?;
        // a write that timed out may never have reached the device
        if runtime.suppress_echo || !runtime.ack.temperature || !runtime.temperature_confirmed {
            return None;
        }
        let sent = runtime.last_sent_temperature?;
        if within(reported, sent, self.shared.config.ack.temperature_tolerance) {
            return None;
        }
        Some(reported - sent)
    }

    pub fn on_external_temperature(&self, raw: f64) {
        if !raw.is_finite() {
            warn!(value = raw, "ignoring non-finite external temperature");
            return;
        }
        let now_s = self.shared.clock.now_s();
        let (value, slope, slope_updated) = {
            let mut filter = lock(&self.shared.filter);
            let before = filter.slope();
            filter.update(raw, now_s);
            (filter.value(), filter.slope(), filter.slope() != before)
        };
        self.update_logical(|logical| {
            logical.external = value;
            logical.external_slope = slope;
        });

        if slope_updated && let Some(slope) = slope {
            self.observe_thermal(slope);
        }
        self.request_sync(SyncReason::SensorUpdate);
    }

    /// Attribute a new room slope to the demand the actuators were last
    /// commanded.
    fn observe_thermal(&self, slope: f64) {
        let percents: Vec<f64> = lock(&self.shared.runtimes)
            .values()
            .filter_map(|rt| rt.last_percent)
            .collect();
        if percents.is_empty() {
            return;
        }
        let demand = percents.iter().sum::<f64>() / percents.len() as f64;
        let mut store = lock(&self.shared.store);
        if CalibrationOrchestrator::new(&self.shared.config, &mut store).observe_thermal(demand, slope) {
            debug!(demand, slope, "thermal statistics updated");
        }
    }

    pub fn on_outdoor_temperature(&self, value: Option<f64>) {
        self.update_logical(|logical| logical.outdoor = value.filter(|v| v.is_finite()));
        self.request_sync(SyncReason::SensorUpdate);
    }

    pub fn set_target(&self, target: f64) -> SyncResult<()> {
        if !target.is_finite() {
            return Err(SyncError::Config(format!("target {target} is not a number")));
        }
        self.update_logical(|logical| logical.target = Some(target));
        self.request_sync(SyncReason::TargetChanged);
        Ok(())
    }

    pub fn set_hvac_mode(&self, mode: HvacMode) {
        self.update_logical(|logical| logical.hvac_mode = mode);
        self.request_sync(SyncReason::ModeChanged);
    }

    /// Heat-demand gate, e.g. outdoor cutoff.
    pub fn set_call_for_heat(&self, call: bool) {
        let mut changed = false;
        self.update_logical(|logical| {
            changed = logical.call_for_heat != call;
            logical.call_for_heat = call;
        });
        if changed {
            self.request_sync(SyncReason::SafetySensor);
        }
    }

    /// Apply a (debounced) window or door state.
    pub fn set_safety_sensor(&self, sensor: SafetySensor, open: bool) {
        let mut changed = false;
        self.update_logical(|logical| {
            let slot = match sensor {
                SafetySensor::Window => &mut logical.window_open,
                SafetySensor::Door => &mut logical.door_open,
            };
            changed = *slot != open;
            *slot = open;
        });
        if changed {
            info!(sensor = %sensor, open, "safety sensor changed");
            self.request_sync(SyncReason::SafetySensor);
        }
    }

    /// Activate a preset, or clear it with `None`. Named presets other than
    /// the boost preset set the target from the store, falling back to the
    /// configured temperature.
    pub fn set_preset(&self, name: Option<&str>) -> SyncResult<()> {
        let config = &self.shared.config;
        let temperature = match name {
            Some(name) if name != config.boost_preset => {
                let stored = lock(&self.shared.store).preset(name);
                let temperature = stored.or_else(|| config.presets.get(name).copied());
                Some(temperature.ok_or_else(|| SyncError::UnknownPreset(name.to_string()))?)
            }
            _ => None,
        };
        self.update_logical(|logical| {
            logical.preset = name.map(str::to_string);
            if let Some(t) = temperature {
                logical.target = Some(t);
            }
        });
        self.request_sync(SyncReason::PresetChanged);
        Ok(())
    }

    /// Remember a preset temperature in the persisted state.
    pub fn save_preset(&self, name: &str, temperature: f64) {
        lock(&self.shared.store).set_preset(name, temperature);
    }

    // ----- maintenance -----

    pub fn begin_maintenance(&self) {
        lock(&self.shared.maintenance).active = true;
        info!(thermostat = %self.shared.config.id, "maintenance started, synchronization suspended");
    }

    /// Leave maintenance. Returns whether a deferred pass was queued.
    pub fn end_maintenance(&self) -> bool {
        let resync = {
            let mut maintenance = lock(&self.shared.maintenance);
            maintenance.active = false;
            std::mem::take(&mut maintenance.resync_pending)
        };
        info!(thermostat = %self.shared.config.id, resync, "maintenance ended");
        if resync {
            self.request_sync(SyncReason::MaintenanceEnded);
        }
        resync
    }

    pub fn maintenance_active(&self) -> bool {
        lock(&self.shared.maintenance).active
    }

    fn defer_to_maintenance(&self) -> bool {
        let mut maintenance = lock(&self.shared.maintenance);
        if maintenance.active {
            maintenance.resync_pending = true;
        }
        maintenance.active
    }

    // ----- persistence -----

    /// Write the store if it changed.
    pub fn flush(&self) -> SyncResult<bool> {
        Ok(lock(&self.shared.store).save_if_dirty()?)
    }

    pub(crate) fn flush_logged(&self) {
        match self.flush() {
            Ok(true) => debug!("controller state flushed"),
            Ok(false) => {}
            Err(err) => warn!(error = %err, "controller state flush failed"),
        }
    }

    // ----- passes -----

    /// Run one pass over all actuators.
    pub async fn run_pass(&self, reason: SyncReason) -> PassReport {
        if self.defer_to_maintenance() {
            debug!(reason = %reason, "pass deferred until maintenance ends");
            return PassReport {
                reason: Some(reason),
                suspended: true,
                actuators: Vec::new(),
            };
        }

        let _writing = WritingGuard::new(self.clone());
        let ids: Vec<ActuatorId> = lock(&self.shared.runtimes).keys().cloned().collect();
        debug!(reason = %reason, actuators = ids.len(), "synchronization pass");

        let actuators = join_all(ids.iter().map(|id| self.sync_actuator(id))).await;
        let report = PassReport {
            reason: Some(reason),
            suspended: false,
            actuators,
        };
        if !report.is_complete() {
            warn!(reason = %reason, "synchronization pass incomplete");
        }
        report
    }

    async fn sync_actuator(&self, id: &ActuatorId) -> ActuatorSummary {
        let mut summary = ActuatorSummary::new(id.clone());
        let Some(runtime) = self.runtime(id) else {
            return summary;
        };
        let config = runtime.config.clone();

        let current_offset = match config.calibration_type {
            CalibrationType::Setpoint => 0.0,
            CalibrationType::Offset => match self.shared.adapter.current_offset(id).await {
                Some(offset) => offset,
                None if !runtime.available => runtime.reported_offset.unwrap_or(0.0),
                None => {
                    error!(actuator = %id, "calibration offset unreadable, skipping actuator this pass");
                    summary.outcome = ActuatorOutcome::FatalReadback;
                    return summary;
                }
            },
        };

        let _write = self.shared.write_lock.lock().await;
        // the actuator may have reported while we waited for the lock
        let runtime = self.runtime(id).unwrap_or(runtime);
        let logical = self.logical();
        let calibration = {
            let mut store = lock(&self.shared.store);
            CalibrationOrchestrator::new(&self.shared.config, &mut store).calibrate(&CalibrationInput {
                logical: &logical,
                actuator: &config,
                actuator_temp: runtime.current_temperature,
                current_offset,
                now_s: self.shared.clock.now_s(),
            })
        };

        let mut plan = ActuatorPlan::from_calibration(&logical, &calibration);
        plan.apply_boost(&logical, &config, &self.shared.config.boost_preset);
        plan.apply_safety(&logical, &config);

        let perceived = match config.calibration_type {
            CalibrationType::Offset => logical.external,
            CalibrationType::Setpoint => runtime.current_temperature,
        };
        let demand = plan.commanded_percent(calibration.controller_percent, &config, perceived);
        self.with_runtime(id, |rt| rt.last_percent = demand);

        let quirks = self.shared.quirks.resolve(config.model.as_deref());
        let result = {
            let _echo = EchoGuard::new(self.clone(), id.clone());
            self.write_plan(id, &config, quirks.as_ref(), &plan, &mut summary).await
        };
        summary.plan = Some(plan);

        summary.outcome = match result {
            Ok(()) => ActuatorOutcome::Synced,
            Err(err) if self.is_unavailable(id, &err) => {
                debug!(actuator = %id, error = %err, "actuator offline, not retrying");
                ActuatorOutcome::Unavailable
            }
            Err(err) => {
                warn!(actuator = %id, error = %err, "actuator write failed");
                ActuatorOutcome::Failed(err)
            }
        };
        summary
    }

    fn is_unavailable(&self, id: &ActuatorId, err: &TransportError) -> bool {
        matches!(err, TransportError::Unavailable { .. })
            || self.with_runtime(id, |rt| !rt.available).unwrap_or(true)
    }

    async fn write_plan(
        &self,
        id: &ActuatorId,
        config: &ActuatorConfig,
        quirks: &dyn DeviceQuirks,
        plan: &ActuatorPlan,
        summary: &mut ActuatorSummary,
    ) -> Result<(), TransportError> {
        let mut channels = vec![Desired::Mode(plan.mode)];
        if let Some(offset) = plan.offset {
            channels.push(Desired::Calibration(offset));
        }
        if let Some(temperature) = plan.temperature {
            channels.push(Desired::Temperature(temperature));
        }

        let mut offline_error = None;
        for desired in channels {
            match self.write_channel(id, quirks, desired).await {
                Ok(outcome) => summary.writes.push((desired.channel(), outcome)),
                Err(err) if self.is_unavailable(id, &err) => {
                    // keep trying the other channels of an offline device
                    offline_error.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(percent) = plan.valve
            && (config.supports_valve || plan.boost)
            && self.write_valve(id, quirks, percent, plan.boost).await
        {
            summary.valve_writes.push(percent);
        }
        if plan.reset_valve_after && self.write_valve(id, quirks, 0.0, true).await {
            debug!(actuator = %id, "valve closed again after boost, actuator is off");
            summary.valve_writes.push(0.0);
        }

        offline_error.map_or(Ok(()), Err)
    }

    async fn write_channel(
        &self,
        id: &ActuatorId,
        quirks: &dyn DeviceQuirks,
        desired: Desired,
    ) -> Result<WriteOutcome, TransportError> {
        let channel = desired.channel();
        let ack_config = &self.shared.config.ack;
        let Some((acked, reported, unchanged)) = self.with_runtime(id, |rt| {
            (
                rt.ack.get(channel),
                desired.is_reported(rt, ack_config),
                desired.is_last_sent(rt),
            )
        }) else {
            return Ok(WriteOutcome::Unchanged);
        };

        if !acked {
            if reported {
                self.with_runtime(id, |rt| {
                    rt.ack.set(channel, true);
                    desired.record_sent(rt);
                    desired.record_outcome(rt, AckOutcome::Confirmed);
                });
                debug!(actuator = %id, channel = %channel, "device already matches, ack restored");
                return Ok(WriteOutcome::SelfHealed);
            }
            debug!(actuator = %id, channel = %channel, "awaiting acknowledgment, skipping write");
            return Ok(WriteOutcome::AwaitingAck);
        }
        if unchanged {
            return Ok(WriteOutcome::Unchanged);
        }

        let adapter = self.shared.adapter.as_ref();
        let handled = match desired {
            Desired::Mode(mode) => quirks.override_set_hvac_mode(adapter, id, mode).await,
            Desired::Temperature(t) => quirks.override_set_temperature(adapter, id, t).await,
            Desired::Calibration(_) => false,
        };
        if handled {
            debug!(actuator = %id, channel = %channel, quirks = quirks.name(), "write handled by device quirks");
        } else {
            match desired {
                Desired::Mode(mode) => adapter.set_hvac_mode(id, mode).await?,
                Desired::Calibration(offset) => adapter.set_offset(id, offset).await?,
                Desired::Temperature(t) => adapter.set_temperature(id, t).await?,
            }
        }

        self.with_runtime(id, |rt| {
            desired.record_sent(rt);
            rt.ack.set(channel, false);
        });
        debug!(actuator = %id, channel = %channel, value = ?desired, "written");
        self.spawn_ack_watcher(id.clone(), desired);
        Ok(WriteOutcome::Written)
    }

    async fn write_valve(&self, id: &ActuatorId, quirks: &dyn DeviceQuirks, percent: f64, force: bool) -> bool {
        let unchanged = self
            .with_runtime(id, |rt| rt.last_sent_valve == Some(percent))
            .unwrap_or(false);
        if unchanged && !force {
            return false;
        }
        let adapter = self.shared.adapter.as_ref();
        let handled = quirks.override_set_valve(adapter, id, percent).await
            || adapter.set_valve(id, percent).await;
        if handled {
            self.with_runtime(id, |rt| rt.last_sent_valve = Some(percent));
        } else {
            debug!(actuator = %id, percent, "valve position not supported by device");
        }
        handled
    }

    fn spawn_ack_watcher(&self, id: ActuatorId, desired: Desired) {
        let handle = self.clone();
        tokio::spawn(async move {
            let _release = AckRelease {
                handle: handle.clone(),
                id: id.clone(),
                desired,
            };
            let ack_config = &handle.shared.config.ack;
            let outcome = wait_for_ack(&handle.shared.reports, ack_config, || {
                handle
                    .with_runtime(&id, |rt| desired.is_reported(rt, ack_config))
                    .unwrap_or(true)
            })
            .await;
            handle.with_runtime(&id, |rt| {
                if desired.is_last_sent(rt) {
                    desired.record_outcome(rt, outcome);
                }
            });
            match outcome {
                AckOutcome::Confirmed => debug!(actuator = %id, channel = %desired.channel(), "acknowledged"),
                AckOutcome::TimedOut => warn!(actuator = %id, channel = %desired.channel(), "no acknowledgment, releasing channel"),
            }
        });
    }
}

/// Marks a pass in progress. Cleared on every exit path; a pass cut short
/// by maintenance is remembered for a resync.
struct WritingGuard {
    handle: SyncHandle,
}

impl WritingGuard {
    fn new(handle: SyncHandle) -> Self {
        handle.shared.writing.store(true, Ordering::SeqCst);
        Self { handle }
    }
}

impl Drop for WritingGuard {
    fn drop(&mut self) {
        self.handle.shared.writing.store(false, Ordering::SeqCst);
        let mut maintenance = lock(&self.handle.shared.maintenance);
        if maintenance.active {
            maintenance.resync_pending = true;
        }
    }
}

/// Sets `suppress_echo` for one actuator while its writes are in flight.
struct EchoGuard {
    handle: SyncHandle,
    id: ActuatorId,
}

impl EchoGuard {
    fn new(handle: SyncHandle, id: ActuatorId) -> Self {
        handle.with_runtime(&id, |rt| rt.suppress_echo = true);
        Self { handle, id }
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        self.handle.with_runtime(&self.id, |rt| rt.suppress_echo = false);
    }
}

/// Releases an ack flag when its watcher ends, however it ends. A newer
/// write on the same channel owns the flag, so only the watcher of the last
/// sent value releases it.
struct AckRelease {
    handle: SyncHandle,
    id: ActuatorId,
    desired: Desired,
}

impl Drop for AckRelease {
    fn drop(&mut self) {
        let desired = self.desired;
        self.handle.with_runtime(&self.id, |rt| {
            if desired.is_last_sent(rt) {
                rt.ack.set(desired.channel(), true);
            }
        });
    }
}

/// Owner of the synchronization tasks of one thermostat.
pub struct DeviceSynchronizer {
    handle: SyncHandle,
    queue: Option<mpsc::Receiver<SyncReason>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::ops::Deref for DeviceSynchronizer {
    type Target = SyncHandle;

    fn deref(&self) -> &SyncHandle {
        &self.handle
    }
}

impl DeviceSynchronizer {
    pub fn new(
        config: ThermostatConfig,
        adapter: Arc<dyn ActuatorAdapter>,
        quirks: QuirkRegistry,
        store: StateStore,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let (queue_tx, queue_rx) = mpsc::channel(config.sync.queue_capacity);
        let (shutdown, _) = watch::channel(false);

        let runtimes = config
            .actuators
            .iter()
            .map(|a| (a.id.clone(), ActuatorRuntime::new(a.clone())))
            .collect();
        let filter = TemperatureFilter::new(config.filter.alpha, config.filter.min_slope_interval_s);

        let shared = Shared {
            adapter,
            quirks,
            clock,
            logical: Mutex::new(LogicalState::default()),
            filter: Mutex::new(filter),
            runtimes: Mutex::new(runtimes),
            store: Mutex::new(store),
            write_lock: tokio::sync::Mutex::new(()),
            reports: Notify::new(),
            queue: queue_tx,
            maintenance: Mutex::new(Maintenance::default()),
            writing: AtomicBool::new(false),
            config,
        };
        Ok(Self {
            handle: SyncHandle {
                shared: Arc::new(shared),
            },
            queue: Some(queue_rx),
            shutdown,
            tasks: Vec::new(),
        })
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Spawn the queue consumer and the periodic flush task, then queue the
    /// startup pass. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> SyncResult<()> {
        let queue = self.queue.take().ok_or(SyncError::QueueClosed)?;
        let handle = self.handle.clone();
        self.tasks
            .push(tokio::spawn(run_consumer(handle, queue, self.shutdown.subscribe())));

        let every = Duration::from_secs(self.handle.shared.config.sync.flush_interval_s.max(1));
        self.tasks
            .push(spawn_flush_task(self.handle.clone(), every, self.shutdown.subscribe()));

        info!(
            thermostat = %self.handle.shared.config.id,
            actuators = self.handle.shared.config.actuators.len(),
            "synchronizer started"
        );
        self.handle.request_sync(SyncReason::Startup);
        Ok(())
    }

    /// Debounced input for a window or door sensor.
    pub fn debounced(&mut self, sensor: SafetySensor) -> DebouncedSensor {
        let (sensor_input, task) = spawn_debounce(
            self.handle.clone(),
            sensor,
            &self.handle.shared.config.debounce,
            self.shutdown.subscribe(),
        );
        self.tasks.push(task);
        sensor_input
    }

    /// Stop all tasks and write the store one last time.
    pub async fn shutdown(mut self) -> SyncResult<()> {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(error = %err, "synchronizer task ended abnormally");
            }
        }
        self.handle.flush()?;
        info!(thermostat = %self.handle.shared.config.id, "synchronizer stopped");
        Ok(())
    }
}

async fn run_consumer(
    handle: SyncHandle,
    mut queue: mpsc::Receiver<SyncReason>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            next = queue.recv() => {
                let Some(reason) = next else {
                    break;
                };
                let report = handle.run_pass(reason).await;
                if !report.is_complete() {
                    handle.schedule_retry();
                }
            }
        }
    }
    debug!("sync consumer stopped");
}
