//! Per-actuator calibration.
//!
//! Aligns each actuator's reading with the external sensor, either through
//! a device offset or by shifting the setpoint, and maps controller demand
//! to a setpoint (and valve position) for the percent-based modes.

use tracing::debug;
use tv_controls::{LearningTpiParams, PidInputs, PidRecord, TpiInput, TpiRecord};
use tv_controls::{learning_tpi, pid, tpi};
use tv_core::{ControllerKey, round_to_step, string_enum};
use tv_store::StateStore;

use crate::config::{ActuatorConfig, ThermostatConfig};
use crate::model::{CalibrationMode, CalibrationType, LogicalState, TpiVariant};

string_enum! {
    pub enum CalibrationReason {
        Ok => "ok",
        NoTarget => "no_target",
        NoTemps => "no_temps",
        /// Heating-power mode before any power was learned.
        NoHeatingPower => "no_heating_power",
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationInput<'a> {
    pub logical: &'a LogicalState,
    pub actuator: &'a ActuatorConfig,
    /// The actuator's own temperature reading.
    pub actuator_temp: Option<f64>,
    /// Offset the device applies right now. Ignored for setpoint calibration.
    pub current_offset: f64,
    pub now_s: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    pub offset: Option<f64>,
    pub setpoint: Option<f64>,
    pub valve_percent: Option<f64>,
    pub controller_percent: Option<f64>,
    pub reason: CalibrationReason,
}

impl CalibrationResult {
    fn empty(reason: CalibrationReason) -> Self {
        Self {
            offset: None,
            setpoint: None,
            valve_percent: None,
            controller_percent: None,
            reason,
        }
    }
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

fn clamp_setpoint(actuator: &ActuatorConfig, value: f64) -> f64 {
    round_to_step(value, actuator.temp_step).clamp(actuator.min_temp, actuator.max_temp)
}

/// Computes calibration for one actuator against the thermostat's store.
pub struct CalibrationOrchestrator<'a> {
    config: &'a ThermostatConfig,
    store: &'a mut StateStore,
}

impl<'a> CalibrationOrchestrator<'a> {
    pub fn new(config: &'a ThermostatConfig, store: &'a mut StateStore) -> Self {
        Self { config, store }
    }

    pub fn calibrate(&mut self, input: &CalibrationInput<'_>) -> CalibrationResult {
        let actuator = input.actuator;
        let Some(target) = finite(input.logical.target) else {
            return CalibrationResult::empty(CalibrationReason::NoTarget);
        };
        let (Some(external), Some(actuator_temp)) =
            (finite(input.logical.external), finite(input.actuator_temp))
        else {
            return CalibrationResult {
                setpoint: Some(clamp_setpoint(actuator, target)),
                ..CalibrationResult::empty(CalibrationReason::NoTemps)
            };
        };

        let shift = self.mode_shift(actuator.calibration_mode, target - external);
        let mut result = CalibrationResult::empty(CalibrationReason::Ok);
        match actuator.calibration_type {
            CalibrationType::Offset => {
                // a lower offset makes the device read colder and open further
                let raw = input.current_offset + (external - actuator_temp) - shift;
                let offset = round_to_step(raw, actuator.offset_step)
                    .clamp(actuator.offset_min, actuator.offset_max);
                result.offset = Some(offset);
                result.setpoint = Some(clamp_setpoint(actuator, target));
            }
            CalibrationType::Setpoint => {
                let raw = target + (actuator_temp - external) + shift;
                result.setpoint = Some(clamp_setpoint(actuator, raw));
            }
        }

        if actuator.calibration_mode.is_percent() {
            match self.controller_percent(input, target, external) {
                Some(percent) => {
                    let perceived = match actuator.calibration_type {
                        CalibrationType::Offset => external,
                        CalibrationType::Setpoint => actuator_temp,
                    };
                    let closed = perceived - actuator.closing_margin;
                    let setpoint = closed + (actuator.max_temp - closed) * percent / 100.0;
                    result.setpoint = Some(clamp_setpoint(actuator, setpoint));
                    result.controller_percent = Some(percent);
                    if actuator.supports_valve {
                        result.valve_percent = Some(percent.round());
                    }
                }
                None => result.reason = CalibrationReason::NoHeatingPower,
            }
        }

        debug!(
            actuator = %actuator.id,
            mode = %actuator.calibration_mode,
            offset = ?result.offset,
            setpoint = ?result.setpoint,
            percent = ?result.controller_percent,
            "calibration computed"
        );
        result
    }

    fn mode_shift(&self, mode: CalibrationMode, error: f64) -> f64 {
        if mode != CalibrationMode::Aggressive {
            return 0.0;
        }
        let c = &self.config.calibration;
        if error > c.aggressive_band {
            c.aggressive_delta
        } else if error < -c.aggressive_band {
            -c.aggressive_delta
        } else {
            0.0
        }
    }

    fn controller_percent(
        &mut self,
        input: &CalibrationInput<'_>,
        target: f64,
        external: f64,
    ) -> Option<f64> {
        let config = self.config;
        let logical = input.logical;
        let key = ControllerKey::new(&config.id, &input.actuator.id, target);

        match input.actuator.calibration_mode {
            CalibrationMode::Pid => {
                let inputs = PidInputs {
                    target: Some(target),
                    external: Some(external),
                    actuator: input.actuator_temp,
                    external_slope: logical.external_slope,
                    now_s: input.now_s,
                };
                let out = self.store.update::<PidRecord, _>(key.as_str(), |record| {
                    pid::compute(&config.pid, &inputs, record)
                });
                debug!(key = %key, reason = %out.debug.reason, p = out.debug.p, i = out.debug.i, d = out.debug.d, "pid evaluated");
                Some(out.percent)
            }
            CalibrationMode::Tpi => {
                let tpi_input = TpiInput {
                    target: Some(target),
                    current: Some(external),
                    outdoor: logical.outdoor,
                    heating_allowed: logical.heating_allowed(),
                    window_open: logical.opening_detected(),
                    now_s: input.now_s,
                };
                let out = match config.tpi_variant {
                    TpiVariant::Static => tpi::compute(&config.tpi, &tpi_input),
                    TpiVariant::Learning => {
                        let params: &LearningTpiParams = &config.learning_tpi;
                        self.store.update::<TpiRecord, _>(key.as_str(), |record| {
                            learning_tpi::compute(params, &tpi_input, record)
                        })
                    }
                };
                debug!(key = %key, reason = %out.reason, percent = out.percent, "tpi evaluated");
                Some(out.percent)
            }
            CalibrationMode::HeatingPower => self
                .store
                .thermal()
                .percent_for(&config.thermal, target - external),
            CalibrationMode::Default | CalibrationMode::Aggressive => None,
        }
    }

    /// Fold a slope observation into the learned thermal statistics.
    /// `demand_pct` is the average demand while the slope was measured.
    pub fn observe_thermal(&mut self, demand_pct: f64, slope: f64) -> bool {
        let mut stats = self.store.thermal();
        let changed = stats.observe(&self.config.thermal, demand_pct / 100.0, slope);
        if changed {
            self.store.set_thermal(stats);
        }
        changed
    }
}
