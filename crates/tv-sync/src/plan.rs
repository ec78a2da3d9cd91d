//! What one pass intends to write to one actuator.
//!
//! A plan starts from the calibration result, then boost and safety
//! overrides are applied in that order. Writers only ever see the final plan.

use crate::calibration::CalibrationResult;
use crate::config::ActuatorConfig;
use crate::model::{HvacMode, LogicalState};

#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorPlan {
    pub mode: HvacMode,
    pub offset: Option<f64>,
    pub temperature: Option<f64>,
    pub valve: Option<f64>,
    pub boost: bool,
    /// A safety override turned heating off.
    pub forced_off: bool,
    /// Close the valve again after the writes: boost opened it but the
    /// actuator was forced off in the same pass.
    pub reset_valve_after: bool,
}

impl ActuatorPlan {
    pub fn from_calibration(logical: &LogicalState, calibration: &CalibrationResult) -> Self {
        Self {
            mode: logical.hvac_mode,
            offset: calibration.offset,
            temperature: calibration.setpoint,
            valve: calibration.valve_percent,
            boost: false,
            forced_off: false,
            reset_valve_after: false,
        }
    }

    /// Full power while the boost preset is active and the room needs heat.
    pub fn apply_boost(&mut self, logical: &LogicalState, actuator: &ActuatorConfig, boost_preset: &str) {
        if logical.preset.as_deref() == Some(boost_preset) && logical.heating_needed() {
            self.boost = true;
            self.valve = Some(100.0);
            self.temperature = Some(actuator.max_temp);
        }
    }

    /// Open window or door, missing heat demand or an off thermostat turn the
    /// actuator off. Devices without an off mode get their minimum instead.
    pub fn apply_safety(&mut self, logical: &LogicalState, actuator: &ActuatorConfig) {
        let off = logical.opening_detected() || !logical.heating_allowed();
        if !off {
            return;
        }
        self.forced_off = true;
        if actuator.has_off_mode {
            self.mode = HvacMode::Off;
        } else {
            self.mode = HvacMode::Heat;
            self.temperature = Some(actuator.min_temp);
        }
        if self.boost {
            self.reset_valve_after = true;
        } else if self.valve.is_some() {
            self.valve = Some(0.0);
        }
    }

    /// Heating demand in percent this plan commands. Used to attribute an
    /// observed room slope to heating or to passive loss.
    ///
    /// Without a controller percent or valve position the demand is read
    /// back from the setpoint through the percent-to-setpoint mapping, with
    /// `perceived` the temperature the device regulates against.
    pub fn commanded_percent(
        &self,
        controller_percent: Option<f64>,
        actuator: &ActuatorConfig,
        perceived: Option<f64>,
    ) -> Option<f64> {
        if self.forced_off || self.mode == HvacMode::Off {
            return Some(0.0);
        }
        if self.boost {
            return Some(100.0);
        }
        if let Some(percent) = controller_percent.or(self.valve).filter(|p| p.is_finite()) {
            return Some(percent.clamp(0.0, 100.0));
        }
        let (setpoint, perceived) = (self.temperature?, perceived.filter(|t| t.is_finite())?);
        let closed = perceived - actuator.closing_margin;
        let span = actuator.max_temp - closed;
        if span <= 0.0 {
            return Some(if setpoint > closed { 100.0 } else { 0.0 });
        }
        Some(((setpoint - closed) / span * 100.0).clamp(0.0, 100.0))
    }
}
