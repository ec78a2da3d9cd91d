//! PID controller producing a valve demand in percent.
//!
//! Features:
//! - Conditional anti-windup: an integral step that would push an already
//!   saturated output further into saturation is discarded
//! - Derivative on a smoothed blend of external and actuator-local
//!   temperature, with derivative-on-error as a fallback mode
//! - Integrator relief when the error changes sign close to the setpoint
//! - Optional auto-tuning, rate limited to one adjustment per interval
//!
//! The time base is minutes: integral and derivative terms use `dt` in
//! minutes, slopes are in K/min.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tv_core::{sign, string_enum};

use crate::error::{ControlError, ControlResult};

/// Number of recent errors kept per record.
pub const ERROR_HISTORY_LEN: usize = 12;

/// Consecutive in-band errors required before the steady-state rule fires.
const STEADY_SAMPLES: usize = 3;

string_enum! {
    /// Signal the derivative term differentiates.
    pub enum DerivativeMode {
        Measurement => "measurement",
        Error => "error",
    }
}

impl Default for DerivativeMode {
    fn default() -> Self {
        Self::Measurement
    }
}

string_enum! {
    /// Gain adjustment applied by the auto-tuner.
    pub enum TuneAction {
        Overshoot => "overshoot",
        Sluggish => "sluggish",
        Steady => "steady",
    }
}

string_enum! {
    /// Why a PID call produced its output.
    pub enum PidReason {
        Ok => "ok",
        NoTemps => "no_temps",
    }
}

impl Default for PidReason {
    fn default() -> Self {
        Self::Ok
    }
}

/// Auto-tune configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoTuneParams {
    /// Minimum seconds between two gain adjustments.
    pub interval_s: f64,
    /// Overshoot magnitude (K) above the setpoint that counts as overshoot.
    pub overshoot_threshold: f64,
    /// Slope magnitude (K/min) below which the room is considered stuck.
    pub stuck_slope: f64,
    /// Output (percent) below which an in-band loop is considered steady.
    pub low_output_pct: f64,
    pub step_up: f64,
    pub step_down: f64,
    pub kp_min: f64,
    pub kp_max: f64,
    pub ki_min: f64,
    pub ki_max: f64,
    pub kd_min: f64,
    pub kd_max: f64,
}

impl Default for AutoTuneParams {
    fn default() -> Self {
        Self {
            interval_s: 300.0,
            overshoot_threshold: 0.3,
            stuck_slope: 0.005,
            low_output_pct: 10.0,
            step_up: 1.1,
            step_down: 0.9,
            kp_min: 1.0,
            kp_max: 200.0,
            ki_min: 0.001,
            ki_max: 2.0,
            kd_min: 0.0,
            kd_max: 500.0,
        }
    }
}

/// PID configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidParams {
    /// Proportional gain (percent per K).
    pub kp: f64,
    /// Integral gain (percent per K·min).
    pub ki: f64,
    /// Derivative gain (percent per K/min).
    pub kd: f64,
    /// Lower bound of the integral term (percent).
    pub i_min: f64,
    /// Upper bound of the integral term (percent).
    pub i_max: f64,
    pub derivative_mode: DerivativeMode,
    /// Weight of the external sensor in the derivative blend, `[0, 1]`.
    pub d_mix: f64,
    /// EMA weight of the newest blended sample, `(0, 1]`.
    pub d_smoothing: f64,
    /// Error band (K) treated as "at setpoint".
    pub steady_band: f64,
    /// Fraction of the integral removed on an in-band sign flip.
    pub relief_fraction: f64,
    /// `dt` (min) assumed for the first call on a fresh record.
    pub nominal_dt_min: f64,
    pub min_dt_min: f64,
    pub max_dt_min: f64,
    pub autotune: Option<AutoTuneParams>,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            kp: 20.0,
            ki: 0.05,
            kd: 10.0,
            i_min: -20.0,
            i_max: 100.0,
            derivative_mode: DerivativeMode::Measurement,
            d_mix: 0.7,
            d_smoothing: 0.5,
            steady_band: 0.1,
            relief_fraction: 0.5,
            nominal_dt_min: 1.0,
            min_dt_min: 1.0 / 60.0,
            max_dt_min: 10.0,
            autotune: None,
        }
    }
}

impl PidParams {
    /// Check gains and bounds.
    pub fn validate(&self) -> ControlResult<()> {
        for (name, value) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ControlError::OutOfRange { name, value });
            }
        }
        if self.i_min > self.i_max {
            return Err(ControlError::InvalidArg {
                what: "i_min must not exceed i_max",
            });
        }
        if !(0.0..=1.0).contains(&self.d_mix) {
            return Err(ControlError::OutOfRange {
                name: "d_mix",
                value: self.d_mix,
            });
        }
        if !(self.d_smoothing > 0.0 && self.d_smoothing <= 1.0) {
            return Err(ControlError::OutOfRange {
                name: "d_smoothing",
                value: self.d_smoothing,
            });
        }
        if !(0.0..=1.0).contains(&self.relief_fraction) {
            return Err(ControlError::OutOfRange {
                name: "relief_fraction",
                value: self.relief_fraction,
            });
        }
        if self.min_dt_min <= 0.0 || self.min_dt_min > self.max_dt_min {
            return Err(ControlError::InvalidArg {
                what: "dt bounds must satisfy 0 < min_dt_min <= max_dt_min",
            });
        }
        if let Some(tune) = &self.autotune
            && (tune.step_up < 1.0 || tune.step_down > 1.0 || tune.step_down <= 0.0)
        {
            return Err(ControlError::InvalidArg {
                what: "autotune requires step_up >= 1 and 0 < step_down <= 1",
            });
        }
        Ok(())
    }
}

/// Learned and accumulated PID state for one controller key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PidRecord {
    /// Integral term in percent.
    pub integral: f64,
    pub last_error: Option<f64>,
    /// Last raw blended measurement.
    pub last_measurement: Option<f64>,
    pub smoothed_measurement: Option<f64>,
    pub last_update_s: Option<f64>,
    /// Gains learned by the auto-tuner; `None` falls back to the params.
    pub kp: Option<f64>,
    pub ki: Option<f64>,
    pub kd: Option<f64>,
    /// Largest |error| since the last sign change.
    pub peak_abs_error: f64,
    /// Set when the error changed sign since the last overshoot adjustment.
    pub crossed: bool,
    pub last_tune_s: Option<f64>,
    pub last_tune: Option<TuneAction>,
    pub recent_errors: VecDeque<f64>,
}

/// Readings for one PID evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidInputs {
    pub target: Option<f64>,
    pub external: Option<f64>,
    pub actuator: Option<f64>,
    /// External temperature slope in K/min.
    pub external_slope: Option<f64>,
    pub now_s: f64,
}

/// Term breakdown of one evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PidDebug {
    pub reason: PidReason,
    pub error: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub dt_min: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub tuned: Option<TuneAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PidOutput {
    /// Valve demand in `[0, 100]`.
    pub percent: f64,
    pub debug: PidDebug,
}

impl PidOutput {
    fn neutral(reason: PidReason) -> Self {
        Self {
            percent: 0.0,
            debug: PidDebug {
                reason,
                ..PidDebug::default()
            },
        }
    }
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

fn elapsed_minutes(params: &PidParams, last_update_s: Option<f64>, now_s: f64) -> f64 {
    let raw = match last_update_s {
        Some(last) if now_s >= last => (now_s - last) / 60.0,
        // fresh record, or a timestamp from before a clock reset
        _ => params.nominal_dt_min,
    };
    raw.clamp(params.min_dt_min, params.max_dt_min)
}

fn blend(params: &PidParams, external: f64, actuator: Option<f64>) -> f64 {
    match actuator {
        Some(local) => params.d_mix * external + (1.0 - params.d_mix) * local,
        None => external,
    }
}

/// Evaluate the controller and update `record`.
///
/// Returns 0 % with [`PidReason::NoTemps`] and leaves `record` untouched when
/// the target or the external temperature is missing.
pub fn compute(params: &PidParams, inputs: &PidInputs, record: &mut PidRecord) -> PidOutput {
    let (Some(target), Some(external)) = (finite(inputs.target), finite(inputs.external)) else {
        return PidOutput::neutral(PidReason::NoTemps);
    };

    let kp = record.kp.unwrap_or(params.kp);
    let ki = record.ki.unwrap_or(params.ki);
    let kd = record.kd.unwrap_or(params.kd);

    let error = target - external;
    let dt_min = elapsed_minutes(params, record.last_update_s, inputs.now_s);
    let previous_error = record.last_error;

    if let Some(last) = previous_error
        && flipped(last, error)
        && error.abs() <= params.steady_band
    {
        record.integral *= 1.0 - params.relief_fraction;
    }

    let measured = blend(params, external, finite(inputs.actuator));
    let previous_smoothed = record.smoothed_measurement;
    let smoothed = match previous_smoothed {
        Some(prev) => params.d_smoothing * measured + (1.0 - params.d_smoothing) * prev,
        None => measured,
    };
    let d_term = match params.derivative_mode {
        DerivativeMode::Measurement => previous_smoothed
            .map(|prev| -kd * (smoothed - prev) / dt_min)
            .unwrap_or(0.0),
        DerivativeMode::Error => previous_error
            .map(|last| kd * (error - last) / dt_min)
            .unwrap_or(0.0),
    };

    let p_term = kp * error;

    // Anti-windup: judge saturation on the output before this step
    let step = ki * error * dt_min;
    let candidate = p_term + record.integral + d_term;
    let deeper_high = candidate >= 100.0 && step > 0.0;
    let deeper_low = candidate <= 0.0 && step < 0.0;
    if !(deeper_high || deeper_low) {
        record.integral = (record.integral + step).clamp(params.i_min, params.i_max);
    }

    let raw = p_term + record.integral + d_term;
    let percent = if raw.is_finite() {
        raw.clamp(0.0, 100.0)
    } else {
        0.0
    };

    record.last_error = Some(error);
    record.last_measurement = Some(measured);
    record.smoothed_measurement = Some(smoothed);
    record.last_update_s = Some(inputs.now_s);
    record.recent_errors.push_back(error);
    while record.recent_errors.len() > ERROR_HISTORY_LEN {
        record.recent_errors.pop_front();
    }

    let mut debug = PidDebug {
        reason: PidReason::Ok,
        error,
        p: p_term,
        i: record.integral,
        d: d_term,
        dt_min,
        kp,
        ki,
        kd,
        tuned: None,
    };

    if let Some(tune) = &params.autotune {
        debug.tuned = autotune(
            tune,
            params.steady_band,
            previous_error,
            error,
            finite(inputs.external_slope),
            percent,
            inputs.now_s,
            [kp, ki, kd],
            record,
        );
    }

    PidOutput { percent, debug }
}

fn flipped(previous: f64, current: f64) -> bool {
    let (a, b) = (sign(previous), sign(current));
    a != 0 && b != 0 && a != b
}

#[allow(clippy::too_many_arguments)]
fn autotune(
    tune: &AutoTuneParams,
    steady_band: f64,
    previous_error: Option<f64>,
    error: f64,
    slope: Option<f64>,
    percent: f64,
    now_s: f64,
    [kp, ki, kd]: [f64; 3],
    record: &mut PidRecord,
) -> Option<TuneAction> {
    match previous_error {
        Some(last) if flipped(last, error) => {
            record.crossed = true;
            record.peak_abs_error = error.abs();
        }
        _ => record.peak_abs_error = record.peak_abs_error.max(error.abs()),
    }

    let due = record
        .last_tune_s
        .is_none_or(|last| now_s < last || now_s - last >= tune.interval_s);
    if !due {
        return None;
    }

    let steady = record.recent_errors.len() >= STEADY_SAMPLES
        && record
            .recent_errors
            .iter()
            .rev()
            .take(STEADY_SAMPLES)
            .all(|e| e.abs() <= steady_band);

    let action = if record.crossed && error < 0.0 && record.peak_abs_error > tune.overshoot_threshold
    {
        record.kp = Some((kp * tune.step_down).clamp(tune.kp_min, tune.kp_max));
        record.kd = Some((kd * tune.step_up).clamp(tune.kd_min, tune.kd_max));
        record.crossed = false;
        TuneAction::Overshoot
    } else if error > steady_band && slope.is_some_and(|s| s.abs() < tune.stuck_slope) {
        record.ki = Some((ki * tune.step_up).clamp(tune.ki_min, tune.ki_max));
        TuneAction::Sluggish
    } else if steady && percent < tune.low_output_pct {
        record.ki = Some((ki * tune.step_down).clamp(tune.ki_min, tune.ki_max));
        TuneAction::Steady
    } else {
        return None;
    };

    record.last_tune_s = Some(now_s);
    record.last_tune = Some(action);
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_params() -> PidParams {
        PidParams {
            kp: 10.0,
            ki: 0.1,
            kd: 5.0,
            ..PidParams::default()
        }
    }

    fn scenario_inputs(now_s: f64) -> PidInputs {
        PidInputs {
            target: Some(22.0),
            external: Some(20.0),
            actuator: Some(21.0),
            external_slope: Some(0.0),
            now_s,
        }
    }

    #[test]
    fn integral_accumulates_across_identical_calls() {
        let params = scenario_params();
        let mut record = PidRecord::default();

        let first = compute(&params, &scenario_inputs(0.0), &mut record);
        assert!(first.percent > 0.0);

        let second = compute(&params, &scenario_inputs(0.0), &mut record);
        assert!(second.percent > first.percent);
    }

    #[test]
    fn missing_temps_leave_record_untouched() {
        let params = scenario_params();
        let mut record = PidRecord {
            integral: 3.0,
            last_error: Some(0.5),
            ..PidRecord::default()
        };
        let before = record.clone();

        let inputs = PidInputs {
            external: None,
            ..scenario_inputs(10.0)
        };
        let out = compute(&params, &inputs, &mut record);
        assert_eq!(out.percent, 0.0);
        assert_eq!(out.debug.reason, PidReason::NoTemps);
        assert_eq!(out.debug.reason.as_str(), "no_temps");
        assert_eq!(record, before);

        let inputs = PidInputs {
            target: None,
            ..scenario_inputs(10.0)
        };
        assert_eq!(compute(&params, &inputs, &mut record).percent, 0.0);
        assert_eq!(record, before);
    }

    #[test]
    fn saturated_output_does_not_wind_up() {
        let params = PidParams {
            kp: 30.0,
            ki: 1.0,
            kd: 0.0,
            ..PidParams::default()
        };
        let mut record = PidRecord::default();
        let inputs = |t: f64| PidInputs {
            target: Some(25.0),
            external: Some(15.0),
            actuator: None,
            external_slope: None,
            now_s: t,
        };
        for step in 0..50 {
            let out = compute(&params, &inputs(step as f64 * 60.0), &mut record);
            assert_eq!(out.percent, 100.0);
        }
        // P alone saturates, so no integral step was ever accepted
        assert_eq!(record.integral, 0.0);
    }

    #[test]
    fn integral_is_clamped_to_i_max() {
        let params = PidParams {
            kp: 0.1,
            ki: 5.0,
            kd: 0.0,
            i_max: 40.0,
            ..PidParams::default()
        };
        let mut record = PidRecord::default();
        for step in 0..100 {
            let inputs = PidInputs {
                target: Some(22.0),
                external: Some(18.0),
                actuator: None,
                external_slope: None,
                now_s: step as f64 * 600.0,
            };
            let out = compute(&params, &inputs, &mut record);
            assert!(out.percent <= 100.0);
            assert!(record.integral <= params.i_max);
        }
        assert_eq!(record.integral, 40.0);
    }

    #[test]
    fn derivative_opposes_rising_measurement() {
        let params = PidParams {
            kp: 0.0,
            ki: 0.0,
            kd: 50.0,
            d_smoothing: 1.0,
            ..PidParams::default()
        };
        let mut record = PidRecord::default();
        let at = |t: f64, temp: f64| PidInputs {
            target: Some(22.0),
            external: Some(temp),
            actuator: Some(temp),
            external_slope: None,
            now_s: t,
        };
        compute(&params, &at(0.0, 20.0), &mut record);
        let out = compute(&params, &at(60.0, 20.5), &mut record);
        assert!(out.debug.d < 0.0);
        assert_eq!(out.percent, 0.0);
    }

    #[test]
    fn derivative_on_error_mode() {
        let params = PidParams {
            kp: 0.0,
            ki: 0.0,
            kd: 10.0,
            derivative_mode: DerivativeMode::Error,
            ..PidParams::default()
        };
        let mut record = PidRecord::default();
        let at = |t: f64, temp: f64| PidInputs {
            target: Some(22.0),
            external: Some(temp),
            actuator: None,
            external_slope: None,
            now_s: t,
        };
        compute(&params, &at(0.0, 21.0), &mut record);
        // error grows from 1.0 to 1.5 over one minute
        let out = compute(&params, &at(60.0, 20.5), &mut record);
        assert!((out.debug.d - 5.0).abs() < 1e-9);
    }

    #[test]
    fn sign_flip_in_band_relieves_integral() {
        let params = PidParams {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            ..PidParams::default()
        };
        let mut record = PidRecord {
            integral: 10.0,
            last_error: Some(0.05),
            last_update_s: Some(0.0),
            ..PidRecord::default()
        };
        let inputs = PidInputs {
            target: Some(21.0),
            external: Some(21.05),
            actuator: None,
            external_slope: None,
            now_s: 60.0,
        };
        compute(&params, &inputs, &mut record);
        assert!((record.integral - 5.0).abs() < 1e-9);
    }

    #[test]
    fn autotune_reduces_kp_after_overshoot() {
        let params = PidParams {
            kp: 20.0,
            ki: 0.0,
            kd: 10.0,
            autotune: Some(AutoTuneParams::default()),
            ..PidParams::default()
        };
        let mut record = PidRecord {
            kp: Some(20.0),
            kd: Some(10.0),
            last_error: Some(0.5),
            last_update_s: Some(0.0),
            ..PidRecord::default()
        };
        let inputs = PidInputs {
            target: Some(21.0),
            external: Some(21.6),
            actuator: None,
            external_slope: Some(0.05),
            now_s: 60.0,
        };
        let out = compute(&params, &inputs, &mut record);
        assert_eq!(out.debug.tuned, Some(TuneAction::Overshoot));
        assert!((record.kp.unwrap() - 18.0).abs() < 1e-9);
        assert!((record.kd.unwrap() - 11.0).abs() < 1e-9);

        // rate limited: a second overshoot right after is ignored
        record.crossed = true;
        let out = compute(
            &params,
            &PidInputs {
                now_s: 120.0,
                ..inputs
            },
            &mut record,
        );
        assert_eq!(out.debug.tuned, None);
    }

    #[test]
    fn autotune_raises_ki_when_stuck() {
        let params = PidParams {
            autotune: Some(AutoTuneParams::default()),
            ..PidParams::default()
        };
        let mut record = PidRecord {
            ki: Some(0.05),
            ..PidRecord::default()
        };
        let inputs = PidInputs {
            target: Some(21.0),
            external: Some(20.0),
            actuator: None,
            external_slope: Some(0.0),
            now_s: 0.0,
        };
        let out = compute(&params, &inputs, &mut record);
        assert_eq!(out.debug.tuned, Some(TuneAction::Sluggish));
        assert!((record.ki.unwrap() - 0.055).abs() < 1e-9);
    }

    #[test]
    fn autotune_lowers_ki_when_steady_at_low_output() {
        let params = PidParams {
            autotune: Some(AutoTuneParams::default()),
            ..PidParams::default()
        };
        let mut record = PidRecord {
            ki: Some(0.05),
            last_error: Some(-0.05),
            last_update_s: Some(0.0),
            recent_errors: VecDeque::from([-0.05, -0.05]),
            ..PidRecord::default()
        };
        let inputs = PidInputs {
            target: Some(21.0),
            external: Some(21.05),
            actuator: None,
            external_slope: Some(0.0),
            now_s: 60.0,
        };
        let out = compute(&params, &inputs, &mut record);
        assert_eq!(out.percent, 0.0);
        assert_eq!(out.debug.tuned, Some(TuneAction::Steady));
        assert_eq!(record.last_tune, Some(TuneAction::Steady));
        assert!((record.ki.unwrap() - 0.045).abs() < 1e-12);

        // two in-band samples are not enough
        let mut short = PidRecord {
            ki: Some(0.05),
            last_error: Some(-0.05),
            recent_errors: VecDeque::from([-0.05]),
            ..PidRecord::default()
        };
        assert_eq!(compute(&params, &inputs, &mut short).debug.tuned, None);
    }

    #[test]
    fn timestamps_ahead_of_the_clock_are_treated_as_fresh() {
        let params = PidParams {
            autotune: Some(AutoTuneParams::default()),
            ..PidParams::default()
        };
        let mut record = PidRecord {
            ki: Some(0.05),
            last_update_s: Some(7200.0),
            last_tune_s: Some(7200.0),
            ..PidRecord::default()
        };
        let inputs = PidInputs {
            target: Some(21.0),
            external: Some(20.0),
            actuator: None,
            external_slope: Some(0.0),
            now_s: 60.0,
        };
        let out = compute(&params, &inputs, &mut record);
        assert_eq!(out.debug.dt_min, params.nominal_dt_min);
        assert_eq!(out.debug.tuned, Some(TuneAction::Sluggish));
        assert_eq!(record.last_update_s, Some(60.0));
        assert_eq!(record.last_tune_s, Some(60.0));

        // the tune interval now counts from the new base
        let later = PidInputs { now_s: 120.0, ..inputs };
        assert_eq!(compute(&params, &later, &mut record).debug.tuned, None);
    }

    #[test]
    fn validate_rejects_bad_params() {
        assert!(PidParams::default().validate().is_ok());
        let bad = PidParams {
            i_min: 10.0,
            i_max: 0.0,
            ..PidParams::default()
        };
        assert!(bad.validate().is_err());
        let bad = PidParams {
            kp: f64::NAN,
            ..PidParams::default()
        };
        assert!(bad.validate().is_err());
        let bad = PidParams {
            d_mix: 1.5,
            ..PidParams::default()
        };
        assert!(bad.validate().is_err());
    }
}
