//! Self-learning TPI controller.
//!
//! Instead of fixed coefficients this variant learns two room properties
//! from the observed temperature slope:
//!
//! - **gain**: duty (percent) needed per kelvin of error to close that error
//!   within one cycle, learned while actively heating
//! - **loss**: passive cooling rate (K/min), learned while idle
//!
//! `duty = error * gain * outdoor_factor + loss * cycle_min * gain`
//!
//! Non-zero outputs are lifted to an adaptive minimum floor, and small or
//! too-frequent changes are suppressed by hysteresis.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::tpi::{TpiInput, TpiOutput, TpiReason};

/// Number of slope samples kept per record.
pub const SLOPE_HISTORY_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningTpiParams {
    pub cycle_min: f64,
    /// EMA weight of the newest slope sample.
    pub slope_alpha: f64,
    pub min_slope_interval_s: f64,
    /// Duty (percent) above which the previous cycle counts as heating.
    pub active_threshold_pct: f64,
    /// Duty (percent) at or below which the previous cycle counts as idle.
    pub idle_threshold_pct: f64,
    pub gain_init: f64,
    pub gain_min: f64,
    pub gain_max: f64,
    pub loss_init: f64,
    pub loss_min: f64,
    pub loss_max: f64,
    /// Smoothing weight of a new gain/loss observation.
    pub learn_rate: f64,
    /// Largest relative change of gain/loss per observation.
    pub max_rel_change: f64,
    /// Indoor/outdoor difference (K) at which the outdoor factor is 1.
    pub outdoor_ref_deficit: f64,
    pub outdoor_influence: f64,
    pub outdoor_factor_min: f64,
    pub outdoor_factor_max: f64,
    pub floor_init_pct: f64,
    pub floor_min_pct: f64,
    pub floor_max_pct: f64,
    pub floor_step_pct: f64,
    /// Slope magnitude (K/min) below which an active cycle counts as flat.
    pub flat_slope: f64,
    pub flat_cycles_debounce: u32,
    /// Slope (K/min) above which the floor is lowered.
    pub strong_slope: f64,
    pub hysteresis_abs: f64,
    pub hysteresis_rel: f64,
    pub min_update_interval_s: f64,
    pub threshold_high: f64,
}

impl Default for LearningTpiParams {
    fn default() -> Self {
        Self {
            cycle_min: 15.0,
            slope_alpha: 0.3,
            min_slope_interval_s: 120.0,
            active_threshold_pct: 20.0,
            idle_threshold_pct: 1.0,
            gain_init: 50.0,
            gain_min: 5.0,
            gain_max: 400.0,
            loss_init: 0.01,
            loss_min: 0.0,
            loss_max: 0.2,
            learn_rate: 0.2,
            max_rel_change: 0.25,
            outdoor_ref_deficit: 15.0,
            outdoor_influence: 0.3,
            outdoor_factor_min: 0.7,
            outdoor_factor_max: 1.5,
            floor_init_pct: 10.0,
            floor_min_pct: 5.0,
            floor_max_pct: 40.0,
            floor_step_pct: 2.0,
            flat_slope: 0.005,
            flat_cycles_debounce: 3,
            strong_slope: 0.05,
            hysteresis_abs: 2.0,
            hysteresis_rel: 0.05,
            min_update_interval_s: 60.0,
            threshold_high: 0.5,
        }
    }
}

impl LearningTpiParams {
    pub fn validate(&self) -> ControlResult<()> {
        if self.cycle_min <= 0.0 {
            return Err(ControlError::OutOfRange {
                name: "cycle_min",
                value: self.cycle_min,
            });
        }
        if !(self.slope_alpha > 0.0 && self.slope_alpha <= 1.0) {
            return Err(ControlError::OutOfRange {
                name: "slope_alpha",
                value: self.slope_alpha,
            });
        }
        if !(self.learn_rate > 0.0 && self.learn_rate <= 1.0) {
            return Err(ControlError::OutOfRange {
                name: "learn_rate",
                value: self.learn_rate,
            });
        }
        if self.gain_min <= 0.0 || self.gain_min > self.gain_max {
            return Err(ControlError::InvalidArg {
                what: "gain bounds must satisfy 0 < gain_min <= gain_max",
            });
        }
        if self.loss_min < 0.0 || self.loss_min > self.loss_max {
            return Err(ControlError::InvalidArg {
                what: "loss bounds must satisfy 0 <= loss_min <= loss_max",
            });
        }
        if self.floor_min_pct > self.floor_max_pct || self.floor_max_pct > 100.0 {
            return Err(ControlError::InvalidArg {
                what: "floor bounds must satisfy floor_min_pct <= floor_max_pct <= 100",
            });
        }
        if self.outdoor_ref_deficit <= 0.0 || self.outdoor_factor_min > self.outdoor_factor_max
        {
            return Err(ControlError::InvalidArg {
                what: "outdoor factor settings are inconsistent",
            });
        }
        Ok(())
    }
}

/// Learned TPI state for one controller key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TpiRecord {
    /// Last accepted duty (percent).
    pub duty: Option<f64>,
    pub last_update_s: Option<f64>,
    /// Learned percent per kelvin.
    pub gain: Option<f64>,
    /// Learned passive loss, K/min.
    pub loss: Option<f64>,
    /// Smoothed slope, K/min.
    pub slope_ema: Option<f64>,
    pub last_sample_temp: Option<f64>,
    pub last_sample_s: Option<f64>,
    pub min_floor_pct: Option<f64>,
    pub flat_cycles: u32,
    pub slope_history: VecDeque<f64>,
}

impl TpiRecord {
    pub fn gain_or(&self, params: &LearningTpiParams) -> f64 {
        self.gain.unwrap_or(params.gain_init)
    }

    pub fn loss_or(&self, params: &LearningTpiParams) -> f64 {
        self.loss.unwrap_or(params.loss_init)
    }

    pub fn floor_or(&self, params: &LearningTpiParams) -> f64 {
        self.min_floor_pct.unwrap_or(params.floor_init_pct)
    }
}

/// Move `current` toward `observed`, limited to `max_rel` of `current` and
/// to `[lo, hi]`.
fn bounded_update(current: f64, observed: f64, params: &LearningTpiParams, lo: f64, hi: f64) -> f64 {
    let candidate = current + params.learn_rate * (observed - current);
    let limit = current.abs() * params.max_rel_change;
    let limited = if limit > 0.0 {
        candidate.clamp(current - limit, current + limit)
    } else {
        candidate
    };
    limited.clamp(lo, hi)
}

/// Take a slope sample if enough time passed. Returns the new EMA.
fn sample_slope(params: &LearningTpiParams, current: f64, now_s: f64, record: &mut TpiRecord) -> Option<f64> {
    let anchor = match (record.last_sample_temp, record.last_sample_s) {
        // a sample from the future means the clock was reset
        (Some(temp), Some(last_s)) if last_s <= now_s => Some((temp, last_s)),
        _ => None,
    };
    let Some((last_temp, last_s)) = anchor else {
        record.last_sample_temp = Some(current);
        record.last_sample_s = Some(now_s);
        return None;
    };
    let elapsed_s = now_s - last_s;
    if elapsed_s < params.min_slope_interval_s || elapsed_s <= 0.0 {
        return None;
    }

    let instant = (current - last_temp) / (elapsed_s / 60.0);
    let ema = match record.slope_ema {
        Some(prev) => params.slope_alpha * instant + (1.0 - params.slope_alpha) * prev,
        None => instant,
    };
    record.slope_ema = Some(ema);
    record.slope_history.push_back(instant);
    while record.slope_history.len() > SLOPE_HISTORY_LEN {
        record.slope_history.pop_front();
    }
    record.last_sample_temp = Some(current);
    record.last_sample_s = Some(now_s);
    Some(ema)
}

fn learn(params: &LearningTpiParams, slope: f64, record: &mut TpiRecord) {
    let duty = record.duty.unwrap_or(0.0);
    let gain = record.gain_or(params);
    let loss = record.loss_or(params);

    if duty >= params.active_threshold_pct && slope > 0.0 {
        let effective_rate = slope + loss;
        if effective_rate > 1e-6 {
            let observed = duty / (params.cycle_min * effective_rate);
            record.gain = Some(bounded_update(
                gain,
                observed,
                params,
                params.gain_min,
                params.gain_max,
            ));
        }
    } else if duty <= params.idle_threshold_pct && slope < 0.0 {
        record.loss = Some(bounded_update(
            loss,
            -slope,
            params,
            params.loss_min,
            params.loss_max,
        ));
    }

    let floor = record.floor_or(params);
    if duty >= params.active_threshold_pct && slope.abs() < params.flat_slope {
        record.flat_cycles += 1;
        if record.flat_cycles >= params.flat_cycles_debounce {
            record.min_floor_pct = Some((floor + params.floor_step_pct).min(params.floor_max_pct));
            record.flat_cycles = 0;
        }
    } else {
        if slope > params.strong_slope {
            record.min_floor_pct = Some((floor - params.floor_step_pct).max(params.floor_min_pct));
        }
        record.flat_cycles = 0;
    }
}

fn outdoor_factor(params: &LearningTpiParams, target: f64, outdoor: Option<f64>) -> f64 {
    let Some(outdoor) = outdoor.filter(|o| o.is_finite()) else {
        return 1.0;
    };
    let deficit = target - outdoor;
    let factor =
        1.0 + params.outdoor_influence * (deficit - params.outdoor_ref_deficit) / params.outdoor_ref_deficit;
    factor.clamp(params.outdoor_factor_min, params.outdoor_factor_max)
}

/// Evaluate the learning TPI law and update `record`.
pub fn compute(params: &LearningTpiParams, input: &TpiInput, record: &mut TpiRecord) -> TpiOutput {
    if input.is_blocked() {
        return TpiOutput::zero(TpiReason::Blocked);
    }
    let Some((target, current)) = input.temps() else {
        return TpiOutput::zero(TpiReason::NoTemps);
    };

    if let Some(slope) = sample_slope(params, current, input.now_s, record) {
        learn(params, slope, record);
    }

    let error = target - current;
    if error < -params.threshold_high {
        // overshoot bypasses hysteresis
        record.duty = Some(0.0);
        record.last_update_s = Some(input.now_s);
        return TpiOutput::zero(TpiReason::Overshoot);
    }

    let gain = record.gain_or(params);
    let loss = record.loss_or(params);
    let base = error * gain * outdoor_factor(params, target, input.outdoor);
    let compensation = loss * params.cycle_min * gain;
    let mut candidate = (base + compensation).clamp(0.0, 100.0);
    if candidate > 0.0 {
        candidate = candidate.max(record.floor_or(params)).min(100.0);
    }

    if let Some(previous) = record.duty {
        let delta = (candidate - previous).abs();
        let in_band = delta <= params.hysteresis_abs || delta <= params.hysteresis_rel * previous;
        let too_soon = record.last_update_s.is_some_and(|last| {
            let since = input.now_s - last;
            (0.0..params.min_update_interval_s).contains(&since)
        });
        if in_band || too_soon {
            return TpiOutput {
                percent: previous,
                reason: TpiReason::Hysteresis,
            };
        }
    }

    record.duty = Some(candidate);
    record.last_update_s = Some(input.now_s);
    TpiOutput {
        percent: candidate,
        reason: TpiReason::Ok,
    }
}
