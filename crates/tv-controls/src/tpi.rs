//! Static time-proportional-integral (TPI) controller.
//!
//! `duty = (coef_int * error + coef_ext * (target - outdoor)) * 100`
//!
//! The duty is the share of a fixed cycle during which heat is requested.

use serde::{Deserialize, Serialize};
use tv_core::string_enum;

use crate::error::{ControlError, ControlResult};

string_enum! {
    /// Why a TPI call produced its output.
    pub enum TpiReason {
        Ok => "ok",
        Blocked => "blocked",
        NoTemps => "no_temps",
        Overshoot => "overshoot",
        Hysteresis => "hysteresis",
    }
}

/// Static TPI coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpiParams {
    /// Weight of the indoor error (per K).
    pub coef_int: f64,
    /// Weight of the indoor/outdoor difference (per K).
    pub coef_ext: f64,
    /// Overshoot (K) above target at which heating is cut regardless.
    pub threshold_high: f64,
}

impl Default for TpiParams {
    fn default() -> Self {
        Self {
            coef_int: 0.6,
            coef_ext: 0.01,
            threshold_high: 0.5,
        }
    }
}

impl TpiParams {
    pub fn validate(&self) -> ControlResult<()> {
        if !self.coef_int.is_finite() || self.coef_int < 0.0 {
            return Err(ControlError::OutOfRange {
                name: "coef_int",
                value: self.coef_int,
            });
        }
        if !self.coef_ext.is_finite() || self.coef_ext < 0.0 {
            return Err(ControlError::OutOfRange {
                name: "coef_ext",
                value: self.coef_ext,
            });
        }
        if self.threshold_high < 0.0 {
            return Err(ControlError::OutOfRange {
                name: "threshold_high",
                value: self.threshold_high,
            });
        }
        Ok(())
    }
}

/// Readings and gates for one TPI evaluation. Shared by both variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TpiInput {
    pub target: Option<f64>,
    /// Indoor temperature from the external sensor.
    pub current: Option<f64>,
    pub outdoor: Option<f64>,
    pub heating_allowed: bool,
    pub window_open: bool,
    pub now_s: f64,
}

impl TpiInput {
    /// Gates checked before any temperature is looked at.
    pub fn is_blocked(&self) -> bool {
        !self.heating_allowed || self.window_open
    }

    pub(crate) fn temps(&self) -> Option<(f64, f64)> {
        match (self.target, self.current) {
            (Some(t), Some(c)) if t.is_finite() && c.is_finite() => Some((t, c)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TpiOutput {
    /// Duty in `[0, 100]`.
    pub percent: f64,
    pub reason: TpiReason,
}

impl TpiOutput {
    pub(crate) fn zero(reason: TpiReason) -> Self {
        Self {
            percent: 0.0,
            reason,
        }
    }
}

/// Evaluate the static TPI law.
pub fn compute(params: &TpiParams, input: &TpiInput) -> TpiOutput {
    if input.is_blocked() {
        return TpiOutput::zero(TpiReason::Blocked);
    }
    let Some((target, current)) = input.temps() else {
        return TpiOutput::zero(TpiReason::NoTemps);
    };

    let error = target - current;
    if error < -params.threshold_high {
        return TpiOutput::zero(TpiReason::Overshoot);
    }

    let exterior = input
        .outdoor
        .filter(|o| o.is_finite())
        .map(|outdoor| params.coef_ext * (target - outdoor))
        .unwrap_or(0.0);
    let raw = (params.coef_int * error + exterior) * 100.0;

    TpiOutput {
        percent: raw.clamp(0.0, 100.0),
        reason: TpiReason::Ok,
    }
}
