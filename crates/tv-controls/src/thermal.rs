//! Learned thermal statistics of a room.
//!
//! `heating_power` is the temperature rise rate (K/min) at full demand and
//! `heat_loss_rate` the passive cooling rate (K/min). Both are exponential
//! moving averages of slope observations and are persisted per thermostat.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalParams {
    /// EMA weight of a new observation.
    pub alpha: f64,
    /// Demand fraction at or above which a slope counts as heating.
    pub heating_fraction_min: f64,
    /// Demand fraction at or below which a slope counts as passive.
    pub idle_fraction_max: f64,
    pub heating_power_max: f64,
    pub heat_loss_max: f64,
    /// Minutes over which the heating-power mode plans to close the error.
    pub horizon_min: f64,
}

impl Default for ThermalParams {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            heating_fraction_min: 0.5,
            idle_fraction_max: 0.01,
            heating_power_max: 1.0,
            heat_loss_max: 0.5,
            horizon_min: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ThermalStats {
    pub heating_power: Option<f64>,
    pub heat_loss_rate: Option<f64>,
}

fn ema(previous: Option<f64>, observed: f64, alpha: f64) -> f64 {
    match previous {
        Some(prev) => alpha * observed + (1.0 - alpha) * prev,
        None => observed,
    }
}

impl ThermalStats {
    /// Fold one slope observation in. `demand` is the heating demand in
    /// `[0, 1]` that was active while `slope` (K/min) was measured.
    ///
    /// Returns `true` when a statistic changed.
    pub fn observe(&mut self, params: &ThermalParams, demand: f64, slope: f64) -> bool {
        if !slope.is_finite() || !demand.is_finite() {
            return false;
        }
        if demand >= params.heating_fraction_min && slope > 0.0 {
            let loss = self.heat_loss_rate.unwrap_or(0.0);
            let observed = ((slope + loss) / demand).min(params.heating_power_max);
            self.heating_power = Some(ema(self.heating_power, observed, params.alpha));
            return true;
        }
        if demand <= params.idle_fraction_max && slope < 0.0 {
            let observed = (-slope).min(params.heat_loss_max);
            self.heat_loss_rate = Some(ema(self.heat_loss_rate, observed, params.alpha));
            return true;
        }
        false
    }

    /// Demand (percent) that closes `error` within the planning horizon while
    /// compensating passive loss. `None` until heating power is known.
    pub fn percent_for(&self, params: &ThermalParams, error: f64) -> Option<f64> {
        let power = self.heating_power.filter(|p| *p > 1e-6)?;
        let loss = self.heat_loss_rate.unwrap_or(0.0);
        if error <= 0.0 {
            return Some(0.0);
        }
        let rate_needed = error / params.horizon_min + loss;
        Some((rate_needed / power * 100.0).clamp(0.0, 100.0))
    }
}
