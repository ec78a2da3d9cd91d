//! External temperature filtering.
//!
//! Room sensors report noisy values at irregular intervals. The filter keeps
//! an exponential moving average and a slope (K/min) measured between
//! filtered values at least `min_slope_interval_s` apart.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureFilter {
    /// EMA weight of the newest reading, `(0, 1]`.
    pub alpha: f64,
    pub min_slope_interval_s: f64,
    value: Option<f64>,
    slope: Option<f64>,
    anchor: Option<(f64, f64)>,
}

impl Default for TemperatureFilter {
    fn default() -> Self {
        Self::new(0.5, 120.0)
    }
}

impl TemperatureFilter {
    pub fn new(alpha: f64, min_slope_interval_s: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            min_slope_interval_s: min_slope_interval_s.max(1.0),
            value: None,
            slope: None,
            anchor: None,
        }
    }

    /// Feed a raw reading taken at `now_s`. Non-finite readings are ignored.
    pub fn update(&mut self, raw: f64, now_s: f64) -> Option<f64> {
        if !raw.is_finite() {
            return self.value;
        }
        let filtered = match self.value {
            Some(prev) => self.alpha * raw + (1.0 - self.alpha) * prev,
            None => raw,
        };
        self.value = Some(filtered);

        match self.anchor {
            None => self.anchor = Some((filtered, now_s)),
            Some((anchor_value, anchor_s)) => {
                let elapsed = now_s - anchor_s;
                if elapsed < 0.0 {
                    self.anchor = Some((filtered, now_s));
                } else if elapsed >= self.min_slope_interval_s {
                    self.slope = Some((filtered - anchor_value) / (elapsed / 60.0));
                    self.anchor = Some((filtered, now_s));
                }
            }
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Slope in K/min, once two anchors are far enough apart.
    pub fn slope(&self) -> Option<f64> {
        self.slope
    }

    pub fn reset(&mut self) {
        self.value = None;
        self.slope = None;
        self.anchor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reading_passes_through() {
        let mut filter = TemperatureFilter::new(0.5, 60.0);
        assert_eq!(filter.update(20.0, 0.0), Some(20.0));
        assert_eq!(filter.slope(), None);
    }

    #[test]
    fn smoothing_and_slope() {
        let mut filter = TemperatureFilter::new(0.5, 60.0);
        filter.update(20.0, 0.0);
        assert_eq!(filter.update(21.0, 30.0), Some(20.5));
        assert_eq!(filter.slope(), None);
        // 20.5 -> 20.75 at t=60; anchor was 20.0 at t=0
        filter.update(21.0, 60.0);
        assert!((filter.slope().unwrap() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn clock_reset_moves_the_anchor() {
        let mut filter = TemperatureFilter::new(1.0, 60.0);
        filter.update(20.0, 5000.0);
        filter.update(20.0, 10.0);
        filter.update(21.0, 70.0);
        assert!((filter.slope().unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ignores_non_finite() {
        let mut filter = TemperatureFilter::default();
        filter.update(19.0, 0.0);
        assert_eq!(filter.update(f64::NAN, 10.0), Some(19.0));
        filter.reset();
        assert_eq!(filter.value(), None);
    }
}
