//! Time sources.
//!
//! Controllers take time as an explicit argument in seconds; the
//! synchronizer reads it from a [`Clock`] so tests can drive time by hand.

use std::sync::Mutex;

use chrono::Utc;

/// Seconds on a time base that survives restarts.
///
/// Controller records persist timestamps taken from this clock, so a
/// production clock must keep counting across process restarts.
pub trait Clock: Send + Sync {
    fn now_s(&self) -> f64;
}

/// Wall clock in seconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_s(&self) -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

/// Clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start_s: f64) -> Self {
        Self {
            now: Mutex::new(start_s),
        }
    }

    pub fn advance(&self, seconds: f64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += seconds;
    }

    pub fn set(&self, seconds: f64) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = seconds;
    }
}

impl Clock for ManualClock {
    fn now_s(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(10.0);
        clock.advance(5.0);
        assert_eq!(clock.now_s(), 15.0);
        clock.set(1.0);
        assert_eq!(clock.now_s(), 1.0);
    }

    #[test]
    fn system_clock_counts_from_the_epoch() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_s() > 1_577_836_800.0);
    }
}
