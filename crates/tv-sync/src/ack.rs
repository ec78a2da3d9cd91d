//! Write acknowledgment.
//!
//! After a write the channel's ack flag drops to `false` and a watcher waits
//! for the device to report the written value. Inbound reports signal the
//! watcher early; otherwise it re-checks every poll interval and gives up
//! after `max_polls` intervals.

use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tv_core::within;

use crate::config::AckConfig;
use crate::model::{ActuatorRuntime, Channel, HvacMode};

/// Value one channel is being driven to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Desired {
    Mode(HvacMode),
    Calibration(f64),
    Temperature(f64),
}

impl Desired {
    pub fn channel(self) -> Channel {
        match self {
            Desired::Mode(_) => Channel::Mode,
            Desired::Calibration(_) => Channel::Calibration,
            Desired::Temperature(_) => Channel::Temperature,
        }
    }

    /// The device already reports this value, within the channel tolerance.
    pub fn is_reported(self, runtime: &ActuatorRuntime, ack: &AckConfig) -> bool {
        match self {
            Desired::Mode(mode) => runtime.reported_mode == Some(mode),
            Desired::Calibration(offset) => runtime
                .reported_offset
                .is_some_and(|r| within(r, offset, ack.calibration_tolerance)),
            Desired::Temperature(t) => runtime
                .reported_setpoint
                .is_some_and(|r| within(r, t, ack.temperature_tolerance)),
        }
    }

    pub fn is_last_sent(self, runtime: &ActuatorRuntime) -> bool {
        match self {
            Desired::Mode(mode) => runtime.last_sent_mode == Some(mode),
            Desired::Calibration(offset) => runtime
                .last_sent_offset
                .is_some_and(|s| within(s, offset, 0.0)),
            Desired::Temperature(t) => runtime
                .last_sent_temperature
                .is_some_and(|s| within(s, t, 0.0)),
        }
    }

    pub fn record_sent(self, runtime: &mut ActuatorRuntime) {
        match self {
            Desired::Mode(mode) => runtime.last_sent_mode = Some(mode),
            Desired::Calibration(offset) => runtime.last_sent_offset = Some(offset),
            Desired::Temperature(t) => runtime.last_sent_temperature = Some(t),
        }
    }

    /// Remember how the write of this value ended. Only the temperature
    /// channel keeps it, to tell device-side setpoint changes from a write
    /// that never arrived.
    pub fn record_outcome(self, runtime: &mut ActuatorRuntime, outcome: AckOutcome) {
        if let Desired::Temperature(_) = self {
            runtime.temperature_confirmed = outcome == AckOutcome::Confirmed;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Confirmed,
    TimedOut,
}

/// Total time a watcher waits before releasing the flag anyway.
pub fn ack_timeout(config: &AckConfig) -> Duration {
    config.poll_interval() * config.max_polls
}

/// Wait until `confirmed` holds or the timeout passes.
pub async fn wait_for_ack(
    notify: &Notify,
    config: &AckConfig,
    mut confirmed: impl FnMut() -> bool,
) -> AckOutcome {
    let poll = config.poll_interval();
    let deadline = Instant::now() + ack_timeout(config);
    loop {
        // registered before the check so a report in between is not missed
        let notified = notify.notified();
        if confirmed() {
            return AckOutcome::Confirmed;
        }
        let now = Instant::now();
        if now >= deadline {
            return AckOutcome::TimedOut;
        }
        let _ = tokio::time::timeout(poll.min(deadline - now), notified).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::config::ActuatorConfig;

    fn fast() -> AckConfig {
        AckConfig {
            poll_interval_ms: 100,
            max_polls: 10,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_max_polls() {
        let notify = Notify::new();
        let started = Instant::now();
        let outcome = wait_for_ack(&notify, &fast(), || false).await;
        assert_eq!(outcome, AckOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn report_signal_confirms_early() {
        let notify = Arc::new(Notify::new());
        let done = Arc::new(AtomicBool::new(false));
        let (n, d) = (Arc::clone(&notify), Arc::clone(&done));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            d.store(true, Ordering::SeqCst);
            n.notify_waiters();
        });
        let started = Instant::now();
        let outcome = wait_for_ack(&notify, &fast(), || done.load(Ordering::SeqCst)).await;
        assert_eq!(outcome, AckOutcome::Confirmed);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn tolerances_per_channel() {
        let ack = AckConfig::default();
        let mut runtime = ActuatorRuntime::new(ActuatorConfig::new("a"));
        runtime.reported_offset = Some(-1.4);
        runtime.reported_setpoint = Some(21.3);
        runtime.reported_mode = Some(HvacMode::Heat);
        assert!(Desired::Calibration(-1.0).is_reported(&runtime, &ack));
        assert!(!Desired::Calibration(-0.8).is_reported(&runtime, &ack));
        assert!(Desired::Temperature(21.5).is_reported(&runtime, &ack));
        assert!(!Desired::Temperature(21.6).is_reported(&runtime, &ack));
        assert!(!Desired::Mode(HvacMode::Off).is_reported(&runtime, &ack));
    }
}
