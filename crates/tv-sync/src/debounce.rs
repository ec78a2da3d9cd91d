//! Debounced window and door sensors.
//!
//! A raw state must hold for the configured delay before it reaches the
//! synchronizer; a change back within the delay restarts the wait.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tv_core::string_enum;

use crate::config::DebounceConfig;
use crate::synchronizer::SyncHandle;

string_enum! {
    pub enum SafetySensor {
        Window => "window",
        Door => "door",
    }
}

/// Input side of one debounced sensor.
#[derive(Debug)]
pub struct DebouncedSensor {
    sensor: SafetySensor,
    input: watch::Sender<Option<bool>>,
}

impl DebouncedSensor {
    pub fn sensor(&self) -> SafetySensor {
        self.sensor
    }

    /// Feed a raw reading.
    pub fn report(&self, open: bool) {
        self.input.send_replace(Some(open));
    }
}

fn delays(sensor: SafetySensor, config: &DebounceConfig) -> (Duration, Duration) {
    let (open, close) = match sensor {
        SafetySensor::Window => (config.window_open_s, config.window_close_s),
        SafetySensor::Door => (config.door_open_s, config.door_close_s),
    };
    (
        Duration::from_secs_f64(open.max(0.0)),
        Duration::from_secs_f64(close.max(0.0)),
    )
}

pub(crate) fn spawn_debounce(
    handle: SyncHandle,
    sensor: SafetySensor,
    config: &DebounceConfig,
    mut shutdown: watch::Receiver<bool>,
) -> (DebouncedSensor, JoinHandle<()>) {
    let (input, mut raw) = watch::channel(None);
    let (open_delay, close_delay) = delays(sensor, config);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = raw.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }

            // settle: apply once the value holds for its delay
            loop {
                let Some(open) = *raw.borrow_and_update() else {
                    break;
                };
                let delay = if open { open_delay } else { close_delay };
                tokio::select! {
                    settled = tokio::time::timeout(delay, raw.changed()) => match settled {
                        Err(_) => {
                            handle.set_safety_sensor(sensor, open);
                            break;
                        }
                        Ok(Ok(())) => debug!(sensor = %sensor, "state changed while settling"),
                        Ok(Err(_)) => return,
                    },
                    _ = shutdown.changed() => return,
                }
            }
        }
    });

    (DebouncedSensor { sensor, input }, task)
}
