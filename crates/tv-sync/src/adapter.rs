//! Transport contract for physical actuators.
//!
//! Methods return boxed futures so adapters can be held as
//! `Arc<dyn ActuatorAdapter>` and swapped per installation.

use futures::future::BoxFuture;
use tv_core::ActuatorId;

use crate::error::TransportError;
use crate::model::HvacMode;

pub trait ActuatorAdapter: Send + Sync {
    fn set_temperature<'a>(
        &'a self,
        id: &'a ActuatorId,
        value: f64,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    fn set_offset<'a>(
        &'a self,
        id: &'a ActuatorId,
        value: f64,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    fn set_hvac_mode<'a>(
        &'a self,
        id: &'a ActuatorId,
        mode: HvacMode,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Direct valve position in percent. Returns whether the device took it.
    fn set_valve<'a>(&'a self, id: &'a ActuatorId, percent: f64) -> BoxFuture<'a, bool>;

    /// Calibration offset currently applied by the device, if readable.
    fn current_offset<'a>(&'a self, id: &'a ActuatorId) -> BoxFuture<'a, Option<f64>>;
}
