//! Feedback controllers for heating-valve calibration.
//!
//! Every controller here is a pure function of its parameters, its inputs and
//! a mutable per-key record. Records are owned by the caller (normally the
//! state store) so learned values survive restarts.
//!
//! # Controllers
//!
//! - **PID**: conditional anti-windup, derivative on measurement, integrator
//!   relief near the setpoint and optional rate-limited auto-tuning
//! - **TPI**: static time-proportional-integral duty cycle
//! - **Learning TPI**: TPI that learns heating gain and passive loss from the
//!   observed temperature slope
//!
//! Missing readings never raise; controllers return a neutral 0 % output and
//! a reason instead.

pub mod error;
pub mod filter;
pub mod learning_tpi;
pub mod pid;
pub mod thermal;
pub mod tpi;

pub use error::{ControlError, ControlResult};
pub use filter::TemperatureFilter;
pub use learning_tpi::{LearningTpiParams, TpiRecord};
pub use pid::{
    AutoTuneParams, DerivativeMode, PidDebug, PidInputs, PidOutput, PidParams, PidReason,
    PidRecord, TuneAction,
};
pub use thermal::{ThermalParams, ThermalStats};
pub use tpi::{TpiInput, TpiOutput, TpiParams, TpiReason};
