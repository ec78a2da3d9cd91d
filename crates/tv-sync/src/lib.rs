//! tv-sync: keeps a group of heating-valve actuators converged on one
//! logical thermostat.
//!
//! The pieces, in the order a pass uses them:
//! - calibration (per-actuator offset or setpoint, controller demand)
//! - plan (boost and safety overrides)
//! - synchronizer (ack-gated writes through an [`ActuatorAdapter`])
//! - ack (bounded acknowledgment watchers)
//!
//! plus YAML configuration, device quirks, debounced safety sensors and a
//! periodic store flush.

pub mod ack;
pub mod adapter;
pub mod calibration;
pub mod config;
pub mod debounce;
pub mod error;
pub mod model;
pub mod persistence;
pub mod plan;
pub mod quirks;
pub mod synchronizer;

pub use adapter::ActuatorAdapter;
pub use calibration::{CalibrationInput, CalibrationOrchestrator, CalibrationReason, CalibrationResult};
pub use config::{ActuatorConfig, ThermostatConfig, load_yaml, parse_yaml};
pub use debounce::{DebouncedSensor, SafetySensor};
pub use error::{SyncError, SyncResult, TransportError};
pub use model::{
    AckFlags, ActuatorReport, ActuatorRuntime, CalibrationMode, CalibrationType, Channel,
    HvacMode, LogicalState, TpiVariant,
};
pub use plan::ActuatorPlan;
pub use quirks::{DeviceQuirks, NoQuirks, QuirkRegistry, normalize_model};
pub use synchronizer::{
    ActuatorOutcome, ActuatorSummary, DeviceSynchronizer, PassReport, SyncHandle, SyncReason,
    WriteOutcome,
};
