//! Error types for the synchronization layer.

use std::path::PathBuf;

use tv_controls::ControlError;
use tv_core::ActuatorId;
use tv_store::StoreError;

/// Failure reported by an [`crate::ActuatorAdapter`] write.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// The device is known to be offline.
    #[error("actuator {actuator} is unavailable")]
    Unavailable { actuator: ActuatorId },

    #[error("write to {actuator} failed: {message}")]
    Write { actuator: ActuatorId, message: String },

    #[error("write to {actuator} timed out")]
    Timeout { actuator: ActuatorId },
}

impl TransportError {
    pub fn actuator(&self) -> &ActuatorId {
        match self {
            TransportError::Unavailable { actuator }
            | TransportError::Write { actuator, .. }
            | TransportError::Timeout { actuator } => actuator,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file: {path}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("Invalid controller parameters: {0}")]
    Control(#[from] ControlError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("calibration of {actuator} could not be read back")]
    FatalReadback { actuator: ActuatorId },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unknown actuator: {0}")]
    UnknownActuator(ActuatorId),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("synchronization queue is closed")]
    QueueClosed,
}

pub type SyncResult<T> = Result<T, SyncError>;
