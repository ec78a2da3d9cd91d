use core::fmt;

use crate::CoreError;
use crate::numeric::{Real, quantize_bucket};

/// Identifier of one physical actuator within a thermostat group.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ActuatorId(String);

impl ActuatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ActuatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActuatorId({})", self.0)
    }
}

impl fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActuatorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ActuatorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Key of one controller record: `{thermostat}:{actuator}:t{bucket}`.
///
/// The bucket is the target temperature quantized to half a kelvin so that
/// nearby setpoints share learned state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerKey(String);

impl ControllerKey {
    pub fn new(thermostat: &str, actuator: &ActuatorId, target: Real) -> Self {
        let bucket = quantize_bucket(target);
        Self(format!("{thermostat}:{actuator}:t{bucket:.1}"))
    }

    /// Parse a persisted key, checking the `t{bucket}` suffix.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let invalid = || CoreError::InvalidKey {
            key: raw.to_string(),
        };
        let (head, bucket) = raw.rsplit_once(":t").ok_or_else(invalid)?;
        if head.is_empty() || bucket.parse::<Real>().is_err() {
            return Err(invalid());
        }
        Ok(Self(raw.to_string()))
    }

    /// Prefix shared by every key of one thermostat.
    pub fn thermostat_prefix(thermostat: &str) -> String {
        format!("{thermostat}:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ControllerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
