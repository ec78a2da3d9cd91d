//! Thermostat configuration, loaded from YAML.
//!
//! Every section has defaults, so a file only needs the thermostat id and its
//! actuators. Enum values are matched case-insensitively.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tv_controls::{LearningTpiParams, PidParams, ThermalParams, TpiParams};
use tv_core::ActuatorId;

use crate::error::{SyncError, SyncResult};
use crate::model::{CalibrationMode, CalibrationType, TpiVariant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub id: ActuatorId,
    /// Device model string, used to look up quirks.
    pub model: Option<String>,
    pub calibration_type: CalibrationType,
    pub calibration_mode: CalibrationMode,
    pub min_temp: f64,
    pub max_temp: f64,
    pub temp_step: f64,
    pub offset_step: f64,
    pub offset_min: f64,
    pub offset_max: f64,
    /// The device accepts an explicit off mode.
    pub has_off_mode: bool,
    /// The device accepts direct valve positions.
    pub supports_valve: bool,
    /// Kelvin below the perceived temperature that maps to 0 % demand.
    pub closing_margin: f64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            id: ActuatorId::new(""),
            model: None,
            calibration_type: CalibrationType::Offset,
            calibration_mode: CalibrationMode::Default,
            min_temp: 5.0,
            max_temp: 30.0,
            temp_step: 0.5,
            offset_step: 0.1,
            offset_min: -10.0,
            offset_max: 10.0,
            has_off_mode: true,
            supports_valve: false,
            closing_margin: 1.0,
        }
    }
}

impl ActuatorConfig {
    pub fn new(id: impl Into<ActuatorId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    fn validate(&self) -> SyncResult<()> {
        let invalid = |what: &str| {
            Err(SyncError::Config(format!("actuator {}: {what}", self.id)))
        };
        if self.id.as_str().trim().is_empty() {
            return Err(SyncError::Config("actuator id must not be empty".to_string()));
        }
        if !(self.min_temp.is_finite() && self.max_temp.is_finite()) || self.min_temp >= self.max_temp {
            return invalid("min_temp must be below max_temp");
        }
        if !(self.temp_step > 0.0) || !(self.offset_step > 0.0) {
            return invalid("steps must be positive");
        }
        if !(self.offset_min.is_finite() && self.offset_max.is_finite()) {
            return invalid("offset bounds must be numbers");
        }
        if self.offset_min > self.offset_max {
            return invalid("offset_min must not exceed offset_max");
        }
        if !(self.closing_margin >= 0.0) {
            return invalid("closing_margin must be non-negative");
        }
        Ok(())
    }
}

/// Acknowledgment watcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AckConfig {
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    pub calibration_tolerance: f64,
    pub temperature_tolerance: f64,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_polls: 360,
            calibration_tolerance: 0.5,
            temperature_tolerance: 0.25,
        }
    }
}

impl AckConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Shift applied by the aggressive mode, kelvin.
    pub aggressive_delta: f64,
    /// Error beyond which the aggressive mode pushes.
    pub aggressive_band: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            aggressive_delta: 2.0,
            aggressive_band: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub alpha: f64,
    pub min_slope_interval_s: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            min_slope_interval_s: 120.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub queue_capacity: usize,
    /// Delay before an incomplete pass is queued again.
    pub retry_delay_ms: u64,
    pub flush_interval_s: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            retry_delay_ms: 5_000,
            flush_interval_s: 60,
        }
    }
}

/// Seconds a window or door state must hold before it is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub window_open_s: f64,
    pub window_close_s: f64,
    pub door_open_s: f64,
    pub door_close_s: f64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window_open_s: 15.0,
            window_close_s: 15.0,
            door_open_s: 30.0,
            door_close_s: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatConfig {
    pub id: String,
    pub actuators: Vec<ActuatorConfig>,
    pub pid: PidParams,
    pub tpi: TpiParams,
    pub learning_tpi: LearningTpiParams,
    pub tpi_variant: TpiVariant,
    pub thermal: ThermalParams,
    pub filter: FilterConfig,
    pub calibration: CalibrationConfig,
    pub ack: AckConfig,
    pub sync: SyncConfig,
    pub debounce: DebounceConfig,
    pub boost_preset: String,
    /// Preset temperatures used until the store holds its own.
    pub presets: BTreeMap<String, f64>,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            actuators: Vec::new(),
            pid: PidParams::default(),
            tpi: TpiParams::default(),
            learning_tpi: LearningTpiParams::default(),
            tpi_variant: TpiVariant::Static,
            thermal: ThermalParams::default(),
            filter: FilterConfig::default(),
            calibration: CalibrationConfig::default(),
            ack: AckConfig::default(),
            sync: SyncConfig::default(),
            debounce: DebounceConfig::default(),
            boost_preset: "boost".to_string(),
            presets: BTreeMap::new(),
        }
    }
}

impl ThermostatConfig {
    pub fn actuator(&self, id: &ActuatorId) -> Option<&ActuatorConfig> {
        self.actuators.iter().find(|a| &a.id == id)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.id.trim().is_empty() {
            return Err(SyncError::Config("thermostat id must not be empty".to_string()));
        }
        if self.id.contains(':') {
            return Err(SyncError::Config(format!(
                "thermostat id {:?} must not contain ':'",
                self.id
            )));
        }
        if self.actuators.is_empty() {
            return Err(SyncError::Config(format!("thermostat {} has no actuators", self.id)));
        }
        let mut seen = HashSet::new();
        for actuator in &self.actuators {
            if !seen.insert(&actuator.id) {
                return Err(SyncError::Config(format!("duplicate actuator id {}", actuator.id)));
            }
            actuator.validate()?;
        }

        self.pid.validate()?;
        self.tpi.validate()?;
        self.learning_tpi.validate()?;

        if self.ack.max_polls == 0 || self.ack.poll_interval_ms == 0 {
            return Err(SyncError::Config("ack polling must be positive".to_string()));
        }
        if self.sync.queue_capacity == 0 {
            return Err(SyncError::Config("queue_capacity must be positive".to_string()));
        }
        if !(self.filter.alpha > 0.0 && self.filter.alpha <= 1.0) {
            return Err(SyncError::Config("filter alpha must be in (0, 1]".to_string()));
        }
        let d = &self.debounce;
        for delay in [d.window_open_s, d.window_close_s, d.door_open_s, d.door_close_s] {
            if !(delay.is_finite() && delay >= 0.0) {
                return Err(SyncError::Config("debounce delays must be non-negative".to_string()));
            }
        }
        for (name, temperature) in &self.presets {
            if !temperature.is_finite() {
                return Err(SyncError::Config(format!("preset {name} is not a number")));
            }
        }
        Ok(())
    }
}

pub fn parse_yaml(content: &str) -> SyncResult<ThermostatConfig> {
    let config: ThermostatConfig = serde_yaml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

pub fn load_yaml(path: &Path) -> SyncResult<ThermostatConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| SyncError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_yaml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
id: living
actuators:
  - id: trv.window
  - id: trv.door
    calibration_type: SETPOINT
    calibration_mode: pid
    supports_valve: true
"#;

    #[test]
    fn minimal_yaml_gets_defaults() {
        let config = parse_yaml(MINIMAL).unwrap();
        assert_eq!(config.actuators.len(), 2);
        assert_eq!(config.tpi_variant, TpiVariant::Static);
        assert_eq!(config.ack.max_polls, 360);
        let door = config.actuator(&ActuatorId::new("trv.door")).unwrap();
        assert_eq!(door.calibration_type, CalibrationType::Setpoint);
        assert_eq!(door.calibration_mode, CalibrationMode::Pid);
        assert_eq!(door.max_temp, 30.0);
    }

    #[test]
    fn nested_controller_params_override_defaults() {
        let yaml = format!("{MINIMAL}pid:\n  kp: 12.5\ntpi_variant: Learning\n");
        let config = parse_yaml(&yaml).unwrap();
        assert_eq!(config.pid.kp, 12.5);
        assert_eq!(config.pid.ki, PidParams::default().ki);
        assert_eq!(config.tpi_variant, TpiVariant::Learning);
    }

    #[test]
    fn duplicate_actuators_are_rejected() {
        let yaml = "id: x\nactuators:\n  - id: a\n  - id: a\n";
        assert!(matches!(parse_yaml(yaml), Err(SyncError::Config(_))));
    }

    #[test]
    fn bad_bounds_are_rejected() {
        let yaml = "id: x\nactuators:\n  - id: a\n    min_temp: 30\n    max_temp: 5\n";
        assert!(parse_yaml(yaml).is_err());
        let yaml = "id: x\nactuators:\n  - id: a\npid:\n  i_min: 10\n  i_max: 0\n";
        assert!(matches!(parse_yaml(yaml), Err(SyncError::Control(_))));
    }

    #[test]
    fn non_numeric_offset_bounds_are_rejected() {
        for bound in ["offset_min", "offset_max"] {
            let yaml = format!("id: x\nactuators:\n  - id: a\n    {bound}: .nan\n");
            assert!(matches!(parse_yaml(&yaml), Err(SyncError::Config(_))), "{bound}");
        }
        let yaml = "id: x\nactuators:\n  - id: a\n    offset_max: .inf\n";
        assert!(parse_yaml(yaml).is_err());
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let yaml = "id: x\nactuators:\n  - id: a\n    calibration_mode: turbo\n";
        assert!(matches!(parse_yaml(yaml), Err(SyncError::ConfigParse(_))));
    }
}
