//! Runtime state shared by the synchronizer and the calibration step.

use tv_core::{ActuatorId, string_enum};

use crate::config::ActuatorConfig;

string_enum! {
    pub enum HvacMode {
        Off => "off",
        Heat => "heat",
    }
}

string_enum! {
    /// How an actuator's reading is aligned with the external sensor.
    pub enum CalibrationType {
        /// Write a local temperature offset to the device.
        Offset => "offset",
        /// Shift the commanded setpoint instead.
        Setpoint => "setpoint",
    }
}

string_enum! {
    pub enum CalibrationMode {
        Default => "default",
        Aggressive => "aggressive",
        HeatingPower => "heating_power",
        Pid => "pid",
        Tpi => "tpi",
    }
}

impl CalibrationMode {
    /// Modes whose output is a demand percentage rather than a shift.
    pub fn is_percent(self) -> bool {
        matches!(
            self,
            CalibrationMode::HeatingPower | CalibrationMode::Pid | CalibrationMode::Tpi
        )
    }
}

string_enum! {
    pub enum TpiVariant {
        Static => "static",
        Learning => "learning",
    }
}

string_enum! {
    /// Acknowledgment-gated write channels, in write order.
    pub enum Channel {
        Mode => "mode",
        Calibration => "calibration",
        Temperature => "temperature",
    }
}

/// Per-channel acknowledgment flags. `true` means no write is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFlags {
    pub mode: bool,
    pub calibration: bool,
    pub temperature: bool,
}

impl Default for AckFlags {
    fn default() -> Self {
        Self {
            mode: true,
            calibration: true,
            temperature: true,
        }
    }
}

impl AckFlags {
    pub fn get(&self, channel: Channel) -> bool {
        match channel {
            Channel::Mode => self.mode,
            Channel::Calibration => self.calibration,
            Channel::Temperature => self.temperature,
        }
    }

    pub fn set(&mut self, channel: Channel, value: bool) {
        match channel {
            Channel::Mode => self.mode = value,
            Channel::Calibration => self.calibration = value,
            Channel::Temperature => self.temperature = value,
        }
    }
}

/// What the synchronizer knows about one actuator.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorRuntime {
    pub config: ActuatorConfig,
    /// The actuator's own temperature reading.
    pub current_temperature: Option<f64>,
    pub reported_setpoint: Option<f64>,
    pub reported_offset: Option<f64>,
    pub reported_mode: Option<HvacMode>,
    pub reported_valve: Option<f64>,
    pub last_sent_temperature: Option<f64>,
    pub last_sent_offset: Option<f64>,
    pub last_sent_mode: Option<HvacMode>,
    pub last_sent_valve: Option<f64>,
    /// Demand percent commanded by the last pass.
    pub last_percent: Option<f64>,
    pub ack: AckFlags,
    /// The last temperature write was seen on the device. `false` after a
    /// write whose acknowledgment timed out.
    pub temperature_confirmed: bool,
    pub available: bool,
    /// Set only while this actuator's writes are in flight. Reports seen
    /// meanwhile are our own echo and must not change the logical state.
    pub suppress_echo: bool,
}

impl ActuatorRuntime {
    pub fn new(config: ActuatorConfig) -> Self {
        Self {
            config,
            current_temperature: None,
            reported_setpoint: None,
            reported_offset: None,
            reported_mode: None,
            reported_valve: None,
            last_sent_temperature: None,
            last_sent_offset: None,
            last_sent_mode: None,
            last_sent_valve: None,
            last_percent: None,
            ack: AckFlags::default(),
            temperature_confirmed: true,
            available: true,
            suppress_echo: false,
        }
    }

    pub fn id(&self) -> &ActuatorId {
        &self.config.id
    }

    /// Fold an inbound report in. Fields absent from the report are kept.
    pub fn apply_report(&mut self, report: &ActuatorReport) {
        if let Some(t) = report.temperature.filter(|t| t.is_finite()) {
            self.current_temperature = Some(t);
        }
        if let Some(sp) = report.setpoint.filter(|t| t.is_finite()) {
            self.reported_setpoint = Some(sp);
        }
        if let Some(offset) = report.offset.filter(|t| t.is_finite()) {
            self.reported_offset = Some(offset);
        }
        if let Some(mode) = report.mode {
            self.reported_mode = Some(mode);
        }
        if let Some(valve) = report.valve.filter(|t| t.is_finite()) {
            self.reported_valve = Some(valve);
        }
        if let Some(available) = report.available {
            self.available = available;
        }
    }
}

/// State of the logical thermostat the actuators follow.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalState {
    pub target: Option<f64>,
    /// Filtered external temperature.
    pub external: Option<f64>,
    /// K/min.
    pub external_slope: Option<f64>,
    pub outdoor: Option<f64>,
    pub hvac_mode: HvacMode,
    pub window_open: bool,
    pub door_open: bool,
    /// Cleared by outdoor cutoff and similar heat-demand gates.
    pub call_for_heat: bool,
    pub preset: Option<String>,
}

impl Default for LogicalState {
    fn default() -> Self {
        Self {
            target: None,
            external: None,
            external_slope: None,
            outdoor: None,
            hvac_mode: HvacMode::Heat,
            window_open: false,
            door_open: false,
            call_for_heat: true,
            preset: None,
        }
    }
}

impl LogicalState {
    pub fn opening_detected(&self) -> bool {
        self.window_open || self.door_open
    }

    /// Heating may run at all.
    pub fn heating_allowed(&self) -> bool {
        self.hvac_mode != HvacMode::Off && self.call_for_heat
    }

    /// Heating may run and the room is below target.
    pub fn heating_needed(&self) -> bool {
        match (self.target, self.external) {
            (Some(target), Some(external)) => self.heating_allowed() && target > external,
            _ => false,
        }
    }
}

/// Inbound state report from one actuator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActuatorReport {
    pub temperature: Option<f64>,
    pub setpoint: Option<f64>,
    pub offset: Option<f64>,
    pub mode: Option<HvacMode>,
    pub valve: Option<f64>,
    pub available: Option<bool>,
}
