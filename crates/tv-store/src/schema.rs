//! Persisted snapshot schema.
//!
//! ```text
//! { version, pid: {key: record}, tpi: {key: record}, mpc: {key: record},
//!   thermal: {heating_power?, heat_loss_rate?}, presets: {name: temperature} }
//! ```

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tv_controls::{PidRecord, ThermalStats, TpiRecord};
use tv_core::string_enum;

use crate::migrate::LATEST_VERSION;

string_enum! {
    /// Controller families with their own record section.
    pub enum ControllerKind {
        Pid => "pid",
        Tpi => "tpi",
        Mpc => "mpc",
    }
}

/// Model-predictive controller state. This crate does not run MPC; records
/// are kept verbatim so a store written by a newer build round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct MpcRecord(pub Map<String, Value>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub version: u32,
    #[serde(default)]
    pub pid: BTreeMap<String, PidRecord>,
    #[serde(default)]
    pub tpi: BTreeMap<String, TpiRecord>,
    #[serde(default)]
    pub mpc: BTreeMap<String, MpcRecord>,
    #[serde(default)]
    pub thermal: ThermalStats,
    #[serde(default)]
    pub presets: BTreeMap<String, f64>,
}

impl Default for PersistedSnapshot {
    fn default() -> Self {
        Self {
            version: LATEST_VERSION,
            pid: BTreeMap::new(),
            tpi: BTreeMap::new(),
            mpc: BTreeMap::new(),
            thermal: ThermalStats::default(),
            presets: BTreeMap::new(),
        }
    }
}

impl PersistedSnapshot {
    /// True when nothing has been learned or configured yet.
    pub fn is_empty(&self) -> bool {
        self.pid.is_empty()
            && self.tpi.is_empty()
            && self.mpc.is_empty()
            && self.thermal == ThermalStats::default()
            && self.presets.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.pid.len() + self.tpi.len() + self.mpc.len()
    }
}

/// A record type stored in one section of the snapshot.
pub trait ControllerRecord:
    Serialize + DeserializeOwned + Default + Clone + PartialEq + Send + 'static
{
    const KIND: ControllerKind;

    fn section(snapshot: &PersistedSnapshot) -> &BTreeMap<String, Self>;

    fn section_mut(snapshot: &mut PersistedSnapshot) -> &mut BTreeMap<String, Self>;
}

impl ControllerRecord for PidRecord {
    const KIND: ControllerKind = ControllerKind::Pid;

    fn section(snapshot: &PersistedSnapshot) -> &BTreeMap<String, Self> {
        &snapshot.pid
    }

    fn section_mut(snapshot: &mut PersistedSnapshot) -> &mut BTreeMap<String, Self> {
        &mut snapshot.pid
    }
}

impl ControllerRecord for TpiRecord {
    const KIND: ControllerKind = ControllerKind::Tpi;

    fn section(snapshot: &PersistedSnapshot) -> &BTreeMap<String, Self> {
        &snapshot.tpi
    }

    fn section_mut(snapshot: &mut PersistedSnapshot) -> &mut BTreeMap<String, Self> {
        &mut snapshot.tpi
    }
}

impl ControllerRecord for MpcRecord {
    const KIND: ControllerKind = ControllerKind::Mpc;

    fn section(snapshot: &PersistedSnapshot) -> &BTreeMap<String, Self> {
        &snapshot.mpc
    }

    fn section_mut(snapshot: &mut PersistedSnapshot) -> &mut BTreeMap<String, Self> {
        &mut snapshot.mpc
    }
}
