//! Lenient decoding of persisted JSON.
//!
//! A record that fails strict decoding is rebuilt field by field on top of
//! its default: each known field is kept only if the record still decodes
//! with it, so one wrong-typed value costs that field and nothing else.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use tv_controls::ThermalStats;

use crate::migrate::LATEST_VERSION;
use crate::schema::{ControllerRecord, PersistedSnapshot};

/// Decode one record. Returns `None` when `value` is not an object.
pub fn decode_record<T>(value: &Value) -> Option<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    let fields = value.as_object()?;
    if let Ok(record) = serde_json::from_value::<T>(value.clone()) {
        return Some(record);
    }

    let Ok(Value::Object(mut merged)) = serde_json::to_value(T::default()) else {
        return Some(T::default());
    };
    for (name, field) in fields {
        if !merged.contains_key(name) {
            continue;
        }
        let mut trial = merged.clone();
        trial.insert(name.clone(), field.clone());
        if serde_json::from_value::<T>(Value::Object(trial.clone())).is_ok() {
            merged = trial;
        } else {
            debug!(field = %name, "dropping wrong-typed field");
        }
    }
    serde_json::from_value(Value::Object(merged)).ok()
}

/// Decode a `{key: record}` section, skipping entries that are not objects.
pub fn decode_section<R: ControllerRecord>(value: Option<&Value>) -> BTreeMap<String, R> {
    let mut out = BTreeMap::new();
    let Some(value) = value else {
        return out;
    };
    let Some(entries) = value.as_object() else {
        warn!(section = R::KIND.as_str(), "section is not a map, ignoring");
        return out;
    };
    for (key, entry) in entries {
        match decode_record::<R>(entry) {
            Some(record) => {
                out.insert(key.clone(), record);
            }
            None => warn!(section = R::KIND.as_str(), key = %key, "skipping malformed record"),
        }
    }
    out
}

fn decode_presets(value: Option<&Value>) -> BTreeMap<String, f64> {
    value
        .and_then(Value::as_object)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(name, v)| v.as_f64().map(|t| (name.clone(), t)))
                .collect()
        })
        .unwrap_or_default()
}

/// Decode an already migrated snapshot object.
pub fn decode_snapshot(value: &Value) -> PersistedSnapshot {
    let empty = Map::new();
    let root = value.as_object().unwrap_or(&empty);
    let version = root
        .get("version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(LATEST_VERSION);

    PersistedSnapshot {
        version,
        pid: decode_section(root.get("pid")),
        tpi: decode_section(root.get("tpi")),
        mpc: decode_section(root.get("mpc")),
        thermal: root
            .get("thermal")
            .and_then(decode_record::<ThermalStats>)
            .unwrap_or_default(),
        presets: decode_presets(root.get("presets")),
    }
}

/// Encode a snapshot to plain nested maps and sequences.
pub fn encode_snapshot(snapshot: &PersistedSnapshot) -> Value {
    serde_json::to_value(snapshot).unwrap_or_else(|err| {
        warn!(error = %err, "snapshot encoding failed, writing empty object");
        Value::Object(Map::new())
    })
}
