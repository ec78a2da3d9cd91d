//! Schema migration framework.
//!
//! Migrations run on the raw JSON document before any typed read, so an old
//! file is upgraded in place and decoded with the current schema.

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::StoreError;

pub const LATEST_VERSION: u32 = 1;

const V1_SECTIONS: [&str; 5] = ["pid", "tpi", "mpc", "thermal", "presets"];

/// Schema version stamped on `raw`. A missing version means schema 0.
pub fn detect_version(raw: &Value) -> u32 {
    match raw.get("version") {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(_) => 0,
    }
}

/// Upgrade `raw` to [`LATEST_VERSION`] and return the version it had.
pub fn migrate_to_latest(raw: &mut Value) -> Result<u32, StoreError> {
    if !raw.is_object() {
        return Err(StoreError::Migration {
            what: "snapshot root is not an object".to_string(),
        });
    }

    let found = detect_version(raw);
    let mut version = found;
    while version < LATEST_VERSION {
        version = migrate_one_version(raw, version)?;
    }
    if found > LATEST_VERSION {
        warn!(
            found,
            supported = LATEST_VERSION,
            "snapshot written by a newer schema, reading best effort"
        );
    } else if found < LATEST_VERSION {
        info!(from = found, to = LATEST_VERSION, "migrated persisted state");
    }
    Ok(found)
}

fn migrate_one_version(raw: &mut Value, version: u32) -> Result<u32, StoreError> {
    match version {
        0 => migrate_v0_to_v1(raw),
        v => Err(StoreError::Migration {
            what: format!("No migration path from version {}", v),
        }),
    }
}

fn migrate_v0_to_v1(raw: &mut Value) -> Result<u32, StoreError> {
    let root = raw.as_object_mut().ok_or_else(|| StoreError::Migration {
        what: "snapshot root is not an object".to_string(),
    })?;
    for section in V1_SECTIONS {
        root.entry(section)
            .or_insert_with(|| Value::Object(Map::new()));
    }
    root.insert("version".to_string(), Value::from(1));
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn migrate_latest_is_noop() {
        let mut raw = json!({
            "version": LATEST_VERSION,
            "pid": {},
            "tpi": {},
            "mpc": {},
            "thermal": {},
            "presets": {},
        });
        let before = raw.clone();
        assert_eq!(migrate_to_latest(&mut raw).unwrap(), LATEST_VERSION);
        assert_eq!(raw, before);
    }

    #[test]
    fn versionless_snapshot_is_upgraded_in_place() {
        let mut raw = json!({
            "pid": {"tv1:a:t21.0": {"integral": 3.0}},
        });
        assert_eq!(migrate_to_latest(&mut raw).unwrap(), 0);
        assert_eq!(raw["version"], json!(1));
        assert_eq!(raw["pid"]["tv1:a:t21.0"]["integral"], json!(3.0));
        for section in V1_SECTIONS {
            assert!(raw[section].is_object(), "missing {section}");
        }
    }

    #[test]
    fn newer_version_is_left_alone() {
        let mut raw = json!({"version": 7, "pid": {}});
        assert_eq!(migrate_to_latest(&mut raw).unwrap(), 7);
        assert_eq!(raw["version"], json!(7));
    }

    #[test]
    fn non_object_root_is_rejected() {
        let mut raw = json!([1, 2, 3]);
        assert!(migrate_to_latest(&mut raw).is_err());
    }

    #[test]
    fn string_version_is_understood() {
        assert_eq!(detect_version(&json!({"version": "1"})), 1);
        assert_eq!(detect_version(&json!({"version": true})), 0);
    }
}
