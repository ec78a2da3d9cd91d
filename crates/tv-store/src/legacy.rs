//! One-time import of the pre-unification stores.
//!
//! Older installs kept one flat `{key: record}` file per controller kind and a
//! thermal file keyed by thermostat group id. The import runs only while the
//! unified snapshot is still completely empty, and a source that cannot be
//! read is reported and skipped.

use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use tracing::{info, warn};
use tv_controls::{PidRecord, ThermalStats, TpiRecord};
use tv_core::string_enum;

use crate::decode::decode_record;
use crate::schema::{ControllerRecord, MpcRecord, PersistedSnapshot};
use crate::{StoreError, StoreResult};

string_enum! {
    /// Legacy per-kind stores.
    pub enum LegacyKind {
        Pid => "pid",
        Tpi => "tpi",
        Mpc => "mpc",
        Thermal => "thermal",
    }
}

/// A legacy store that yields its whole document.
pub trait LegacySource {
    fn kind(&self) -> LegacyKind;

    fn read(&self) -> StoreResult<Value>;

    fn describe(&self) -> String;
}

/// Legacy store kept as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileLegacySource {
    kind: LegacyKind,
    path: PathBuf,
}

impl JsonFileLegacySource {
    pub fn new(kind: LegacyKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

impl LegacySource for JsonFileLegacySource {
    fn kind(&self) -> LegacyKind {
        self.kind
    }

    fn read(&self) -> StoreResult<Value> {
        let content = fs::read_to_string(&self.path).map_err(|e| StoreError::Legacy {
            source_name: self.describe(),
            what: e.to_string(),
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.path.display(), self.kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    /// Import did not run because the unified snapshot already had data.
    pub skipped_not_empty: bool,
    pub pid: usize,
    pub tpi: usize,
    pub mpc: usize,
    pub thermal: bool,
    /// Entries whose key or value had the wrong shape or prefix.
    pub rejected: usize,
    pub failed_sources: Vec<String>,
}

impl ImportReport {
    pub fn imported_anything(&self) -> bool {
        self.pid + self.tpi + self.mpc > 0 || self.thermal
    }
}

/// Merge legacy stores into `snapshot`.
///
/// Only entries whose key starts with `key_prefix` and whose value is a map
/// are taken. Thermal statistics are read from the entry keyed `group_id`.
pub fn import_legacy(
    snapshot: &mut PersistedSnapshot,
    sources: &[&dyn LegacySource],
    key_prefix: &str,
    group_id: &str,
) -> ImportReport {
    let mut report = ImportReport::default();
    if !snapshot.is_empty() {
        report.skipped_not_empty = true;
        return report;
    }

    for source in sources {
        let document = match source.read() {
            Ok(document) => document,
            Err(err) => {
                warn!(source = %source.describe(), error = %err, "legacy source unreadable");
                report.failed_sources.push(source.describe());
                continue;
            }
        };
        let Some(entries) = document.as_object() else {
            warn!(source = %source.describe(), "legacy source is not a map");
            report.failed_sources.push(source.describe());
            continue;
        };

        match source.kind() {
            LegacyKind::Pid => {
                report.pid += merge_entries::<PidRecord>(snapshot, entries, key_prefix, &mut report.rejected);
            }
            LegacyKind::Tpi => {
                report.tpi += merge_entries::<TpiRecord>(snapshot, entries, key_prefix, &mut report.rejected);
            }
            LegacyKind::Mpc => {
                report.mpc += merge_entries::<MpcRecord>(snapshot, entries, key_prefix, &mut report.rejected);
            }
            LegacyKind::Thermal => {
                if let Some(stats) = entries
                    .get(group_id)
                    .filter(|v| v.is_object())
                    .and_then(decode_record::<ThermalStats>)
                    && stats != ThermalStats::default()
                {
                    snapshot.thermal = stats;
                    report.thermal = true;
                }
            }
        }
    }

    if report.imported_anything() {
        info!(
            pid = report.pid,
            tpi = report.tpi,
            mpc = report.mpc,
            thermal = report.thermal,
            rejected = report.rejected,
            "imported legacy controller state"
        );
    }
    report
}

fn merge_entries<R: ControllerRecord>(
    snapshot: &mut PersistedSnapshot,
    entries: &serde_json::Map<String, Value>,
    key_prefix: &str,
    rejected: &mut usize,
) -> usize {
    let mut merged = 0;
    for (key, value) in entries {
        if key.is_empty() || !key.starts_with(key_prefix) || !value.is_object() {
            *rejected += 1;
            continue;
        }
        match decode_record::<R>(value) {
            Some(record) => {
                R::section_mut(snapshot).insert(key.clone(), record);
                merged += 1;
            }
            None => *rejected += 1,
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(LegacyKind, Option<Value>);

    impl LegacySource for Fixed {
        fn kind(&self) -> LegacyKind {
            self.0
        }

        fn read(&self) -> StoreResult<Value> {
            self.1.clone().ok_or_else(|| StoreError::Legacy {
                source_name: self.describe(),
                what: "missing".to_string(),
            })
        }

        fn describe(&self) -> String {
            format!("fixed-{}", self.0)
        }
    }

    #[test]
    fn imports_prefixed_entries_only() {
        let pid = Fixed(
            LegacyKind::Pid,
            Some(json!({
                "tv1:a:t21.0": {"integral": 2.0},
                "other:a:t21.0": {"integral": 9.0},
                "tv1:b:t20.0": 5,
            })),
        );
        let mut snapshot = PersistedSnapshot::default();
        let report = import_legacy(&mut snapshot, &[&pid], "tv1:", "group");
        assert_eq!(report.pid, 1);
        assert_eq!(report.rejected, 2);
        assert_eq!(snapshot.pid["tv1:a:t21.0"].integral, 2.0);
    }

    #[test]
    fn failing_source_does_not_block_others() {
        let broken = Fixed(LegacyKind::Tpi, None);
        let thermal = Fixed(
            LegacyKind::Thermal,
            Some(json!({"group": {"heating_power": 0.08}, "elsewhere": {"heating_power": 1.0}})),
        );
        let mpc = Fixed(LegacyKind::Mpc, Some(json!({"tv1:a:t21.0": {"horizon": 4}})));
        let mut snapshot = PersistedSnapshot::default();
        let report = import_legacy(&mut snapshot, &[&broken, &thermal, &mpc], "tv1:", "group");
        assert_eq!(report.failed_sources, vec!["fixed-tpi".to_string()]);
        assert!(report.thermal);
        assert_eq!(report.mpc, 1);
        assert_eq!(snapshot.thermal.heating_power, Some(0.08));
        assert_eq!(snapshot.mpc["tv1:a:t21.0"].0["horizon"], json!(4));
    }

    #[test]
    fn non_empty_snapshot_is_left_alone() {
        let pid = Fixed(LegacyKind::Pid, Some(json!({"tv1:a:t21.0": {"integral": 2.0}})));
        let mut snapshot = PersistedSnapshot::default();
        snapshot.presets.insert("eco".to_string(), 17.0);
        let report = import_legacy(&mut snapshot, &[&pid], "tv1:", "group");
        assert!(report.skipped_not_empty);
        assert!(snapshot.pid.is_empty());
    }
}
