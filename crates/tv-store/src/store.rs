//! State store API.

use serde_json::Value;
use tracing::{debug, info, warn};
use tv_controls::ThermalStats;

use crate::StoreResult;
use crate::backend::SnapshotBackend;
use crate::decode::{decode_snapshot, encode_snapshot};
use crate::legacy::{ImportReport, LegacySource, import_legacy};
use crate::migrate::{LATEST_VERSION, migrate_to_latest};
use crate::schema::{ControllerRecord, PersistedSnapshot};

/// Owner of one thermostat's persisted snapshot.
///
/// Every mutation marks the store dirty; [`StateStore::save_if_dirty`] writes
/// only then, [`StateStore::save`] always writes.
pub struct StateStore {
    backend: Box<dyn SnapshotBackend>,
    snapshot: PersistedSnapshot,
    dirty: bool,
    loaded: bool,
}

impl StateStore {
    /// Store over `backend` with an empty snapshot. Call [`StateStore::load`]
    /// before use.
    pub fn new(backend: impl SnapshotBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            snapshot: PersistedSnapshot::default(),
            dirty: false,
            loaded: false,
        }
    }

    /// Create and load in one step.
    pub fn open(backend: impl SnapshotBackend + 'static) -> Self {
        let mut store = Self::new(backend);
        store.load();
        store
    }

    /// Hydrate the snapshot from the backend. Runs once; unreadable or
    /// malformed data yields an empty snapshot and a warning.
    pub fn load(&mut self) {
        if self.loaded {
            debug!(backend = %self.backend.describe(), "state already loaded");
            return;
        }
        self.loaded = true;

        let text = match self.backend.read() {
            Ok(Some(text)) => text,
            Ok(None) => {
                info!(backend = %self.backend.describe(), "no persisted state, starting empty");
                return;
            }
            Err(err) => {
                warn!(backend = %self.backend.describe(), error = %err, "state unreadable, starting empty");
                return;
            }
        };

        let mut raw: Value = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(backend = %self.backend.describe(), error = %err, "state is not valid JSON, starting empty");
                return;
            }
        };

        match migrate_to_latest(&mut raw) {
            Ok(found) => {
                self.snapshot = decode_snapshot(&raw);
                // persist the upgrade on the next flush
                self.dirty = found < LATEST_VERSION;
                debug!(
                    records = self.snapshot.record_count(),
                    version = self.snapshot.version,
                    "state loaded"
                );
            }
            Err(err) => {
                warn!(backend = %self.backend.describe(), error = %err, "state migration failed, starting empty");
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn snapshot(&self) -> &PersistedSnapshot {
        &self.snapshot
    }

    pub fn get<R: ControllerRecord>(&self, key: &str) -> Option<&R> {
        R::section(&self.snapshot).get(key)
    }

    /// Record for `key`, created with defaults (and marked dirty) if absent.
    pub fn get_or_create<R: ControllerRecord>(&mut self, key: &str) -> &mut R {
        let dirty = &mut self.dirty;
        R::section_mut(&mut self.snapshot)
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(kind = R::KIND.as_str(), key, "creating controller record");
                *dirty = true;
                R::default()
            })
    }

    /// Run `f` on the record for `key`, creating it if needed. The store is
    /// marked dirty if the record changed.
    pub fn update<R: ControllerRecord, T>(&mut self, key: &str, f: impl FnOnce(&mut R) -> T) -> T {
        let record = self.get_or_create::<R>(key);
        let before = record.clone();
        let out = f(record);
        if *record != before {
            self.dirty = true;
        }
        out
    }

    pub fn set<R: ControllerRecord>(&mut self, key: &str, record: R) {
        R::section_mut(&mut self.snapshot).insert(key.to_string(), record);
        self.dirty = true;
    }

    /// Keys of one record kind, in order.
    pub fn keys<R: ControllerRecord>(&self) -> impl Iterator<Item = &str> {
        R::section(&self.snapshot).keys().map(String::as_str)
    }

    pub fn thermal(&self) -> ThermalStats {
        self.snapshot.thermal
    }

    pub fn set_thermal(&mut self, stats: ThermalStats) {
        if self.snapshot.thermal != stats {
            self.snapshot.thermal = stats;
            self.dirty = true;
        }
    }

    pub fn preset(&self, name: &str) -> Option<f64> {
        self.snapshot.presets.get(name).copied()
    }

    pub fn set_preset(&mut self, name: &str, temperature: f64) {
        self.snapshot.presets.insert(name.to_string(), temperature);
        self.dirty = true;
    }

    /// Snapshot as plain JSON.
    pub fn export(&self) -> Value {
        encode_snapshot(&self.snapshot)
    }

    /// Replace the snapshot with `raw`, migrating it first.
    pub fn import(&mut self, mut raw: Value) -> StoreResult<()> {
        migrate_to_latest(&mut raw)?;
        self.snapshot = decode_snapshot(&raw);
        self.dirty = true;
        Ok(())
    }

    /// One-time import of legacy per-kind stores (see [`import_legacy`]).
    pub fn import_legacy(
        &mut self,
        sources: &[&dyn LegacySource],
        key_prefix: &str,
        group_id: &str,
    ) -> ImportReport {
        let report = import_legacy(&mut self.snapshot, sources, key_prefix, group_id);
        if report.imported_anything() {
            self.dirty = true;
        }
        report
    }

    /// Write the snapshot unconditionally.
    pub fn save(&mut self) -> StoreResult<()> {
        let content = serde_json::to_string_pretty(&encode_snapshot(&self.snapshot))?;
        self.backend.write(&content)?;
        self.dirty = false;
        debug!(backend = %self.backend.describe(), "state saved");
        Ok(())
    }

    /// Write only if something changed. Returns whether a write happened.
    pub fn save_if_dirty(&mut self) -> StoreResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Alias of [`StateStore::save_if_dirty`] used on teardown.
    pub fn flush(&mut self) -> StoreResult<bool> {
        self.save_if_dirty()
    }
}
