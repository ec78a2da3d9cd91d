//! tv-store: versioned persistence of learned controller state.
//!
//! One [`StateStore`] per thermostat owns the [`PersistedSnapshot`]. Reads are
//! tolerant: unknown fields are ignored, wrong-typed fields fall back to their
//! defaults and an unreadable file yields an empty snapshot instead of a
//! startup failure.

pub mod backend;
pub mod decode;
pub mod legacy;
pub mod migrate;
pub mod schema;
pub mod store;

pub use backend::{JsonFileBackend, MemoryBackend, SnapshotBackend};
pub use legacy::{ImportReport, JsonFileLegacySource, LegacyKind, LegacySource, import_legacy};
pub use migrate::{LATEST_VERSION, migrate_to_latest};
pub use schema::*;
pub use store::StateStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Migration error: {what}")]
    Migration { what: String },

    #[error("Backend error: {what}")]
    Backend { what: String },

    #[error("Legacy source {source_name} unreadable: {what}")]
    Legacy { source_name: String, what: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
