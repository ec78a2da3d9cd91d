//! Where snapshots live.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::{StoreError, StoreResult};

/// Raw storage for the serialized snapshot.
pub trait SnapshotBackend: Send + Sync {
    /// Stored document, or `None` if nothing was written yet.
    fn read(&self) -> StoreResult<Option<String>>;

    fn write(&self, contents: &str) -> StoreResult<()>;

    fn describe(&self) -> String;
}

/// Snapshot stored as a JSON file, replaced atomically on write.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotBackend for JsonFileBackend {
    fn read(&self) -> StoreResult<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&self.path)?))
    }

    fn write(&self, contents: &str) -> StoreResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory backend. Clones share the same document.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    contents: Arc<Mutex<Option<String>>>,
    writes: Arc<Mutex<usize>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        let backend = Self::default();
        *backend.lock_contents() = Some(contents.into());
        backend
    }

    pub fn contents(&self) -> Option<String> {
        self.lock_contents().clone()
    }

    /// Number of completed writes.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_contents(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.contents.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SnapshotBackend for MemoryBackend {
    fn read(&self) -> StoreResult<Option<String>> {
        Ok(self.contents())
    }

    fn write(&self, contents: &str) -> StoreResult<()> {
        *self.lock_contents() = Some(contents.to_string());
        *self.writes.lock().map_err(|_| StoreError::Backend {
            what: "write counter poisoned".to_string(),
        })? += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
