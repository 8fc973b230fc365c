//! Persisted fence id set.
//!
//! Only fence ids are persisted: an ordered set of strings read at startup
//! and rewritten on every add/remove. Fence geometry is re-supplied by the
//! caller when it re-registers the restored ids.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::StoreError;
use crate::fence::FenceId;

/// Storage for the set of active fence ids.
pub trait FenceIdStore: Send + Sync {
    /// Reads the persisted ids. A store that was never written is empty.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on I/O or decoding failure.
    fn load(&self) -> Result<BTreeSet<FenceId>, StoreError>;

    /// Replaces the persisted ids with `ids`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on I/O or encoding failure.
    fn save(&self, ids: &BTreeSet<FenceId>) -> Result<(), StoreError>;
}

/// In-memory store. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdStore {
    ids: Arc<Mutex<BTreeSet<FenceId>>>,
}

impl MemoryIdStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `ids`.
    #[must_use]
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<FenceId>,
    {
        Self {
            ids: Arc::new(Mutex::new(ids.into_iter().map(Into::into).collect())),
        }
    }

    /// Snapshot of the stored ids.
    #[must_use]
    pub fn ids(&self) -> BTreeSet<FenceId> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl FenceIdStore for MemoryIdStore {
    fn load(&self) -> Result<BTreeSet<FenceId>, StoreError> {
        Ok(self.ids())
    }

    fn save(&self, ids: &BTreeSet<FenceId>) -> Result<(), StoreError> {
        *self.ids.lock().unwrap_or_else(PoisonError::into_inner) = ids.clone();
        Ok(())
    }
}

/// File store holding a JSON array of ids.
///
/// Writes go to a sibling temp file which is synced and renamed over the
/// target, so a crash leaves either the old or the new set.
#[derive(Debug, Clone)]
pub struct JsonFileIdStore {
    path: PathBuf,
}

impl JsonFileIdStore {
    /// Creates a store at `path`. The file is created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl FenceIdStore for JsonFileIdStore {
    fn load(&self) -> Result<BTreeSet<FenceId>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
            message: format!("{}: {e}", self.path.display()),
        })
    }

    fn save(&self, ids: &BTreeSet<FenceId>) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(ids).map_err(|e| StoreError::Serialization {
            message: e.to_string(),
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.temp_path();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
