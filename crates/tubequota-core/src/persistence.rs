//! Durable state for the quota ledger, phase cursors and collection results.
//!
//! Records are written as `{"version": N, "data": ...}` envelopes so that a
//! cursor or ledger written by an incompatible build is rejected on load
//! instead of being misread. Writes go through a temp file plus rename.

use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("state i/o failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("state file '{path}' is not valid JSON: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("state file '{path}' has schema version {found}, expected {expected}")]
    IncompatibleVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Load/save contract shared by every persisted record.
pub trait StateStore<T>: Send + Sync {
    fn load(&self) -> Result<Option<T>, PersistenceError>;
    fn save(&self, value: &T) -> Result<(), PersistenceError>;
    fn clear(&self) -> Result<(), PersistenceError>;
}

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    version: u32,
    data: serde_json::Value,
}

/// Versioned JSON file store.
#[derive(Debug)]
pub struct JsonFileStore<T> {
    path: PathBuf,
    version: u32,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>, version: u32) -> Self {
        Self {
            path: path.into(),
            version,
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> StateStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>, PersistenceError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(PersistenceError::io(&self.path, error)),
        };

        let envelope: EnvelopeIn =
            serde_json::from_slice(&raw).map_err(|source| PersistenceError::Decode {
                path: self.path.clone(),
                source,
            })?;
        if envelope.version != self.version {
            return Err(PersistenceError::IncompatibleVersion {
                path: self.path.clone(),
                found: envelope.version,
                expected: self.version,
            });
        }

        serde_json::from_value(envelope.data)
            .map(Some)
            .map_err(|source| PersistenceError::Decode {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&self, value: &T) -> Result<(), PersistenceError> {
        let encoded = serde_json::to_vec_pretty(&EnvelopeOut {
            version: self.version,
            data: value,
        })?;
        write_atomic(&self.path, &encoded)
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(PersistenceError::io(&self.path, error)),
        }
    }
}

/// Process-local store; state vanishes with the process.
#[derive(Debug)]
pub struct MemoryStore<T> {
    value: Mutex<Option<T>>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
        }
    }
}

impl<T> StateStore<T> for MemoryStore<T>
where
    T: Clone + Send,
{
    fn load(&self) -> Result<Option<T>, PersistenceError> {
        Ok(self
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, value: &T) -> Result<(), PersistenceError> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Write `bytes` to a sibling temp file then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|error| PersistenceError::io(parent, error))?;
        }
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("state"));
    let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    fs::write(&temp_path, bytes).map_err(|error| PersistenceError::io(&temp_path, error))?;
    fs::rename(&temp_path, path).map_err(|error| {
        let _ = fs::remove_file(&temp_path);
        PersistenceError::io(path, error)
    })
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        units: u64,
    }

    #[test]
    fn json_store_round_trips_and_clears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::<Counter>::new(dir.path().join("nested/counter.json"), 1);

        assert_eq!(store.load().expect("load"), None);
        store.save(&Counter { units: 42 }).expect("save");
        assert_eq!(store.load().expect("load"), Some(Counter { units: 42 }));

        store.clear().expect("clear");
        store.clear().expect("clearing twice is fine");
        assert_eq!(store.load().expect("load"), None);
    }

    #[test]
    fn json_store_rejects_other_schema_versions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("counter.json");
        JsonFileStore::<Counter>::new(&path, 1)
            .save(&Counter { units: 1 })
            .expect("save");

        let err = JsonFileStore::<Counter>::new(&path, 2)
            .load()
            .expect_err("version mismatch must fail");
        assert!(matches!(
            err,
            PersistenceError::IncompatibleVersion {
                found: 1,
                expected: 2,
                ..
            }
        ));
    }

    #[test]
    fn json_store_reports_corrupt_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("counter.json");
        fs::write(&path, b"{not json").expect("write");

        let err = JsonFileStore::<Counter>::new(&path, 1)
            .load()
            .expect_err("corrupt must fail");
        assert!(matches!(err, PersistenceError::Decode { .. }));
    }

    #[test]
    fn memory_store_holds_latest_value() {
        let store = MemoryStore::new();
        store.save(&Counter { units: 3 }).expect("save");
        store.save(&Counter { units: 4 }).expect("save");
        assert_eq!(store.load().expect("load"), Some(Counter { units: 4 }));
    }
}
