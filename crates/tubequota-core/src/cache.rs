//! Response cache keyed by endpoint plus normalized request parameters.
//!
//! Entries live in memory and, when a root directory is configured, as one
//! JSON file per key under `<root>/<endpoint>/<digest>.json` so they survive
//! restarts. An entry is valid iff `now < fetched_at + ttl_secs`.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::domain::UtcDateTime;
use crate::persistence::PersistenceError;

const HOUR_SECS: u64 = 3_600;

/// Whether cached entries may be read for a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Serve fresh entries; on miss fetch and store. (Default)
    #[default]
    Use,
    /// Skip lookups but still store what was fetched.
    Refresh,
}

impl CacheMode {
    pub fn reads(self) -> bool {
        matches!(self, Self::Use)
    }
}

/// Freshness classes for cached responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTtl {
    Hour,
    Day,
    Week,
    /// 30 days.
    Month,
}

impl CacheTtl {
    pub fn duration(self) -> Duration {
        let hours = match self {
            Self::Hour => 1,
            Self::Day => 24,
            Self::Week => 24 * 7,
            Self::Month => 24 * 30,
        };
        Duration::from_secs(hours * HOUR_SECS)
    }
}

/// Deterministic cache key: `"{endpoint}:{sha256(endpoint + sorted params)}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    endpoint: String,
    digest: String,
}

impl CacheKey {
    pub fn new(endpoint: &str, params: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(endpoint.as_bytes());
        for (name, value) in params {
            hasher.update(b"\n");
            hasher.update(name.trim().as_bytes());
            hasher.update(b"=");
            hasher.update(value.trim().as_bytes());
        }

        Self {
            endpoint: sanitize_segment(endpoint),
            digest: hex::encode(hasher.finalize()),
        }
    }

    /// Build a key from unordered `(name, value)` pairs.
    pub fn from_pairs<'a, I, V>(endpoint: &str, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Into<String>,
    {
        let params = pairs
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value.into()))
            .collect();
        Self::new(endpoint, &params)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn file_path(&self, root: &Path) -> PathBuf {
        root.join(&self.endpoint).join(format!("{}.json", self.digest))
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.endpoint, self.digest)
    }
}

fn sanitize_segment(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// One cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: serde_json::Value,
    pub fetched_at: UtcDateTime,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn expires_at(&self) -> UtcDateTime {
        self.fetched_at
            .saturating_add(Duration::from_secs(self.ttl_secs))
    }

    pub fn is_fresh(&self, now: UtcDateTime) -> bool {
        now < self.expires_at()
    }
}

/// Thread-safe two-level (memory + disk) response cache.
#[derive(Clone)]
pub struct CacheStore {
    entries: Arc<tokio::sync::RwLock<HashMap<String, CacheEntry>>>,
    root: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            root: None,
            clock,
        }
    }

    pub fn persistent(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::in_memory(clock)
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Fresh payload for `key`, or `None` on miss, expiry or an unreadable entry.
    pub async fn get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        let now = self.clock.now();
        let rendered = key.to_string();

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&rendered) {
                if entry.is_fresh(now) {
                    return Some(entry.payload.clone());
                }
            }
        }

        let root = self.root.as_ref()?;
        let path = key.file_path(root);
        let entry = read_entry(&path).await?;
        if !entry.is_fresh(now) {
            return None;
        }

        let payload = entry.payload.clone();
        self.entries.write().await.insert(rendered, entry);
        Some(payload)
    }

    /// Typed lookup; a payload that no longer decodes counts as a miss.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let payload = self.get(key).await?;
        match serde_json::from_value(payload) {
            Ok(value) => Some(value),
            Err(error) => {
                debug!(key = %key, error = %error, "cached payload no longer decodes");
                None
            }
        }
    }

    pub async fn put(
        &self,
        key: &CacheKey,
        payload: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), PersistenceError> {
        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            fetched_at: self.clock.now(),
            ttl_secs: ttl.as_secs(),
        };

        if let Some(root) = &self.root {
            let encoded = serde_json::to_vec(&entry)?;
            let path = key.file_path(root);
            tokio::task::spawn_blocking(move || crate::persistence::write_atomic(&path, &encoded))
                .await
                .map_err(|error| {
                    PersistenceError::io(root, io::Error::new(io::ErrorKind::Other, error))
                })??;
        }

        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    pub async fn put_as<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> Result<(), PersistenceError> {
        let payload = serde_json::to_value(value)?;
        self.put(key, payload, ttl).await
    }

    /// Remove every entry whose key starts with `prefix` (all entries when `None`).
    pub async fn clear(&self, prefix: Option<&str>) -> Result<usize, PersistenceError> {
        let matches = |key: &str| prefix.map_or(true, |prefix| key.starts_with(prefix));

        let mut removed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|key, _| !matches(key));
            before - entries.len()
        };

        if let Some(root) = &self.root {
            let on_disk = self.disk_entries(root).await?;
            let mut disk_removed = 0;
            for (key, path) in on_disk {
                if matches(&key) {
                    remove_file(&path).await?;
                    disk_removed += 1;
                }
            }
            removed = removed.max(disk_removed);
        }

        Ok(removed)
    }

    /// Drop entries that are no longer fresh, in memory and on disk.
    pub async fn purge_expired(&self) -> Result<usize, PersistenceError> {
        let now = self.clock.now();

        let mut purged = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, entry| entry.is_fresh(now));
            before - entries.len()
        };

        if let Some(root) = &self.root {
            let mut disk_purged = 0;
            for (_, path) in self.disk_entries(root).await? {
                let stale = read_entry(&path)
                    .await
                    .map_or(true, |entry| !entry.is_fresh(now));
                if stale {
                    remove_file(&path).await?;
                    disk_purged += 1;
                }
            }
            purged = purged.max(disk_purged);
        }

        Ok(purged)
    }

    /// Entries held in memory, fresh or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn disk_entries(&self, root: &Path) -> Result<Vec<(String, PathBuf)>, PersistenceError> {
        let mut found = Vec::new();
        let mut endpoints = match tokio::fs::read_dir(root).await {
            Ok(dir) => dir,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(found),
            Err(error) => return Err(PersistenceError::io(root, error)),
        };

        while let Some(endpoint_dir) = endpoints
            .next_entry()
            .await
            .map_err(|error| PersistenceError::io(root, error))?
        {
            let endpoint_path = endpoint_dir.path();
            if !endpoint_path.is_dir() {
                continue;
            }
            let endpoint = endpoint_dir.file_name().to_string_lossy().into_owned();
            let mut files = tokio::fs::read_dir(&endpoint_path)
                .await
                .map_err(|error| PersistenceError::io(&endpoint_path, error))?;

            while let Some(file) = files
                .next_entry()
                .await
                .map_err(|error| PersistenceError::io(&endpoint_path, error))?
            {
                let path = file.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                if let Some(digest) = path.file_stem().and_then(|stem| stem.to_str()) {
                    found.push((format!("{endpoint}:{digest}"), path.clone()));
                }
            }
        }

        Ok(found)
    }
}

async fn read_entry(path: &Path) -> Option<CacheEntry> {
    let raw = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&raw) {
        Ok(entry) => Some(entry),
        Err(error) => {
            warn!(path = %path.display(), error = %error, "ignoring unreadable cache entry");
            None
        }
    }
}

async fn remove_file(path: &Path) -> Result<(), PersistenceError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(PersistenceError::io(path, error)),
    }
}
