//! Snapshot file for persisting the response cache between invocations
//!
//! The snapshot is a JSON document shared with other settings of the tool:
//!
//! ```json
//! {"Cache": {"GetServicePlans:<guid>": [...]}, "Timestamp": {"LastUpdated": 1700000000}}
//! ```
//!
//! The timestamp covers the whole `Cache` section: once it is older than the
//! timeout every entry is dropped. Top-level keys other than `Cache` and
//! `Timestamp` are kept untouched on save.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{json, Map, Value};
use thiserror::Error;

use super::store::{CachedValue, ResponseCache};

const CACHE_SECTION: &str = "Cache";
const TIMESTAMP_SECTION: &str = "Timestamp";
const LAST_UPDATED: &str = "LastUpdated";

/// Errors raised while reading or writing the snapshot file
#[derive(Debug, Error)]
pub enum CacheError {
    /// File exists but could not be read or written
    #[error("could not access cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File content is not a JSON object
    #[error("cache file {path} is corrupted: {source}")]
    CorruptFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// `Cache` section is present but is not an object
    #[error("cache file {0} has an invalid 'Cache' section")]
    InvalidSection(PathBuf),

    /// Entry with a known key prefix does not match its type
    #[error("could not read cache entry '{key}': {source}")]
    CorruptEntry {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Cache content could not be serialized
    #[error("could not serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSON file holding a snapshot of the response cache
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
    /// Maximum snapshot age in seconds
    timeout_secs: i64,
}

impl SnapshotFile {
    pub fn new(path: PathBuf, timeout_secs: i64) -> Self {
        Self { path, timeout_secs }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file as a JSON object; `None` when it does not exist
    fn read_document(&self) -> Result<Option<Map<String, Value>>, CacheError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| CacheError::CorruptFile {
                path: self.path.clone(),
                source,
            })
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<(), CacheError> {
        let io_error = |source| CacheError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let json = serde_json::to_string(document)?;
        fs::write(&self.path, json).map_err(io_error)
    }

    /// Loads fresh snapshot entries into `cache` and returns how many were loaded
    ///
    /// A missing file, a missing or unreadable timestamp and a stale snapshot all
    /// load nothing. A corrupted file or entry is an error.
    pub fn load_into(&self, cache: &ResponseCache) -> Result<usize, CacheError> {
        self.load_at(cache, Utc::now().timestamp())
    }

    /// Loads as of `now` (seconds since the epoch); a snapshot exactly
    /// `timeout_secs` old is still fresh
    fn load_at(&self, cache: &ResponseCache, now: i64) -> Result<usize, CacheError> {
        let Some(mut document) = self.read_document()? else {
            tracing::debug!(path = %self.path.display(), "Cache file not found, starting empty");
            return Ok(0);
        };

        let last_updated = document
            .get(TIMESTAMP_SECTION)
            .and_then(|timestamp| timestamp.get(LAST_UPDATED))
            .and_then(Value::as_i64);
        let Some(last_updated) = last_updated else {
            tracing::debug!("Cache file has no valid timestamp, cache will be ignored");
            return Ok(0);
        };

        let age = now - last_updated;
        if age > self.timeout_secs {
            tracing::debug!(age, timeout = self.timeout_secs, "Cache is outdated and will be ignored");
            return Ok(0);
        }
        tracing::debug!(age, timeout = self.timeout_secs, "Cache is fresh");

        let entries = match document.remove(CACHE_SECTION) {
            None => return Ok(0),
            Some(Value::Object(entries)) => entries,
            Some(_) => return Err(CacheError::InvalidSection(self.path.clone())),
        };

        let mut loaded = 0;
        for (key, value) in entries {
            match CachedValue::from_json(&key, value) {
                Ok(Some(value)) => {
                    cache.set(key, value);
                    loaded += 1;
                }
                Ok(None) => tracing::debug!(key = %key, "Skipping unknown cache entry"),
                Err(source) => return Err(CacheError::CorruptEntry { key, source }),
            }
        }

        tracing::debug!(loaded, "Loaded cache entries");
        Ok(loaded)
    }

    /// Writes every entry of `cache` to the file and stamps it with the current time
    pub fn save_from(&self, cache: &ResponseCache) -> Result<(), CacheError> {
        let mut document = self.read_document()?.unwrap_or_default();

        document.insert(CACHE_SECTION.to_string(), serde_json::to_value(cache.all())?);
        document.insert(
            TIMESTAMP_SECTION.to_string(),
            json!({ LAST_UPDATED: Utc::now().timestamp() }),
        );

        self.write_document(&document)?;
        tracing::debug!(path = %self.path.display(), entries = cache.len(), "Saved cache");
        Ok(())
    }

    /// Empties the `Cache` section of an existing file
    pub fn clear_persisted(&self) -> Result<(), CacheError> {
        let Some(mut document) = self.read_document()? else {
            tracing::trace!("Cache file does not exist, nothing to clear");
            return Ok(());
        };

        document.insert(CACHE_SECTION.to_string(), Value::Object(Map::new()));
        self.write_document(&document)
    }
}

/// Response cache bound to the lifetime of one command
///
/// With persistence enabled the snapshot is loaded on open and written back on
/// close. When the session is dropped without `close`, the snapshot is still
/// written and failures are logged.
#[derive(Debug)]
pub struct CacheSession {
    cache: ResponseCache,
    snapshot: Option<SnapshotFile>,
    closed: bool,
}

impl CacheSession {
    /// Opens a session backed by `snapshot`
    ///
    /// When `persistent` is false the cached entries of the file are cleared and
    /// the session only lives in memory. Failing to clear is logged, not fatal.
    pub fn open(snapshot: SnapshotFile, persistent: bool) -> Result<Self, CacheError> {
        let cache = ResponseCache::new();
        if persistent {
            snapshot.load_into(&cache)?;
            return Ok(Self {
                cache,
                snapshot: Some(snapshot),
                closed: false,
            });
        }

        if let Err(e) = snapshot.clear_persisted() {
            tracing::warn!("Could not clear persisted cache: {}", e);
        }
        Ok(Self::in_memory_with(cache))
    }

    /// Session without any file
    pub fn in_memory() -> Self {
        Self::in_memory_with(ResponseCache::new())
    }

    fn in_memory_with(cache: ResponseCache) -> Self {
        Self {
            cache,
            snapshot: None,
            closed: false,
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Whether entries outlive the process
    pub fn is_persistent(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Writes the snapshot if the session is persistent
    pub fn close(mut self) -> Result<(), CacheError> {
        self.flush()
    }

    fn flush(&mut self) -> Result<(), CacheError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match &self.snapshot {
            Some(snapshot) => snapshot.save_from(&self.cache),
            None => Ok(()),
        }
    }
}

impl Drop for CacheSession {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!("Could not save cache: {}", e);
        }
    }
}
