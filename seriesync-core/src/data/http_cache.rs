//! HTTP response cache.
//!
//! Layout: `{cache_dir}/{blake3(key)}.json`, one entry per cached response.
//!
//! Every 2xx body is cached, including bodies a provider later rejects (quota
//! notes, error payloads). The synchronizer evicts entries after a transient
//! failure so a cached failure is not replayed on the next run.

use super::provider::DataError;
use crate::clock::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A cached response body and when it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub body: String,
}

/// Get/put/expire service for raw response bodies.
pub trait ResponseCache: Send + Sync {
    /// A live entry for `key`, ignoring entries older than the cache's max age.
    fn get(&self, key: &str) -> Result<Option<CachedResponse>, DataError>;

    fn put(&self, key: &str, body: &str) -> Result<(), DataError>;

    /// Remove every entry stored at or before `cutoff`. Returns how many were removed.
    fn evict_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, DataError>;
}

fn is_expired(entry: &CachedResponse, now: DateTime<Utc>, max_age: Option<Duration>) -> bool {
    match max_age.and_then(|age| chrono::Duration::from_std(age).ok()) {
        Some(age) => entry.stored_at + age < now,
        None => false,
    }
}

/// On-disk response cache.
pub struct DiskResponseCache {
    cache_dir: PathBuf,
    clock: Arc<dyn Clock>,
    max_age: Option<Duration>,
}

impl DiskResponseCache {
    pub fn new(cache_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            clock,
            max_age: None,
        }
    }

    /// Treat entries older than `max_age` as misses.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let hash = blake3::hash(key.as_bytes()).to_hex();
        self.cache_dir.join(format!("{hash}.json"))
    }

    fn read_entry(path: &Path) -> Result<CachedResponse, DataError> {
        let content = fs::read_to_string(path)
            .map_err(|e| DataError::Cache(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| DataError::Cache(format!("parse {}: {e}", path.display())))
    }
}

impl ResponseCache for DiskResponseCache {
    fn get(&self, key: &str) -> Result<Option<CachedResponse>, DataError> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let entry = match Self::read_entry(&path) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "dropping unreadable cache entry");
                let _ = fs::remove_file(&path);
                return Ok(None);
            }
        };

        if entry.key != key || is_expired(&entry, self.clock.wall(), self.max_age) {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn put(&self, key: &str, body: &str) -> Result<(), DataError> {
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| DataError::Cache(format!("failed to create dir: {e}")))?;

        let entry = CachedResponse {
            key: key.to_string(),
            stored_at: self.clock.wall(),
            body: body.to_string(),
        };
        let json = serde_json::to_vec(&entry)
            .map_err(|e| DataError::Cache(format!("entry serialization: {e}")))?;

        let path = self.entry_path(key);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| DataError::Cache(format!("write entry: {e}")))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Cache(format!("atomic rename failed: {e}"))
        })
    }

    fn evict_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, DataError> {
        if !self.cache_dir.exists() {
            return Ok(0);
        }

        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| DataError::Cache(format!("read dir: {e}")))?;

        let mut removed = 0;
        for entry in entries {
            let path = entry
                .map_err(|e| DataError::Cache(format!("dir entry: {e}")))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let stale = match Self::read_entry(&path) {
                Ok(cached) => cached.stored_at <= cutoff,
                Err(_) => true,
            };
            if stale {
                fs::remove_file(&path)
                    .map_err(|e| DataError::Cache(format!("remove entry: {e}")))?;
                removed += 1;
            }
        }

        tracing::debug!(removed, %cutoff, "evicted cached responses");
        Ok(removed)
    }
}

/// In-process response cache.
pub struct MemoryResponseCache {
    clock: Arc<dyn Clock>,
    max_age: Option<Duration>,
    entries: Mutex<HashMap<String, CachedResponse>>,
}

impl MemoryResponseCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            max_age: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResponseCache for MemoryResponseCache {
    fn get(&self, key: &str) -> Result<Option<CachedResponse>, DataError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .get(key)
            .filter(|e| !is_expired(e, self.clock.wall(), self.max_age))
            .cloned())
    }

    fn put(&self, key: &str, body: &str) -> Result<(), DataError> {
        let entry = CachedResponse {
            key: key.to_string(),
            stored_at: self.clock.wall(),
            body: body.to_string(),
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry);
        Ok(())
    }

    fn evict_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, DataError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| e.stored_at > cutoff);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::NaiveDate;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()))
    }

    #[test]
    fn disk_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskResponseCache::new(dir.path(), clock());

        cache.put("https://example.test/a", "{\"ok\":true}").unwrap();
        let hit = cache.get("https://example.test/a").unwrap().unwrap();
        assert_eq!(hit.body, "{\"ok\":true}");
        assert!(cache.get("https://example.test/b").unwrap().is_none());
    }

    #[test]
    fn disk_entries_expire_after_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        let cache =
            DiskResponseCache::new(dir.path(), clock.clone()).with_max_age(Duration::from_secs(60));

        cache.put("k", "v").unwrap();
        clock.advance(Duration::from_secs(61));
        assert!(cache.get("k").unwrap().is_none());
    }

    #[test]
    fn disk_eviction_removes_only_older_entries() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        let cache = DiskResponseCache::new(dir.path(), clock.clone());

        cache.put("old", "1").unwrap();
        clock.advance(Duration::from_secs(10));
        let cutoff = clock.wall();
        clock.advance(Duration::from_secs(1));
        cache.put("new", "2").unwrap();

        assert_eq!(cache.evict_older_than(cutoff).unwrap(), 1);
        assert!(cache.get("old").unwrap().is_none());
        assert!(cache.get("new").unwrap().is_some());
    }

    #[test]
    fn corrupt_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskResponseCache::new(dir.path(), clock());
        cache.put("k", "v").unwrap();

        let path = cache.entry_path("k");
        fs::write(&path, "not json").unwrap();
        assert!(cache.get("k").unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn memory_eviction_at_now_clears_everything_stored_earlier() {
        let clock = clock();
        let cache = MemoryResponseCache::new(clock.clone());
        cache.put("a", "1").unwrap();
        cache.put("b", "2").unwrap();
        clock.advance(Duration::from_millis(1));

        assert_eq!(cache.evict_older_than(clock.wall()).unwrap(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn eviction_includes_entries_stored_at_the_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        let disk = DiskResponseCache::new(dir.path(), clock.clone());
        let memory = MemoryResponseCache::new(clock.clone());

        disk.put("k", "v").unwrap();
        memory.put("k", "v").unwrap();

        assert_eq!(disk.evict_older_than(clock.wall()).unwrap(), 1);
        assert_eq!(memory.evict_older_than(clock.wall()).unwrap(), 1);
        assert!(disk.get("k").unwrap().is_none());
        assert!(memory.is_empty());
    }
}
