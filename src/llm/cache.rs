//! Content-addressed prompt cache with LRU eviction and a TTL.

use crate::domain::CacheConfig;
use crate::error::Result;
use crate::store::write_json_atomic;
use crate::utils::stable_key;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use tracing::{debug, warn};

const CACHE_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    response: String,
    stored_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    /// Least recently used first.
    entries: Vec<CacheEntry>,
}

pub struct PromptCache {
    entries: LruCache<String, CacheEntry>,
    ttl: Duration,
    stats: CacheStats,
}

impl PromptCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: LruCache::new(capacity), ttl, stats: CacheStats::default() }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, ttl_from_secs(config.ttl_secs))
    }

    /// Cache key for one prompt.
    ///
    /// `prompt_fingerprint` covers the whole request text, `conversation_id`
    /// the session it belongs to and `model_hash` every parameter that changes
    /// what the model would answer.
    pub fn key(prompt_fingerprint: &str, conversation_id: &str, model_hash: &str) -> String {
        stable_key([prompt_fingerprint, conversation_id, model_hash])
    }

    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if now - entry.stored_at <= self.ttl => {
                self.stats.hits += 1;
                return Some(entry.response.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.pop(key);
            self.stats.expirations += 1;
        }
        self.stats.misses += 1;
        None
    }

    pub fn insert(&mut self, key: String, response: String, now: DateTime<Utc>) {
        let entry = CacheEntry { key: key.clone(), response, stored_at: now };
        if let Some((old_key, _)) = self.entries.push(key.clone(), entry) {
            if old_key != key {
                self.stats.evictions += 1;
            }
        }
        self.stats.inserts += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = CacheFile {
            version: CACHE_FILE_VERSION,
            entries: self.entries.iter().rev().map(|(_, entry)| entry.clone()).collect(),
        };
        write_json_atomic(path, &file)?;
        debug!(path = %path.display(), entries = file.entries.len(), "prompt cache saved");
        Ok(())
    }

    /// Load a saved cache, dropping entries already past the TTL.
    ///
    /// A missing file yields an empty cache. A file that cannot be parsed is
    /// logged and ignored.
    pub fn load(path: &Path, capacity: usize, ttl: Duration, now: DateTime<Utc>) -> Result<Self> {
        let mut cache = Self::new(capacity, ttl);
        if !path.exists() {
            return Ok(cache);
        }
        let text = std::fs::read_to_string(path)?;
        let file: CacheFile = match serde_json::from_str(&text) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), "ignoring unreadable prompt cache: {e}");
                return Ok(cache);
            }
        };
        if file.version != CACHE_FILE_VERSION {
            warn!(path = %path.display(), version = file.version, "ignoring prompt cache with unknown version");
            return Ok(cache);
        }
        for entry in file.entries {
            if now - entry.stored_at <= ttl {
                cache.entries.push(entry.key.clone(), entry);
            }
        }
        Ok(cache)
    }
}

pub fn ttl_from_secs(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn hit_after_insert() {
        let mut cache = PromptCache::new(4, Duration::hours(1));
        let key = PromptCache::key("prompt", "file:a.py", "model");
        assert_eq!(cache.get(&key, now()), None);
        cache.insert(key.clone(), "answer".into(), now());
        assert_eq!(cache.get(&key, now()).as_deref(), Some("answer"));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn key_changes_with_each_component() {
        let base = PromptCache::key("p", "c", "m");
        assert_ne!(base, PromptCache::key("p2", "c", "m"));
        assert_ne!(base, PromptCache::key("p", "c2", "m"));
        assert_ne!(base, PromptCache::key("p", "c", "m2"));
    }

    #[test]
    fn expired_entries_miss_and_are_dropped() {
        let mut cache = PromptCache::new(4, Duration::minutes(5));
        cache.insert("k".into(), "v".into(), now());
        assert_eq!(cache.get("k", now() + Duration::minutes(6)), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let mut cache = PromptCache::new(2, Duration::hours(1));
        cache.insert("a".into(), "1".into(), now());
        cache.insert("b".into(), "2".into(), now());
        cache.get("a", now());
        cache.insert("c".into(), "3".into(), now());

        assert_eq!(cache.get("b", now()), None);
        assert!(cache.get("a", now()).is_some());
        assert!(cache.get("c", now()).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn replacing_a_key_is_not_an_eviction() {
        let mut cache = PromptCache::new(2, Duration::hours(1));
        cache.insert("a".into(), "1".into(), now());
        cache.insert("a".into(), "2".into(), now());
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("a", now()).as_deref(), Some("2"));
    }

    #[test]
    fn save_and_load_keep_recency_and_drop_expired() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("_cache").join("prompt-cache.json");

        let mut cache = PromptCache::new(3, Duration::hours(1));
        cache.insert("old".into(), "x".into(), now() - Duration::hours(2));
        cache.insert("a".into(), "1".into(), now());
        cache.insert("b".into(), "2".into(), now());
        cache.save(&path).unwrap();

        let mut loaded = PromptCache::load(&path, 2, Duration::hours(1), now()).unwrap();
        assert_eq!(loaded.len(), 2);
        // "b" was most recent; adding one more must evict "a".
        loaded.insert("c".into(), "3".into(), now());
        assert_eq!(loaded.get("a", now()), None);
        assert_eq!(loaded.get("b", now()).as_deref(), Some("2"));
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prompt-cache.json");
        std::fs::write(&path, "not json").unwrap();
        let cache = PromptCache::load(&path, 2, Duration::hours(1), now()).unwrap();
        assert!(cache.is_empty());
    }
}
