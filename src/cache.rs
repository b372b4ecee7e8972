//! Bounded LRU response cache backed by one file per key.
//!
//! The in-memory index only tracks recency; payload bytes live on disk under
//! `cache_dir`. Index and directory are kept 1:1 and every operation runs under
//! a single lock, so operations are atomic relative to each other. A caller that
//! does `exists` followed by `get` can still see the entry evicted in between.

use bytes::Bytes;
use log::{debug, warn};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::ProxyError;

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

pub struct Cache {
    cache_dir: PathBuf,
    max_size: NonZeroUsize,
    index: Mutex<LruCache<String, ()>>,
    stats: CacheStats,
}

impl Cache {
    /// Opens the cache directory, creating it or truncating any files left by a previous run.
    pub async fn open(cache_dir: impl Into<PathBuf>, max_size: usize) -> Result<Self, ProxyError> {
        let cache_dir = cache_dir.into();
        let max_size = NonZeroUsize::new(max_size)
            .ok_or_else(|| ProxyError::Config("cache capacity must be greater than zero".to_string()))?;

        let exists = fs::try_exists(&cache_dir).await?;
        let cache = Self {
            cache_dir,
            max_size,
            index: Mutex::new(LruCache::new(max_size)),
            stats: CacheStats::default(),
        };

        if exists {
            cache.clear().await?;
        } else {
            fs::create_dir_all(&cache.cache_dir).await?;
        }

        Ok(cache)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn capacity(&self) -> usize {
        self.max_size.get()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.index.lock().await.contains(key)
    }

    /// Returns the payload for `key` and marks it most recently used.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, ProxyError> {
        let mut index = self.index.lock().await;
        if index.get(key).is_none() {
            return Ok(None);
        }

        let path = self.path_for(key);
        let payload = fs::read(&path).await.map_err(|e| {
            ProxyError::Cache(format!("failed to read {}: {}", path.display(), e))
        })?;
        Ok(Some(Bytes::from(payload)))
    }

    /// Stores `value` under `key`, evicting the least recently used entry when full.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), ProxyError> {
        let mut index = self.index.lock().await;

        if index.contains(key) {
            index.promote(key);
        } else if index.len() >= self.max_size.get() {
            if let Some((oldest, _)) = index.pop_lru() {
                debug!("Evicting least recently used cache entry {}", oldest);
                self.remove_file(&self.path_for(&oldest)).await;
                self.stats.record_eviction();
            }
        }

        let path = self.path_for(key);
        fs::write(&path, value).await.map_err(|e| {
            ProxyError::Cache(format!("failed to write {}: {}", path.display(), e))
        })?;
        index.put(key.to_string(), ());
        Ok(())
    }

    /// Removes every backing file and empties the index.
    pub async fn clear(&self) -> Result<(), ProxyError> {
        let mut index = self.index.lock().await;

        let mut entries = fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            self.remove_file(&entry.path()).await;
        }
        index.clear();
        Ok(())
    }

    async fn remove_file(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            warn!("Error removing cache file {}: {}", path.display(), e);
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.cache_dir.join(file_name_for(key))
    }
}

/// On-disk file name for a key: every path separator becomes `_`.
pub fn file_name_for(key: &str) -> String {
    key.chars()
        .map(|c| if std::path::is_separator(c) { '_' } else { c })
        .collect()
}
