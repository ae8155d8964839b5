//! # Image Cache
//!
//! Two-tier store coordinating the memory and disk providers: read-through,
//! write-through, delete-on-stale-read and the coarse disk cleanup pass.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::io;
use tracing::{debug, info, warn};

use crate::cache::key::KeyTransformer;
use crate::cache::providers::{CacheProvider, DiskEntry, FileCache, MemoryCache, MemoryEntry};
use crate::cache::types::{
    CacheConfig, CacheKey, CacheResult, CacheStats, CacheTier, CachedImage, Freshness,
    ImageSource,
};
use crate::cache::utils::is_stale;
use crate::decode::{DecodedImage, decode_image_async};

/// Cache handling both memory and file tiers
#[derive(Clone)]
pub struct ImageCache {
    memory_cache: MemoryCache,
    file_cache: FileCache,
    keys: KeyTransformer,
    config: Arc<CacheConfig>,
}

impl ImageCache {
    /// Create a new cache with the specified configuration
    pub async fn new(config: CacheConfig) -> io::Result<Self> {
        if config.max_memory_cache_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "memory cache size must be greater than zero",
            ));
        }

        let cache_dir = config.disk_path();
        let config = Arc::new(config);

        let memory_cache = MemoryCache::new(config.max_memory_cache_size);
        let file_cache = FileCache::new(cache_dir, config.enabled && config.disk_cache_enabled);

        // Initialize the cache directory in advance
        file_cache.ensure_initialized().await?;

        debug!(
            dir = ?file_cache.cache_dir(),
            disk = file_cache.is_enabled(),
            "Image cache initialized"
        );

        Ok(Self {
            memory_cache,
            file_cache,
            keys: KeyTransformer::new(config.key_memo_capacity),
            config,
        })
    }

    /// Key for a URL string
    pub fn key_for(&self, url: &str) -> CacheKey {
        self.keys.key_for(url)
    }

    /// Get configuration reference
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look `key` up in the memory tier, then the disk tier.
    ///
    /// Stale entries are deleted from both tiers and reported as a miss when
    /// `freshness` requires it. Tier failures are logged and degrade to a miss.
    pub async fn fetch(
        &self,
        key: &CacheKey,
        freshness: Freshness,
        tier: CacheTier,
    ) -> Option<(CachedImage, ImageSource)> {
        if !self.config.enabled {
            return None;
        }

        if tier.includes_memory() {
            match self.memory_cache.get(key).await {
                Ok(Some(entry)) => {
                    if self.rejects_as_stale(entry.last_accessed(), freshness) {
                        debug!(key = %key, "Memory cache entry is stale, deleting");
                        self.delete(key).await;
                        return None;
                    }
                    entry.touch();
                    return Some((entry.to_cached_image(key), ImageSource::Memory));
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Memory cache lookup failed"),
            }
        }

        if tier.includes_disk() && self.file_cache.is_enabled() {
            return self.fetch_from_disk(key, freshness).await;
        }

        None
    }

    async fn fetch_from_disk(
        &self,
        key: &CacheKey,
        freshness: Freshness,
    ) -> Option<(CachedImage, ImageSource)> {
        let entry = match self.file_cache.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Disk cache lookup failed, treating as miss");
                return None;
            }
        };

        if self.rejects_as_stale(entry.last_accessed, freshness) {
            debug!(key = %key, "Disk cache entry is stale, deleting");
            self.delete(key).await;
            return None;
        }

        let decoded = match decode_image_async(entry.data.clone()).await {
            Ok(decoded) => Arc::new(decoded),
            Err(e) => {
                warn!(key = %key, error = %e, "Undecodable disk cache entry, removing");
                self.delete(key).await;
                return None;
            }
        };

        self.touch(key).await;

        let memory_entry = MemoryEntry::new(entry.data, decoded, SystemTime::now());
        let image = memory_entry.to_cached_image(key);
        if let Err(e) = self.memory_cache.put(key.clone(), memory_entry).await {
            warn!(key = %key, error = %e, "Failed to repopulate memory cache");
        }

        Some((image, ImageSource::Disk))
    }

    fn rejects_as_stale(&self, last_accessed: SystemTime, freshness: Freshness) -> bool {
        freshness == Freshness::RequireFresh
            && is_stale(last_accessed, self.config.invalidation_timeout)
    }

    /// Store an already decoded image in both tiers.
    ///
    /// The memory tier is always updated; a disk write failure is returned
    /// after the memory tier already holds the entry.
    pub async fn store(
        &self,
        key: CacheKey,
        data: Bytes,
        image: Arc<DecodedImage>,
    ) -> CacheResult<CachedImage> {
        let now = SystemTime::now();
        let memory_entry = MemoryEntry::new(data.clone(), image, now);
        let snapshot = memory_entry.to_cached_image(&key);

        if !self.config.enabled {
            return Ok(snapshot);
        }

        self.memory_cache.put(key.clone(), memory_entry).await?;
        self.file_cache
            .put(
                key,
                DiskEntry {
                    data,
                    last_accessed: now,
                },
            )
            .await?;

        Ok(snapshot)
    }

    /// Remove `key` from both tiers. Failures are logged, never returned.
    pub async fn delete(&self, key: &CacheKey) {
        if let Err(e) = self.memory_cache.remove(key).await {
            warn!(key = %key, error = %e, "Failed to remove memory cache entry");
        }
        if let Err(e) = self.file_cache.remove(key).await {
            warn!(key = %key, error = %e, "Failed to remove disk cache entry");
        }
    }

    /// Refresh the disk access time of `key`. Failures are logged, never returned.
    pub async fn touch(&self, key: &CacheKey) {
        if let Err(e) = self.file_cache.touch(key).await {
            warn!(key = %key, error = %e, "Failed to touch disk cache entry");
        }
    }

    /// Check if a key exists in either tier, regardless of age
    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.memory_cache.contains(key).await.unwrap_or(false)
            || self.file_cache.contains(key).await.unwrap_or(false)
    }

    /// Delete disk entries not accessed within `max_age`.
    ///
    /// Returns the number of files removed; failures are logged and count as zero.
    pub async fn cleanup_stale(&self, max_age: Duration) -> u64 {
        match self.file_cache.sweep(max_age).await {
            Ok(removed) => {
                info!(removed, max_age = ?max_age, "Disk cache cleanup finished");
                removed
            }
            Err(e) => {
                warn!(error = %e, "Disk cache cleanup failed");
                0
            }
        }
    }

    /// Drop every memory tier entry, leaving disk untouched.
    pub async fn clear_memory(&self) {
        if let Err(e) = self.memory_cache.clear().await {
            warn!(error = %e, "Failed to clear memory cache");
        }
    }

    /// Clear all entries
    pub async fn clear(&self) -> CacheResult<()> {
        // Clear both caches
        let mem_result = self.memory_cache.clear().await;
        let file_result = self.file_cache.clear().await;

        // Return file cache error if any, otherwise memory cache error if any
        file_result.or(mem_result)
    }

    /// Entry counts and sizes of both tiers
    pub async fn stats(&self) -> CacheResult<CacheStats> {
        let (memory_entries, memory_bytes) = self.memory_cache.usage().await?;
        let (disk_entries, disk_bytes) = self.file_cache.usage().await?;
        Ok(CacheStats {
            memory_entries,
            memory_bytes,
            disk_entries,
            disk_bytes,
        })
    }

    /// Start a background task running the disk cleanup every `interval`
    pub fn start_maintenance_task(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                self.cleanup_stale(self.config.cleanup_max_age).await;
            }
        })
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("memory_cache", &self.memory_cache)
            .field("file_cache", &self.file_cache)
            .finish()
    }
}
