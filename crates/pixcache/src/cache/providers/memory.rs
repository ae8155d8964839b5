//! # Memory Cache Provider
//!
//! This module provides the in-memory tier using Moka caching, weighted by
//! the encoded byte size of each image.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use moka::future::Cache as MokaCache;
use tracing::{debug, warn};

use crate::cache::providers::CacheProvider;
use crate::cache::types::{CacheKey, CacheResult, CachedImage};
use crate::cache::utils::{from_millis, now_millis, to_millis};
use crate::decode::DecodedImage;

/// Entry in the memory cache
///
/// Clones share the access timestamp, so touching a clone returned by
/// [`MemoryCache::get`] updates the cached entry as well.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    /// Encoded bytes
    data: Bytes,
    /// Decoded bitmap
    image: Arc<DecodedImage>,
    /// Milliseconds since the epoch of the last read or write
    last_accessed: Arc<AtomicU64>,
}

impl MemoryEntry {
    pub fn new(data: Bytes, image: Arc<DecodedImage>, last_accessed: SystemTime) -> Self {
        Self {
            data,
            image,
            last_accessed: Arc::new(AtomicU64::new(to_millis(last_accessed))),
        }
    }

    pub fn last_accessed(&self) -> SystemTime {
        from_millis(self.last_accessed.load(Ordering::Acquire))
    }

    /// Mark the entry as read now.
    pub fn touch(&self) {
        self.last_accessed.store(now_millis(), Ordering::Release);
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn to_cached_image(&self, key: &CacheKey) -> CachedImage {
        CachedImage {
            key: key.clone(),
            data: self.data.clone(),
            image: Arc::clone(&self.image),
            last_accessed: self.last_accessed(),
            size_bytes: self.size(),
        }
    }
}

/// Memory cache provider implementation using Moka
#[derive(Clone)]
pub struct MemoryCache {
    /// Moka cache for storing entries
    cache: MokaCache<CacheKey, MemoryEntry>,
    /// Maximum total cost for this cache in bytes
    max_size: u64,
}

impl MemoryCache {
    /// Create a new memory cache with the specified size limit
    pub fn new(max_size_bytes: u64) -> Self {
        if max_size_bytes == 0 {
            panic!("Memory cache size must be greater than zero");
        }

        // Size based eviction
        let cache = MokaCache::builder()
            .weigher(|_k, v: &MemoryEntry| v.data.len().try_into().unwrap_or(u32::MAX))
            .max_capacity(max_size_bytes)
            .build();

        debug!(max_size = max_size_bytes, "Memory cache created with size limit");

        Self {
            cache,
            max_size: max_size_bytes,
        }
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Flush Moka's pending maintenance so counts and evictions are current.
    pub async fn settle(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("max_size", &self.max_size)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait::async_trait]
impl CacheProvider for MemoryCache {
    type Entry = MemoryEntry;

    async fn contains(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.cache.contains_key(key))
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<MemoryEntry>> {
        Ok(self.cache.get(key).await)
    }

    async fn put(&self, key: CacheKey, entry: MemoryEntry) -> CacheResult<()> {
        let size = entry.size();

        // A single entry shouldn't be larger than the total cache size
        if size > self.max_size {
            warn!(
                key = %key,
                size = size,
                max_size = self.max_size,
                "Entry too large for memory cache, skipping"
            );
            return Ok(());
        }

        self.cache.insert(key, entry).await;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        if self.cache.remove(key).await.is_some() {
            debug!(key = %key, "Removed entry from memory cache");
        }
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;

        debug!("Memory cache cleared");
        Ok(())
    }

    async fn sweep(&self, max_age: Duration) -> CacheResult<u64> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let expired: Vec<Arc<CacheKey>> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.last_accessed() < cutoff)
            .map(|(key, _)| key)
            .collect();

        for key in &expired {
            self.cache.invalidate(key.as_ref()).await;
        }
        self.cache.run_pending_tasks().await;

        Ok(expired.len() as u64)
    }

    async fn usage(&self) -> CacheResult<(u64, u64)> {
        self.cache.run_pending_tasks().await;
        Ok((self.cache.entry_count(), self.cache.weighted_size()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_image;
    use crate::decode::test_support::png_bytes;

    #[inline]
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer() // Write to test output
            .try_init();
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::new(name)
    }

    // Entry whose cost is exactly `len` bytes. The bitmap is shared; only the
    // byte length matters to the weigher.
    fn entry_of_len(len: usize) -> MemoryEntry {
        let image = Arc::new(decode_image(&png_bytes(1, 1, 0)).unwrap());
        MemoryEntry::new(Bytes::from(vec![7u8; len]), image, SystemTime::now())
    }

    #[tokio::test]
    async fn test_new_cache_valid_params() {
        let cache = MemoryCache::new(1024 * 1024);
        assert_eq!(cache.max_size(), 1024 * 1024);
    }

    #[tokio::test]
    #[should_panic(expected = "Memory cache size must be greater than zero")]
    async fn test_new_cache_zero_size_panics() {
        MemoryCache::new(0);
    }

    #[tokio::test]
    async fn test_put_get_hit() {
        let cache = MemoryCache::new(100);
        let k = key("item1");
        let e = entry_of_len(5);

        cache.put(k.clone(), e.clone()).await.unwrap();
        cache.settle().await;

        let found = cache.get(&k).await.unwrap().expect("entry present");
        assert_eq!(found.size(), 5);
        assert_eq!(found.to_cached_image(&k).key, k);
    }

    #[tokio::test]
    async fn test_get_miss() {
        let cache = MemoryCache::new(100);
        assert!(cache.get(&key("non_existent")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_touch_through_clone_updates_cached_entry() {
        let cache = MemoryCache::new(100);
        let k = key("touched");
        let image = Arc::new(decode_image(&png_bytes(1, 1, 0)).unwrap());
        let old = SystemTime::now() - Duration::from_secs(3600);
        cache
            .put(k.clone(), MemoryEntry::new(Bytes::from_static(b"abc"), image, old))
            .await
            .unwrap();

        let first = cache.get(&k).await.unwrap().unwrap();
        assert!(first.last_accessed() <= old + Duration::from_millis(1));
        first.touch();

        let second = cache.get(&k).await.unwrap().unwrap();
        assert!(second.last_accessed() > old + Duration::from_secs(3000));
    }

    #[tokio::test]
    async fn test_put_too_large_entry() {
        let cache = MemoryCache::new(50);
        let k = key("large_item");

        cache.put(k.clone(), entry_of_len(80)).await.unwrap();
        cache.settle().await;

        assert!(!cache.contains(&k).await.unwrap());
        assert!(cache.get(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_key() {
        let cache = MemoryCache::new(100);
        let k = key("item_to_remove");

        cache.put(k.clone(), entry_of_len(7)).await.unwrap();
        cache.settle().await;
        assert!(cache.contains(&k).await.unwrap());

        cache.remove(&k).await.unwrap();
        cache.settle().await;
        assert!(!cache.contains(&k).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_non_existent_key() {
        let cache = MemoryCache::new(100);
        assert!(cache.remove(&key("ghost_key")).await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let cache = MemoryCache::new(100);
        cache.put(key("a"), entry_of_len(10)).await.unwrap();
        cache.put(key("b"), entry_of_len(10)).await.unwrap();
        cache.settle().await;

        cache.clear().await.unwrap();

        assert!(!cache.contains(&key("a")).await.unwrap());
        assert!(!cache.contains(&key("b")).await.unwrap());
        assert_eq!(cache.usage().await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_old_entries() {
        let cache = MemoryCache::new(1000);
        let image = Arc::new(decode_image(&png_bytes(1, 1, 0)).unwrap());
        let old = SystemTime::now() - Duration::from_secs(7200);

        cache
            .put(
                key("old"),
                MemoryEntry::new(Bytes::from_static(b"old"), image.clone(), old),
            )
            .await
            .unwrap();
        cache.put(key("new"), entry_of_len(3)).await.unwrap();
        cache.settle().await;

        let removed = cache.sweep(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!cache.contains(&key("old")).await.unwrap());
        assert!(cache.contains(&key("new")).await.unwrap());
    }

    #[tokio::test]
    async fn test_usage_reports_weighted_size() {
        let cache = MemoryCache::new(100);
        cache.put(key("a"), entry_of_len(10)).await.unwrap();
        cache.put(key("b"), entry_of_len(15)).await.unwrap();
        assert_eq!(cache.usage().await.unwrap(), (2, 25));
    }

    #[tokio::test]
    async fn test_eviction_keeps_total_cost_within_budget() {
        init_tracing();
        let cache = MemoryCache::new(10); // Each item 5 bytes.

        for name in ["k1", "k2", "k3", "k4"] {
            cache.put(key(name), entry_of_len(5)).await.unwrap();
            cache.settle().await;
        }

        let (count, size) = cache.usage().await.unwrap();
        debug!(count, size, "After filling memory cache past its budget");
        assert!(size <= 10, "weighted size {size} exceeds the budget");
        assert!(count <= 2);
    }

    #[tokio::test]
    async fn test_double_put_updates_value_and_weight() {
        let cache = MemoryCache::new(100);
        let k = key("item_double_put");

        cache.put(k.clone(), entry_of_len(6)).await.unwrap();
        cache.settle().await;
        assert_eq!(cache.usage().await.unwrap(), (1, 6));

        cache.put(k.clone(), entry_of_len(9)).await.unwrap();
        cache.settle().await;
        let found = cache.get(&k).await.unwrap().unwrap();
        assert_eq!(found.size(), 9, "Data should be updated");
        assert_eq!(cache.usage().await.unwrap(), (1, 9));
    }
}
