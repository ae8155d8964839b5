//! # Cache Provider
//!
//! This module defines the cache provider trait that both cache tiers implement.

use std::time::Duration;

use async_trait::async_trait;

use crate::cache::types::{CacheKey, CacheResult};

/// A trait for cache tiers that can store and retrieve entries by key
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Value stored by this tier
    type Entry: Send + Sync;

    /// Check if the cache contains an entry for the given key
    async fn contains(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Get an entry from the cache
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Self::Entry>>;

    /// Put an entry into the cache, replacing any existing one
    async fn put(&self, key: CacheKey, entry: Self::Entry) -> CacheResult<()>;

    /// Remove an entry from the cache
    async fn remove(&self, key: &CacheKey) -> CacheResult<()>;

    /// Clear all entries from the cache
    async fn clear(&self) -> CacheResult<()>;

    /// Remove entries not accessed within `max_age`, returning how many went
    async fn sweep(&self, max_age: Duration) -> CacheResult<u64>;

    /// Entry count and total size in bytes
    async fn usage(&self) -> CacheResult<(u64, u64)>;
}
