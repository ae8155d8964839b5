//! # Cache Types
//!
//! This module defines common types used across the caching system.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::Serialize;

use crate::decode::DecodedImage;

/// Short, filename-safe key derived from a URL.
///
/// Used both as the memory tier key and as the file name on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already computed key.
    ///
    /// Keys supplied by callers are checked with [`is_filename_safe`](Self::is_filename_safe)
    /// before anything is written under them.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// A key is safe when it names a single file directly inside the cache
    /// directory: non-empty, no path separators, no `..`, no NUL.
    pub fn is_filename_safe(&self) -> bool {
        !self.0.is_empty()
            && !self.0.contains(['/', '\\', '\0'])
            && !self.0.contains("..")
            && self.0 != "."
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key as a file name inside the cache root.
    pub fn to_filename(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a request may use the cache and the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum CachePolicy {
    /// Use the cache if the entry is fresh, otherwise download.
    #[default]
    Automatic,
    /// Use any cached entry regardless of age, otherwise download.
    ForceCache,
    /// Always download and bypass HTTP caches.
    ForceDownload,
    /// Always download, letting HTTP caching headers decide.
    Protocol,
    /// Never download. A miss is reported as "not found", not as an error.
    FromCache,
}

impl CachePolicy {
    /// Whether the local cache is consulted before the network.
    pub fn reads_cache(self) -> bool {
        matches!(
            self,
            CachePolicy::Automatic | CachePolicy::ForceCache | CachePolicy::FromCache
        )
    }

    /// Whether a cache miss may fall through to the network.
    pub fn allows_network(self) -> bool {
        !matches!(self, CachePolicy::FromCache)
    }

    /// Whether stale entries are still acceptable.
    pub fn ignores_staleness(self) -> bool {
        matches!(self, CachePolicy::ForceCache)
    }
}

/// Which tier(s) a cache-only retrieval consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum CacheTier {
    Memory,
    Disk,
    #[default]
    Any,
}

impl CacheTier {
    pub(crate) fn includes_memory(self) -> bool {
        matches!(self, CacheTier::Memory | CacheTier::Any)
    }

    pub(crate) fn includes_disk(self) -> bool {
        matches!(self, CacheTier::Disk | CacheTier::Any)
    }
}

/// Whether a lookup should enforce the invalidation timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Entries older than the invalidation timeout are deleted and missed.
    RequireFresh,
    /// Any entry present is returned.
    AnyAge,
}

impl From<CachePolicy> for Freshness {
    fn from(policy: CachePolicy) -> Self {
        if policy.ignores_staleness() {
            Freshness::AnyAge
        } else {
            Freshness::RequireFresh
        }
    }
}

/// Where a delivered image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageSource {
    Memory,
    Disk,
    Network,
}

/// A snapshot of a cache entry handed to callers.
///
/// Callers never see the cache's own entry, only this value.
#[derive(Debug, Clone)]
pub struct CachedImage {
    /// Key the entry is stored under
    pub key: CacheKey,
    /// Raw encoded bytes, as stored on disk
    pub data: Bytes,
    /// Decoded bitmap
    pub image: Arc<DecodedImage>,
    /// Last access time at the moment of the snapshot
    pub last_accessed: SystemTime,
    /// Encoded size, which is also the memory tier cost
    pub size_bytes: u64,
}

impl CachedImage {
    /// Snapshot of an image that was just stored or fetched.
    pub fn new(key: CacheKey, data: Bytes, image: Arc<DecodedImage>) -> Self {
        Self {
            key,
            size_bytes: data.len() as u64,
            data,
            image,
            last_accessed: SystemTime::now(),
        }
    }
}

/// Size counters for both tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_entries: u64,
    pub memory_bytes: u64,
    pub disk_entries: u64,
    pub disk_bytes: u64,
}

/// Configuration for the cache system
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether caching is enabled at all
    pub enabled: bool,
    /// Whether entries are written through to disk
    pub disk_cache_enabled: bool,
    /// Parent directory for disk caches. Each instance gets its own subdirectory.
    pub disk_cache_root: Option<PathBuf>,
    /// Name of this cache instance, used as the disk subdirectory
    pub instance_name: String,
    /// Maximum total cost of the memory tier in bytes
    pub max_memory_cache_size: u64,
    /// Entries not accessed for this long are treated as stale on read
    pub invalidation_timeout: Duration,
    /// Age after which the background cleanup pass deletes disk entries
    pub cleanup_max_age: Duration,
    /// Number of URL to key mappings remembered
    pub key_memo_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disk_cache_enabled: true,
            disk_cache_root: None, // If None, we'll use system temp dir
            instance_name: "default".to_owned(),
            max_memory_cache_size: 64 * 1024 * 1024, // 64MB
            invalidation_timeout: Duration::from_secs(24 * 60 * 60), // 1 day
            cleanup_max_age: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
            key_memo_capacity: 512,
        }
    }
}

impl CacheConfig {
    /// Directory holding this instance's disk entries.
    pub fn disk_path(&self) -> PathBuf {
        self.disk_cache_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("pixcache"))
            .join(&self.instance_name)
    }
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, std::io::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_flags() {
        assert!(CachePolicy::Automatic.reads_cache());
        assert!(CachePolicy::Automatic.allows_network());
        assert!(!CachePolicy::Automatic.ignores_staleness());

        assert!(CachePolicy::ForceCache.reads_cache());
        assert!(CachePolicy::ForceCache.ignores_staleness());

        assert!(!CachePolicy::ForceDownload.reads_cache());
        assert!(!CachePolicy::Protocol.reads_cache());

        assert!(CachePolicy::FromCache.reads_cache());
        assert!(!CachePolicy::FromCache.allows_network());
    }

    #[test]
    fn test_filename_safe_keys() {
        assert!(CacheKey::new("avatar-42").is_filename_safe());
        assert!(CacheKey::new("d41d8cd98f00b204e9800998ecf8427e").is_filename_safe());

        for bad in ["", ".", "..", "../x", "a/b", "a\\b", "x..y", "nul\0"] {
            assert!(!CacheKey::new(bad).is_filename_safe(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_disk_path_uses_instance_name() {
        let config = CacheConfig {
            disk_cache_root: Some(PathBuf::from("/tmp/root")),
            instance_name: "avatars".to_owned(),
            ..Default::default()
        };
        assert_eq!(config.disk_path(), PathBuf::from("/tmp/root/avatars"));
    }
}
