//! # Cache System
//!
//! Two-tier image cache: a byte-weighted memory tier in front of a disk
//! tier with one file per key, plus the URL to key transform both share.

// Module declarations
mod key;
mod manager;
pub mod providers;
mod types;
mod utils;

// Re-export primary types from our various modules
pub use key::{KeyTransformer, digest_key};
pub use manager::ImageCache;
pub use types::{
    CacheConfig, CacheKey, CachePolicy, CacheResult, CacheStats, CacheTier, CachedImage,
    Freshness, ImageSource,
};
pub use utils::{age_of, is_stale};

pub use providers::{CacheProvider, DiskEntry, FileCache, MemoryCache, MemoryEntry};
