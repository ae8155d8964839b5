//! # Cache Providers
//!
//! This module contains the memory and disk tiers.

// Re-export providers for easier access
pub use self::file::{DiskEntry, FileCache};
pub use self::memory::{MemoryCache, MemoryEntry};
pub use self::provider::CacheProvider;

// Provider interface
pub mod provider;

// Individual provider implementations
pub mod file;
pub mod memory;
