use std::time::Duration;

use crate::cache::{CacheConfig, CachePolicy};

const DEFAULT_USER_AGENT: &str = concat!("pixcache/", env!("CARGO_PKG_VERSION"));

/// Configurable options for an [`ImageManager`](crate::ImageManager)
#[derive(Debug, Clone)]
pub struct ImageManagerConfig {
    /// Cache configuration
    pub cache_config: CacheConfig,

    /// Overall timeout for a single image request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Maximum number of network fetches running at once
    pub max_concurrent_downloads: usize,

    /// Deliver `ImageError::Cancelled` to completions of cancelled requests
    /// instead of dropping them silently
    pub report_cancellation: bool,

    /// Accept invalid certificates for every request unless overridden
    pub danger_accept_invalid_certs: bool,
}

impl Default for ImageManagerConfig {
    fn default() -> Self {
        Self {
            cache_config: CacheConfig::default(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_concurrent_downloads: 6,
            report_cancellation: false,
            danger_accept_invalid_certs: false, // Default to not accepting invalid certs
        }
    }
}

impl ImageManagerConfig {
    pub fn builder() -> crate::builder::ImageManagerConfigBuilder {
        crate::builder::ImageManagerConfigBuilder::new()
    }
}

/// Configuration for the [`Prefetcher`](crate::Prefetcher)
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Maximum number of prefetches waited on at once
    pub max_concurrent: usize,
    /// How long to wait for each image before reporting a timeout
    pub timeout: Duration,
    /// Cache policy used for every prefetch
    pub cache_policy: CachePolicy,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            timeout: Duration::from_secs(20),
            cache_policy: CachePolicy::Automatic,
        }
    }
}
