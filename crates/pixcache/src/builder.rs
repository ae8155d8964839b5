//! # Builder for ImageManagerConfig
//!
//! This module provides a builder pattern implementation for creating and customizing
//! ImageManagerConfig instances with a fluent API.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use pixcache_engine::ImageManagerConfig;
//!
//! let config = ImageManagerConfig::builder()
//!     .with_timeout(Duration::from_secs(15))
//!     .with_user_agent("MyApp/1.0")
//!     .with_instance_name("avatars")
//!     .with_memory_cache_size(16 * 1024 * 1024)
//!     .with_invalidation_timeout(Duration::from_secs(6 * 3600))
//!     .build();
//!
//! assert_eq!(config.cache_config.instance_name, "avatars");
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::{CacheConfig, ImageManagerConfig};

/// Builder for creating ImageManagerConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct ImageManagerConfigBuilder {
    /// Internal config being built
    config: ImageManagerConfig,
}

impl ImageManagerConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: ImageManagerConfig::default(),
        }
    }

    /// Set the cache configuration
    pub fn with_cache_config(mut self, cache_config: CacheConfig) -> Self {
        self.config.cache_config = cache_config;
        self
    }

    /// Enable or disable caching
    pub fn with_caching_enabled(mut self, enabled: bool) -> Self {
        self.config.cache_config.enabled = enabled;
        self
    }

    /// Enable or disable the disk tier
    pub fn with_disk_cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache_config.disk_cache_enabled = enabled;
        self
    }

    /// Set the parent directory of the disk cache
    pub fn with_disk_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.cache_config.disk_cache_root = Some(root.into());
        self
    }

    /// Set the instance name, which selects the disk subdirectory
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.config.cache_config.instance_name = name.into();
        self
    }

    /// Set the memory tier budget in bytes
    pub fn with_memory_cache_size(mut self, bytes: u64) -> Self {
        self.config.cache_config.max_memory_cache_size = bytes;
        self
    }

    /// Set how long an entry stays fresh after its last access
    pub fn with_invalidation_timeout(mut self, timeout: Duration) -> Self {
        self.config.cache_config.invalidation_timeout = timeout;
        self
    }

    /// Set the age after which disk cleanup removes entries
    pub fn with_cleanup_max_age(mut self, max_age: Duration) -> Self {
        self.config.cache_config.cleanup_max_age = max_age;
        self
    }

    /// Set the overall timeout of a single image request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the maximum number of concurrent network fetches
    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.config.max_concurrent_downloads = max.max(1);
        self
    }

    /// Deliver cancellation to completions instead of suppressing it
    pub fn with_report_cancellation(mut self, report: bool) -> Self {
        self.config.report_cancellation = report;
        self
    }

    /// Set whether to accept invalid certificates
    ///
    /// # Warning
    /// This is unsafe and should only be used for testing or in controlled environments.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.danger_accept_invalid_certs = accept;
        self
    }

    /// Build the ImageManagerConfig instance
    pub fn build(self) -> ImageManagerConfig {
        self.config
    }
}

impl Default for ImageManagerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ImageManagerConfigBuilder::new().build();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.follow_redirects);
        assert!(!config.report_cancellation);
        assert!(!config.danger_accept_invalid_certs);
        assert_eq!(config.cache_config.max_memory_cache_size, 64 * 1024 * 1024);
        assert_eq!(
            config.cache_config.invalidation_timeout,
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(
            config.cache_config.cleanup_max_age,
            Duration::from_secs(30 * 24 * 3600)
        );
        assert!(config.user_agent.starts_with("pixcache/"));
    }

    #[test]
    fn test_builder_customization() {
        let config = ImageManagerConfigBuilder::new()
            .with_timeout(Duration::from_secs(60))
            .with_follow_redirects(false)
            .with_user_agent("CustomUserAgent/1.0")
            .with_disk_cache_root("/var/cache/app")
            .with_instance_name("thumbs")
            .with_disk_cache_enabled(false)
            .with_max_concurrent_downloads(0)
            .with_report_cancellation(true)
            .build();

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(!config.follow_redirects);
        assert_eq!(config.user_agent, "CustomUserAgent/1.0");
        assert_eq!(
            config.cache_config.disk_path(),
            PathBuf::from("/var/cache/app/thumbs")
        );
        assert!(!config.cache_config.disk_cache_enabled);
        assert_eq!(config.max_concurrent_downloads, 1);
        assert!(config.report_cancellation);
    }

    #[test]
    fn test_caching_toggle() {
        let config = ImageManagerConfigBuilder::new()
            .with_caching_enabled(false)
            .build();
        assert!(!config.cache_config.enabled);
    }
}
