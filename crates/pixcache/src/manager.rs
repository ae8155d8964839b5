//! # Image Manager
//!
//! Public entry point tying together the two-tier cache, the global policy
//! store, the request builder and the download coordinator.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{CacheKey, CachePolicy, CacheTier, CachedImage, ImageCache};
use crate::callback::CallbackContext;
use crate::config::ImageManagerConfig;
use crate::coordinator::{Completion, DownloadCoordinator, ImageResponse, RequestId};
use crate::decode::decode_image_async;
use crate::error::ImageError;
use crate::fetcher::{HttpFetcher, ImageFetcher};
use crate::policy::{Credentials, GlobalPolicyStore};
use crate::request::{RequestFactory, RequestModifier};

/// Where [`ImageManager::store_image`] files the bytes.
#[derive(Debug, Clone)]
pub enum StoreTarget {
    /// Under the key derived from this URL
    Url(String),
    /// Under a caller-chosen key
    Key(CacheKey),
}

/// Application lifecycle signals the manager reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    EnteredBackground,
    ResignedActive,
    /// Drop the memory tier, leave disk alone
    MemoryWarning,
}

/// Image download and cache manager. Cheap to clone.
#[derive(Clone)]
pub struct ImageManager {
    config: Arc<ImageManagerConfig>,
    cache: ImageCache,
    policy: Arc<GlobalPolicyStore>,
    coordinator: DownloadCoordinator,
}

impl ImageManager {
    /// Manager backed by reqwest, delivering completions on a spawned task.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn new(config: ImageManagerConfig) -> Result<Self, ImageError> {
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        Self::with_parts(config, fetcher, CallbackContext::spawn()).await
    }

    /// Manager with a custom fetcher and completion context.
    pub async fn with_parts(
        config: ImageManagerConfig,
        fetcher: Arc<dyn ImageFetcher>,
        callbacks: CallbackContext,
    ) -> Result<Self, ImageError> {
        let cache = ImageCache::new(config.cache_config.clone()).await?;
        let policy = Arc::new(GlobalPolicyStore::new());
        let requests = RequestFactory::new(
            policy.clone(),
            config.timeout,
            config.danger_accept_invalid_certs,
        );
        let coordinator = DownloadCoordinator::new(
            cache.clone(),
            fetcher,
            requests,
            callbacks,
            config.max_concurrent_downloads,
            config.report_cancellation,
        );

        info!(
            cache_dir = %config.cache_config.disk_path().display(),
            max_concurrent = config.max_concurrent_downloads,
            "Image manager ready"
        );

        Ok(Self {
            config: Arc::new(config),
            cache,
            policy,
            coordinator,
        })
    }

    /// Start downloading `url` and return the request's identifier.
    pub fn download_image(
        &self,
        url: &str,
        policy: CachePolicy,
        modifier: Option<RequestModifier>,
        custom_identifier: Option<RequestId>,
        completion: impl FnOnce(crate::DownloadOutcome) + Send + 'static,
    ) -> RequestId {
        self.coordinator.download(
            url,
            policy,
            modifier,
            custom_identifier,
            Box::new(completion),
        )
    }

    /// Look `url` up in the given cache tier(s) without touching the network.
    pub fn retrieve_image(
        &self,
        url: &str,
        tier: CacheTier,
        completion: impl FnOnce(crate::DownloadOutcome) + Send + 'static,
    ) {
        self.coordinator.retrieve(url, tier, Box::new(completion));
    }

    pub fn cancel_download(&self, id: &RequestId) -> bool {
        self.coordinator.cancel(id)
    }

    pub fn invalidate_download(&self, id: &RequestId) -> bool {
        self.coordinator.invalidate(id)
    }

    /// Download `url` and wait for the result.
    pub async fn load(
        &self,
        url: &str,
        policy: CachePolicy,
    ) -> Result<Option<ImageResponse>, ImageError> {
        let (tx, rx) = oneshot::channel();
        let completion: Completion = Box::new(move |outcome| {
            let _ = tx.send(outcome.result);
        });
        self.coordinator.download(url, policy, None, None, completion);

        // A dropped sender means the request was cancelled silently
        rx.await.unwrap_or(Err(ImageError::Cancelled))
    }

    /// Decode `data` and store it in both tiers.
    ///
    /// Bytes that do not decode are rejected so a disk file always holds a
    /// readable image. A caller-supplied key must be a plain file name.
    pub async fn store_image(
        &self,
        data: Bytes,
        target: StoreTarget,
    ) -> Result<CachedImage, ImageError> {
        let key = match target {
            StoreTarget::Url(url) => self.coordinator.key_for_url(&url),
            StoreTarget::Key(key) if key.is_filename_safe() => key,
            StoreTarget::Key(key) => return Err(ImageError::InvalidKey(key.as_str().to_owned())),
        };
        let decoded = Arc::new(decode_image_async(data.clone()).await?);
        Ok(self.cache.store(key, data, decoded).await?)
    }

    /// Remove the entry for `url` from both tiers.
    pub async fn delete_cached_image(&self, url: &str) {
        let key = self.coordinator.key_for_url(url);
        self.cache.delete(&key).await;
    }

    /// Set or remove (`None`) a header, globally or for one host.
    pub fn set_global_header(&self, name: &str, value: Option<&str>, host: Option<&str>) {
        self.policy.set_header(name, value, host);
    }

    /// Set or remove (`None`) credentials, globally or for one host.
    pub fn set_global_credentials(&self, credentials: Option<Credentials>, host: Option<&str>) {
        self.policy.set_credentials(credentials, host);
    }

    /// Accept any server certificate from now on. Dangerous.
    pub fn trust_all_certificates(&self) {
        self.policy.trust_all_certificates();
    }

    /// React to an application lifecycle signal.
    pub fn handle_lifecycle(&self, event: LifecycleEvent) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let max_age = self.config.cache_config.cleanup_max_age;
        debug!(event = ?event, "Lifecycle event");

        tokio::spawn(async move {
            match event {
                LifecycleEvent::EnteredBackground | LifecycleEvent::ResignedActive => {
                    cache.cleanup_stale(max_age).await;
                }
                LifecycleEvent::MemoryWarning => cache.clear_memory().await,
            }
        })
    }

    /// Run the disk cleanup pass every `interval`.
    pub fn start_maintenance_task(&self, interval: Duration) -> JoinHandle<()> {
        Arc::new(self.cache.clone()).start_maintenance_task(interval)
    }

    pub fn key_for(&self, url: &str) -> CacheKey {
        self.coordinator.key_for_url(url)
    }

    pub fn config(&self) -> &ImageManagerConfig {
        &self.config
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    pub fn policy(&self) -> &Arc<GlobalPolicyStore> {
        &self.policy
    }

    pub fn coordinator(&self) -> &DownloadCoordinator {
        &self.coordinator
    }
}

impl std::fmt::Debug for ImageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageManager")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Freshness, ImageSource};
    use crate::decode::test_support::png_bytes;
    use crate::request::ImageRequest;
    use async_trait::async_trait;
    use filetime::FileTime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;
    use tempfile::TempDir;

    struct StaticFetcher {
        data: Bytes,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageFetcher for StaticFetcher {
        async fn fetch(&self, _request: &ImageRequest) -> Result<Bytes, ImageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.data.clone())
        }
    }

    async fn manager(dir: &TempDir) -> (ImageManager, Arc<StaticFetcher>) {
        let fetcher = Arc::new(StaticFetcher {
            data: png_bytes(3, 3, 40),
            calls: AtomicUsize::new(0),
        });
        let config = ImageManagerConfig::builder()
            .with_disk_cache_root(dir.path())
            .with_instance_name("test")
            .build();
        let manager = ImageManager::with_parts(config, fetcher.clone(), CallbackContext::spawn())
            .await
            .unwrap();
        (manager, fetcher)
    }

    const URL: &str = "https://img.example.com/a.png";

    #[tokio::test]
    async fn test_load_then_cached() {
        let dir = TempDir::new().unwrap();
        let (manager, fetcher) = manager(&dir).await;

        let first = manager.load(URL, CachePolicy::Automatic).await.unwrap().unwrap();
        assert_eq!(first.source, ImageSource::Network);
        assert_eq!(first.image.image.width, 3);

        let second = manager.load(URL, CachePolicy::Automatic).await.unwrap().unwrap();
        assert_eq!(second.source, ImageSource::Memory);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        let path = dir.path().join("test").join(manager.key_for(URL).to_filename());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_stale_disk_entry_is_refetched_and_deleted() {
        let dir = TempDir::new().unwrap();
        let (manager, fetcher) = manager(&dir).await;
        manager
            .store_image(png_bytes(2, 2, 1), StoreTarget::Url(URL.to_owned()))
            .await
            .unwrap();
        manager.handle_lifecycle(LifecycleEvent::MemoryWarning).await.unwrap();

        let path = dir.path().join("test").join(manager.key_for(URL).to_filename());
        let two_days_ago = SystemTime::now() - Duration::from_secs(2 * 24 * 60 * 60);
        filetime::set_file_atime(&path, FileTime::from_system_time(two_days_ago)).unwrap();

        // forceCache still accepts the old entry
        let forced = manager.load(URL, CachePolicy::ForceCache).await.unwrap().unwrap();
        assert_eq!(forced.source, ImageSource::Disk);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);

        manager.handle_lifecycle(LifecycleEvent::MemoryWarning).await.unwrap();
        filetime::set_file_atime(&path, FileTime::from_system_time(two_days_ago)).unwrap();

        let fresh = manager.load(URL, CachePolicy::Automatic).await.unwrap().unwrap();
        assert_eq!(fresh.source, ImageSource::Network);
        assert_eq!(fresh.image.image.width, 3);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_from_cache_not_found() {
        let dir = TempDir::new().unwrap();
        let (manager, fetcher) = manager(&dir).await;

        let result = manager.load(URL, CachePolicy::FromCache).await.unwrap();
        assert!(result.is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_image_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir).await;

        let err = manager
            .store_image(Bytes::from_static(b"garbage"), StoreTarget::Url(URL.to_owned()))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));
        assert!(!manager.cache().contains(&manager.key_for(URL)).await);
    }

    #[tokio::test]
    async fn test_store_under_custom_key_and_delete() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir).await;

        let key = CacheKey::new("avatar-42");
        manager
            .store_image(png_bytes(1, 1, 1), StoreTarget::Key(key.clone()))
            .await
            .unwrap();
        assert!(manager.cache().contains(&key).await);

        manager
            .store_image(png_bytes(1, 1, 1), StoreTarget::Url(URL.to_owned()))
            .await
            .unwrap();
        manager.delete_cached_image(URL).await;
        assert!(
            manager
                .cache()
                .fetch(&manager.key_for(URL), Freshness::AnyAge, CacheTier::Any)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_store_rejects_key_escaping_cache_dir() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir).await;

        for bad in ["../escaped", "nested/escaped", "..\\escaped", ""] {
            let err = manager
                .store_image(png_bytes(1, 1, 1), StoreTarget::Key(CacheKey::new(bad)))
                .await
                .unwrap_err();
            assert!(matches!(err, ImageError::InvalidKey(ref key) if key == bad));
        }
        assert!(!dir.path().join("escaped").exists());
        assert!(!dir.path().join("test").join("nested").exists());
        assert_eq!(manager.cache().stats().await.unwrap().disk_entries, 0);
    }

    #[tokio::test]
    async fn test_background_cleanup_removes_old_files() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir).await;
        manager
            .store_image(png_bytes(1, 1, 1), StoreTarget::Url(URL.to_owned()))
            .await
            .unwrap();

        let path = dir.path().join("test").join(manager.key_for(URL).to_filename());
        let long_ago = SystemTime::now() - Duration::from_secs(60 * 24 * 60 * 60);
        filetime::set_file_atime(&path, FileTime::from_system_time(long_ago)).unwrap();

        manager
            .handle_lifecycle(LifecycleEvent::EnteredBackground)
            .await
            .unwrap();
        assert!(!path.exists());
    }
}
