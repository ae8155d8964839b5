//! # Pixcache
//!
//! An image download and cache engine. Images are fetched over HTTP,
//! decoded, and kept in a byte-bounded memory tier backed by a per-instance
//! disk directory whose file access times double as the staleness clock.
//!
//! ## Features
//!
//! - Two-tier cache with delete-on-stale-read and a coarse disk cleanup pass
//! - One network fetch per URL, however many requests wait on it
//! - Invalidate (keep fetching, drop the result) versus cancel (abort when
//!   nobody else is waiting)
//! - Per-host headers and credentials layered over global defaults
//! - Bounded-concurrency prefetching
//!
//! ```no_run
//! use pixcache_engine::{CachePolicy, ImageManager, ImageManagerConfig};
//!
//! # async fn run() -> Result<(), pixcache_engine::ImageError> {
//! let manager = ImageManager::new(ImageManagerConfig::default()).await?;
//! manager.set_global_header("Referer", Some("https://example.com"), None);
//!
//! let id = manager.download_image(
//!     "https://example.com/cat.png",
//!     CachePolicy::Automatic,
//!     None,
//!     None,
//!     |outcome| {
//!         if let Ok(Some(response)) = outcome.result {
//!             println!("{}x{}", response.image.image.width, response.image.image.height);
//!         }
//!     },
//! );
//! manager.invalidate_download(&id);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod cache;
pub mod callback;
pub mod components;
pub mod config;
pub mod coordinator;
pub mod decode;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod manager;
pub mod policy;
pub mod prefetch;
pub mod request;

pub use builder::ImageManagerConfigBuilder;
pub use cache::{
    CacheConfig, CacheKey, CachePolicy, CacheStats, CacheTier, CachedImage, ImageCache,
    ImageSource,
};
pub use callback::{CallbackContext, CallbackReceiver};
pub use components::ComponentRequests;
pub use config::{ImageManagerConfig, PrefetchConfig};
pub use coordinator::{
    Completion, DownloadCoordinator, DownloadOutcome, ImageResponse, RequestId, TaskState,
};
pub use decode::{DecodedImage, decode_image};
pub use error::ImageError;
pub use fetcher::{HttpFetcher, ImageFetcher};
pub use manager::{ImageManager, LifecycleEvent, StoreTarget};
pub use policy::{Credentials, GlobalPolicyStore};
pub use prefetch::{PrefetchReport, PrefetchResult, PrefetchSummary, Prefetcher};
pub use request::{HttpCacheMode, ImageRequest, RequestFactory, RequestModifier};

// Re-export downloader utilities
pub use downloader::create_client;
