//! # Component Requests
//!
//! Tracks which request a UI component is waiting on, without owning the
//! component. Starting a new load for a component invalidates the one it
//! replaces, so a recycled view never shows a late image meant for its
//! previous content.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::CachePolicy;
use crate::coordinator::{DownloadOutcome, RequestId};
use crate::manager::ImageManager;

struct Binding {
    component: Weak<dyn Any + Send + Sync>,
    request: RequestId,
}

/// Side table from component identity to its active request.
#[derive(Clone)]
pub struct ComponentRequests {
    manager: ImageManager,
    bindings: Arc<Mutex<HashMap<usize, Binding>>>,
}

fn identity<T: ?Sized>(component: &Arc<T>) -> usize {
    Arc::as_ptr(component) as *const () as usize
}

impl ComponentRequests {
    pub fn new(manager: ImageManager) -> Self {
        Self {
            manager,
            bindings: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Load `url` for `component`, replacing whatever it was waiting on.
    pub fn load_into<T>(
        &self,
        component: &Arc<T>,
        url: &str,
        policy: CachePolicy,
        completion: impl FnOnce(DownloadOutcome) + Send + 'static,
    ) -> RequestId
    where
        T: Any + Send + Sync,
    {
        let slot = identity(component);
        let request = RequestId::new();

        let previous = self.bindings.lock().insert(
            slot,
            Binding {
                component: Arc::downgrade(component) as Weak<dyn Any + Send + Sync>,
                request: request.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(request = %previous.request, "Component reused, invalidating previous load");
            self.manager.invalidate_download(&previous.request);
        }

        let bindings = self.bindings.clone();
        let finished = request.clone();
        self.manager.download_image(
            url,
            policy,
            None,
            Some(request),
            move |outcome| {
                {
                    let mut bindings = bindings.lock();
                    if bindings
                        .get(&slot)
                        .is_some_and(|binding| binding.request == finished)
                    {
                        bindings.remove(&slot);
                    }
                }
                completion(outcome);
            },
        )
    }

    /// Cancel the component's active request, if any.
    pub fn cancel_for<T: ?Sized>(&self, component: &Arc<T>) -> bool {
        let binding = self.bindings.lock().remove(&identity(component));
        match binding {
            Some(binding) => self.manager.cancel_download(&binding.request),
            None => false,
        }
    }

    /// The request the component is currently waiting on.
    pub fn active_request<T: ?Sized>(&self, component: &Arc<T>) -> Option<RequestId> {
        self.bindings
            .lock()
            .get(&identity(component))
            .map(|binding| binding.request.clone())
    }

    /// Cancel requests whose component has been dropped. Returns how many.
    pub fn prune(&self) -> usize {
        let orphaned: Vec<RequestId> = {
            let mut bindings = self.bindings.lock();
            let mut orphaned = Vec::new();
            bindings.retain(|_, binding| {
                let alive = binding.component.strong_count() > 0;
                if !alive {
                    orphaned.push(binding.request.clone());
                }
                alive
            });
            orphaned
        };

        for request in &orphaned {
            self.manager.cancel_download(request);
        }
        orphaned.len()
    }

    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ComponentRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRequests")
            .field("bindings", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageManagerConfig;
    use crate::callback::CallbackContext;
    use crate::decode::test_support::png_bytes;
    use crate::error::ImageError;
    use crate::fetcher::ImageFetcher;
    use crate::request::ImageRequest;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::{Notify, mpsc};

    struct GatedFetcher {
        gate: Notify,
    }

    #[async_trait]
    impl ImageFetcher for GatedFetcher {
        async fn fetch(&self, _request: &ImageRequest) -> Result<Bytes, ImageError> {
            self.gate.notified().await;
            Ok(png_bytes(2, 2, 7))
        }
    }

    struct ImageView;

    async fn setup(dir: &TempDir) -> (ComponentRequests, Arc<GatedFetcher>) {
        let fetcher = Arc::new(GatedFetcher { gate: Notify::new() });
        let config = ImageManagerConfig::builder()
            .with_disk_cache_root(dir.path())
            .build();
        let manager = ImageManager::with_parts(config, fetcher.clone(), CallbackContext::spawn())
            .await
            .unwrap();
        (ComponentRequests::new(manager), fetcher)
    }

    async fn wait_for_tasks(requests: &ComponentRequests, n: usize) {
        for _ in 0..200 {
            if requests.manager.coordinator().in_flight_tasks() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} in-flight tasks");
    }

    #[tokio::test]
    async fn test_reuse_invalidates_previous_load() {
        let dir = TempDir::new().unwrap();
        let (requests, fetcher) = setup(&dir).await;
        let view = Arc::new(ImageView);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tx1 = tx.clone();
        let first = requests.load_into(&view, "https://a.example/1.png", CachePolicy::Automatic, move |o| {
            let _ = tx1.send(o);
        });
        let second = requests.load_into(&view, "https://a.example/2.png", CachePolicy::Automatic, move |o| {
            let _ = tx.send(o);
        });
        assert_eq!(requests.active_request(&view), Some(second.clone()));

        wait_for_tasks(&requests, 2).await;
        fetcher.gate.notify_waiters();

        for _ in 0..2 {
            let outcome = rx.recv().await.unwrap();
            if outcome.identifier == first {
                assert!(outcome.invalidated);
            } else {
                assert_eq!(outcome.identifier, second);
                assert!(!outcome.invalidated);
            }
        }
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn test_prune_cancels_dropped_components() {
        let dir = TempDir::new().unwrap();
        let (requests, _fetcher) = setup(&dir).await;

        let kept = Arc::new(ImageView);
        let dropped = Arc::new(ImageView);
        requests.load_into(&kept, "https://a.example/k.png", CachePolicy::Automatic, |_| {});
        requests.load_into(&dropped, "https://a.example/d.png", CachePolicy::Automatic, |_| {});
        wait_for_tasks(&requests, 2).await;

        drop(dropped);
        assert_eq!(requests.prune(), 1);
        assert_eq!(requests.len(), 1);
        wait_for_tasks(&requests, 1).await;

        assert!(requests.cancel_for(&kept));
        assert!(!requests.cancel_for(&kept));
        wait_for_tasks(&requests, 0).await;
    }
}
