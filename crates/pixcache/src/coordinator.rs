//! # Download Coordinator
//!
//! Tracks caller-facing request identifiers separately from the network
//! tasks that serve them. Requests for the same normalized URL share one
//! task, so there is at most one fetch per URL in flight.
//!
//! ```text
//! download(url) ──► cache lookup ──hit──► completion
//!                        │ miss
//!                        ▼
//!          tasks[fingerprint] exists? ──yes──► attach identifier
//!                        │ no
//!                        ▼
//!          spawn task: Pending ─► Running ─► fan out result, drop task
//!                                     └──── abort (last identifier left)
//! ```
//!
//! A task is only registered while it is pending or running. Its outcome
//! is reported through the completions it fans out to.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::cache::{CacheKey, CachePolicy, CacheTier, CachedImage, ImageCache, ImageSource};
use crate::callback::CallbackContext;
use crate::decode::decode_image_async;
use crate::error::ImageError;
use crate::fetcher::ImageFetcher;
use crate::request::{RequestFactory, RequestModifier};

/// Caller-facing handle for one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// A fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle of a registered network task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for a download slot
    Pending,
    Running,
}

/// An image handed to a completion.
#[derive(Debug, Clone)]
pub struct ImageResponse {
    pub image: CachedImage,
    pub source: ImageSource,
}

/// What a completion receives.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub identifier: RequestId,
    pub url: String,
    /// `Ok(None)` means "not found" for cache-only requests.
    pub result: Result<Option<ImageResponse>, ImageError>,
    /// The request was invalidated before its result arrived. The caller
    /// should not apply the result.
    pub invalidated: bool,
}

/// Callback invoked once per request on the callback context.
pub type Completion = Box<dyn FnOnce(DownloadOutcome) + Send + 'static>;

/// Resource identity of a URL: its normalized absolute form.
pub fn fingerprint(url: &str) -> Result<Url, ImageError> {
    Ok(Url::parse(url.trim())?)
}

struct PendingRequest {
    /// Distinguishes reuses of the same identifier
    generation: u64,
    url: String,
    fingerprint: String,
    invalidated: bool,
    completion: Completion,
    /// Set once the request is attached to a network task
    task: Option<u64>,
}

struct NetworkTask {
    id: u64,
    state: TaskState,
    attached: Vec<RequestId>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Registry {
    requests: HashMap<RequestId, PendingRequest>,
    tasks: HashMap<String, NetworkTask>,
}

impl Registry {
    /// Remove `id` only if it is still the given generation.
    fn take_current(&mut self, id: &RequestId, generation: u64) -> Option<PendingRequest> {
        match self.requests.get(id) {
            Some(request) if request.generation == generation => self.requests.remove(id),
            _ => None,
        }
    }

    /// Remove `id` and detach it from its task. The task is aborted and
    /// dropped when no other request remains attached.
    fn detach(&mut self, id: &RequestId) -> Option<PendingRequest> {
        let request = self.requests.remove(id)?;

        if let (Some(task_id), Some(task)) = (request.task, self.tasks.get_mut(&request.fingerprint))
            && task.id == task_id
        {
            task.attached.retain(|attached| attached != id);
            if task.attached.is_empty() {
                task.cancel.cancel();
                self.tasks.remove(&request.fingerprint);
                debug!(url = %request.url, "Last request detached, aborting network task");
            }
        }
        Some(request)
    }
}

struct Inner {
    registry: Mutex<Registry>,
    cache: ImageCache,
    fetcher: Arc<dyn ImageFetcher>,
    requests: RequestFactory,
    callbacks: CallbackContext,
    download_slots: Arc<Semaphore>,
    next_task_id: AtomicU64,
    next_generation: AtomicU64,
    network_fetches: AtomicU64,
    report_cancellation: bool,
}

/// Deduplicating download coordinator. Cheap to clone.
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

impl DownloadCoordinator {
    pub fn new(
        cache: ImageCache,
        fetcher: Arc<dyn ImageFetcher>,
        requests: RequestFactory,
        callbacks: CallbackContext,
        max_concurrent_downloads: usize,
        report_cancellation: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                cache,
                fetcher,
                requests,
                callbacks,
                download_slots: Arc::new(Semaphore::new(max_concurrent_downloads.max(1))),
                next_task_id: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
                network_fetches: AtomicU64::new(0),
                report_cancellation,
            }),
        }
    }

    /// Start a logical request for `url` and return its identifier.
    ///
    /// `completion` runs exactly once on the callback context unless the
    /// request is cancelled while cancellation reporting is off.
    pub fn download(
        &self,
        url: &str,
        policy: CachePolicy,
        modifier: Option<RequestModifier>,
        custom_identifier: Option<RequestId>,
        completion: Completion,
    ) -> RequestId {
        let id = custom_identifier.unwrap_or_default();

        let parsed = match fingerprint(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(url = %url, error = %e, "Rejecting download of invalid URL");
                self.deliver(
                    completion,
                    DownloadOutcome {
                        identifier: id.clone(),
                        url: url.to_owned(),
                        result: Err(e),
                        invalidated: false,
                    },
                );
                return id;
            }
        };

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let replaced = {
            let mut registry = self.inner.registry.lock();
            // Reusing a live identifier replaces the request it named
            let replaced = registry.detach(&id);
            registry.requests.insert(
                id.clone(),
                PendingRequest {
                    generation,
                    url: url.to_owned(),
                    fingerprint: parsed.to_string(),
                    invalidated: false,
                    completion,
                    task: None,
                },
            );
            replaced
        };
        if let Some(previous) = replaced {
            debug!(id = %id, url = %previous.url, "Identifier reused, cancelled its previous request");
            self.report_cancelled(&id, previous);
        }

        let this = self.clone();
        let request_id = id.clone();
        tokio::spawn(async move {
            this.resolve(request_id, generation, parsed, policy, modifier)
                .await;
        });

        id
    }

    /// Cache-only lookup in the given tier(s). Misses report `Ok(None)`.
    pub fn retrieve(&self, url: &str, tier: CacheTier, completion: Completion) {
        let key = self.key_for_url(url);
        let url = url.to_owned();
        let this = self.clone();

        tokio::spawn(async move {
            let result = this
                .inner
                .cache
                .fetch(&key, CachePolicy::Automatic.into(), tier)
                .await
                .map(|(image, source)| ImageResponse { image, source });

            this.deliver(
                completion,
                DownloadOutcome {
                    identifier: RequestId::new(),
                    url,
                    result: Ok(result),
                    invalidated: false,
                },
            );
        });
    }

    /// Mark a request's result as no longer wanted by its caller.
    ///
    /// The shared task keeps running and still populates the cache.
    /// Returns `false` if the request already finished or never existed.
    pub fn invalidate(&self, id: &RequestId) -> bool {
        let mut registry = self.inner.registry.lock();
        match registry.requests.get_mut(id) {
            Some(request) => {
                request.invalidated = true;
                debug!(id = %id, url = %request.url, "Invalidated request");
                true
            }
            None => false,
        }
    }

    /// Detach a request from its task, aborting the task when no other
    /// request is attached. Returns `false` if the request already finished.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let Some(request) = self.inner.registry.lock().detach(id) else {
            return false;
        };

        debug!(id = %id, url = %request.url, "Cancelled request");
        self.report_cancelled(id, request);
        true
    }

    fn report_cancelled(&self, id: &RequestId, request: PendingRequest) {
        if self.inner.report_cancellation {
            self.deliver(
                request.completion,
                DownloadOutcome {
                    identifier: id.clone(),
                    url: request.url,
                    result: Err(ImageError::Cancelled),
                    invalidated: request.invalidated,
                },
            );
        }
    }

    /// State of the network task serving `id`, if it is attached to one.
    pub fn task_state(&self, id: &RequestId) -> Option<TaskState> {
        let registry = self.inner.registry.lock();
        let request = registry.requests.get(id)?;
        let task = registry.tasks.get(&request.fingerprint)?;
        (Some(task.id) == request.task).then_some(task.state)
    }

    /// Number of requests whose completion has not fired yet.
    pub fn pending_requests(&self) -> usize {
        self.inner.registry.lock().requests.len()
    }

    /// Number of network tasks currently registered.
    pub fn in_flight_tasks(&self) -> usize {
        self.inner.registry.lock().tasks.len()
    }

    /// Total network fetches started by this coordinator.
    pub fn network_fetch_count(&self) -> u64 {
        self.inner.network_fetches.load(Ordering::Relaxed)
    }

    /// Cache key of a URL string, normalized when it parses.
    pub fn key_for_url(&self, url: &str) -> CacheKey {
        match fingerprint(url) {
            Ok(parsed) => self.inner.cache.key_for(parsed.as_str()),
            Err(_) => self.inner.cache.key_for(url),
        }
    }

    async fn resolve(
        &self,
        id: RequestId,
        generation: u64,
        url: Url,
        policy: CachePolicy,
        modifier: Option<RequestModifier>,
    ) {
        if policy.reads_cache() {
            let key = self.inner.cache.key_for(url.as_str());
            if let Some((image, source)) =
                self.inner.cache.fetch(&key, policy.into(), CacheTier::Any).await
            {
                debug!(id = %id, key = %key, source = ?source, "Serving image from cache");
                self.finish(&id, generation, Ok(Some(ImageResponse { image, source })));
                return;
            }

            if !policy.allows_network() {
                self.finish(&id, generation, Ok(None));
                return;
            }
        }

        self.attach(id, generation, url, policy, modifier);
    }

    /// Attach `id` to the task for its fingerprint, starting one if needed.
    fn attach(
        &self,
        id: RequestId,
        generation: u64,
        url: Url,
        policy: CachePolicy,
        modifier: Option<RequestModifier>,
    ) {
        let fingerprint = url.to_string();
        let (task_id, token) = {
            let mut guard = self.inner.registry.lock();
            let registry = &mut *guard;

            // Cancelled or replaced during the cache lookup
            let Some(request) = registry
                .requests
                .get_mut(&id)
                .filter(|request| request.generation == generation)
            else {
                return;
            };

            if let Some(task) = registry.tasks.get_mut(&fingerprint) {
                task.attached.push(id.clone());
                request.task = Some(task.id);
                debug!(
                    id = %id,
                    url = %fingerprint,
                    attached = task.attached.len(),
                    "Joined in-flight download"
                );
                return;
            }

            let task_id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
            let token = CancellationToken::new();
            registry.tasks.insert(
                fingerprint.clone(),
                NetworkTask {
                    id: task_id,
                    state: TaskState::Pending,
                    attached: vec![id.clone()],
                    cancel: token.clone(),
                },
            );
            request.task = Some(task_id);
            (task_id, token)
        };

        debug!(id = %id, url = %fingerprint, task = task_id, "Starting network task");
        let request = self.inner.requests.build(&url, policy, modifier.as_ref());
        let this = self.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = this.execute(&fingerprint, task_id, &request) => result,
            };
            this.complete(&fingerprint, task_id, result);
        });
    }

    async fn execute(
        &self,
        fingerprint: &str,
        task_id: u64,
        request: &crate::request::ImageRequest,
    ) -> Result<CachedImage, ImageError> {
        let _slot = self
            .inner
            .download_slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ImageError::Cancelled)?;

        self.set_task_state(fingerprint, task_id, TaskState::Running);
        self.inner.network_fetches.fetch_add(1, Ordering::Relaxed);

        let data: Bytes = self.inner.fetcher.fetch(request).await?;
        let decoded = Arc::new(decode_image_async(data.clone()).await?);

        let key = self.inner.cache.key_for(fingerprint);
        match self
            .inner
            .cache
            .store(key.clone(), data.clone(), decoded.clone())
            .await
        {
            Ok(image) => Ok(image),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to write downloaded image to disk cache");
                Ok(CachedImage::new(key, data, decoded))
            }
        }
    }

    fn set_task_state(&self, fingerprint: &str, task_id: u64, state: TaskState) {
        let mut registry = self.inner.registry.lock();
        if let Some(task) = registry.tasks.get_mut(fingerprint)
            && task.id == task_id
        {
            task.state = state;
        }
    }

    /// Discard the task and fan its result out to every attached request.
    fn complete(&self, fingerprint: &str, task_id: u64, result: Result<CachedImage, ImageError>) {
        let waiters: Vec<(RequestId, PendingRequest)> = {
            let mut guard = self.inner.registry.lock();
            let registry = &mut *guard;

            // A newer task may own the fingerprint after a cancel
            match registry.tasks.get(fingerprint) {
                Some(task) if task.id == task_id => {}
                _ => return,
            }
            let Some(task) = registry.tasks.remove(fingerprint) else {
                return;
            };

            task.attached
                .into_iter()
                .filter_map(|id| registry.requests.remove(&id).map(|request| (id, request)))
                .collect()
        };

        match &result {
            Ok(image) => debug!(
                url = %fingerprint,
                size = image.size_bytes,
                waiters = waiters.len(),
                "Network task finished"
            ),
            Err(e) => warn!(
                url = %fingerprint,
                error = %e,
                waiters = waiters.len(),
                "Network task failed"
            ),
        }

        for (id, request) in waiters {
            let result = result.clone().map(|image| {
                Some(ImageResponse {
                    image,
                    source: ImageSource::Network,
                })
            });
            self.deliver(
                request.completion,
                DownloadOutcome {
                    identifier: id,
                    url: request.url,
                    result,
                    invalidated: request.invalidated,
                },
            );
        }
    }

    /// Remove a request that finished without a network task and deliver.
    fn finish(
        &self,
        id: &RequestId,
        generation: u64,
        result: Result<Option<ImageResponse>, ImageError>,
    ) {
        let Some(request) = self.inner.registry.lock().take_current(id, generation) else {
            // Cancelled or replaced while the cache lookup ran
            return;
        };

        self.deliver(
            request.completion,
            DownloadOutcome {
                identifier: id.clone(),
                url: request.url,
                result,
                invalidated: request.invalidated,
            },
        );
    }

    fn deliver(&self, completion: Completion, outcome: DownloadOutcome) {
        self.inner.callbacks.dispatch(move || completion(outcome));
    }
}

impl fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("DownloadCoordinator")
            .field("requests", &registry.requests.len())
            .field("tasks", &registry.tasks.len())
            .finish()
    }
}
