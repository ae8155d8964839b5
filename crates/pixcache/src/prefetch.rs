//! # Prefetcher
//!
//! Warms the cache ahead of display. Each URL goes through the normal
//! download path, so prefetches share tasks with on-screen requests.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::cache::ImageSource;
use crate::config::PrefetchConfig;
use crate::coordinator::RequestId;
use crate::error::ImageError;
use crate::manager::ImageManager;

/// Result of prefetching one URL.
#[derive(Debug, Clone)]
pub struct PrefetchResult {
    pub url: String,
    /// Where the image was found, `None` if a cache-only policy missed
    pub result: Result<Option<ImageSource>, ImageError>,
}

/// Summary of a [`Prefetcher::prefetch`] run.
#[derive(Debug, Clone, Default)]
pub struct PrefetchReport {
    pub results: Vec<PrefetchResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchSummary {
    pub completed: usize,
    pub from_cache: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl PrefetchReport {
    pub fn summary(&self) -> PrefetchSummary {
        let mut summary = PrefetchSummary::default();
        for item in &self.results {
            match &item.result {
                Ok(Some(ImageSource::Network)) => summary.completed += 1,
                Ok(Some(_)) => summary.from_cache += 1,
                Ok(None) => {}
                Err(ImageError::PrefetchTimeout(_)) => summary.timed_out += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }
}

/// Best-effort background fetcher with bounded concurrency.
#[derive(Debug, Clone)]
pub struct Prefetcher {
    manager: ImageManager,
    config: PrefetchConfig,
    outstanding: Arc<Mutex<HashSet<RequestId>>>,
}

impl Prefetcher {
    pub fn new(manager: ImageManager, config: PrefetchConfig) -> Self {
        Self {
            manager,
            config,
            outstanding: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Prefetch every URL, waiting on at most `max_concurrent` at a time.
    ///
    /// A wait that exceeds `timeout` is reported as
    /// [`ImageError::PrefetchTimeout`]; the download itself keeps going and
    /// still lands in the cache.
    pub async fn prefetch<I, S>(&self, urls: I) -> PrefetchReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        let total = urls.len();
        debug!(count = total, concurrency = self.config.max_concurrent, "Starting prefetch");

        let results: Vec<PrefetchResult> = stream::iter(urls)
            .map(|url| self.prefetch_one(url))
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        let report = PrefetchReport { results };
        let summary = report.summary();
        info!(
            total,
            completed = summary.completed,
            from_cache = summary.from_cache,
            failed = summary.failed,
            timed_out = summary.timed_out,
            "Prefetch finished"
        );
        report
    }

    async fn prefetch_one(&self, url: String) -> PrefetchResult {
        let (tx, rx) = oneshot::channel();
        let outstanding = self.outstanding.clone();

        let id = self.manager.download_image(
            &url,
            self.config.cache_policy,
            None,
            None,
            move |outcome| {
                outstanding.lock().remove(&outcome.identifier);
                let _ = tx.send(outcome.result);
            },
        );
        // An early completion leaves this entry behind only until the
        // removal below, since the wait cannot time out then
        self.outstanding.lock().insert(id.clone());

        let result = match tokio::time::timeout(self.config.timeout, rx).await {
            Ok(Ok(result)) => result.map(|response| response.map(|r| r.source)),
            Ok(Err(_)) => Err(ImageError::Cancelled),
            Err(_) => {
                debug!(url = %url, "Prefetch wait timed out, leaving download running");
                Err(ImageError::PrefetchTimeout(self.config.timeout))
            }
        };

        if !matches!(result, Err(ImageError::PrefetchTimeout(_))) {
            self.outstanding.lock().remove(&id);
        }
        PrefetchResult { url, result }
    }

    /// Cancel every prefetch still in flight. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<RequestId> = self.outstanding.lock().drain().collect();
        ids.iter()
            .filter(|id| self.manager.cancel_download(id))
            .count()
    }

    /// Number of prefetch requests that have not completed.
    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }
}
