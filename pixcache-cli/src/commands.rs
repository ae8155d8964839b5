use std::time::Instant;

use futures::StreamExt;
use futures::stream;
use pixcache_engine::{
    Credentials, ImageManager, ImageManagerConfig, ImageResponse, ImageSource, PrefetchConfig,
    Prefetcher,
};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::cli::{CleanArgs, FetchArgs, PrefetchArgs, StatsArgs};
use crate::error::AppError;
use crate::utils::{create_dirs, format_bytes, output_file_name, parse_duration, parse_headers};

const FETCH_CONCURRENCY: usize = 8;

pub async fn fetch(config: ImageManagerConfig, args: FetchArgs) -> Result<(), AppError> {
    let manager = ImageManager::new(config).await?;

    for (name, value) in parse_headers(&args.headers).iter() {
        match value.to_str() {
            Ok(value) => manager.set_global_header(name.as_str(), Some(value), None),
            Err(_) => warn!(header = %name, "Skipping non-ASCII header value"),
        }
    }
    if let (Some(user), Some(password)) = (args.user, args.password) {
        manager.set_global_credentials(Some(Credentials::new(user, password)), None);
    }
    if args.insecure {
        manager.trust_all_certificates();
    }
    if let Some(dir) = &args.output_dir {
        create_dirs(dir).await?;
    }

    let total = args.urls.len();
    let started = Instant::now();
    let policy = args.policy;

    let results: Vec<(String, Result<Option<ImageResponse>, _>)> = stream::iter(args.urls)
        .map(|url| {
            let manager = manager.clone();
            async move {
                let result = manager.load(&url, policy).await;
                (url, result)
            }
        })
        .buffer_unordered(FETCH_CONCURRENCY)
        .collect()
        .await;

    let mut failed = 0;
    for (url, result) in results {
        match result {
            Ok(Some(response)) => {
                let image = &response.image;
                info!(
                    url = %url,
                    source = ?response.source,
                    width = image.image.width,
                    height = image.image.height,
                    size = %format_bytes(image.size_bytes),
                    key = %image.key,
                    "Image ready"
                );
                if let Some(dir) = &args.output_dir {
                    let path = dir.join(output_file_name(&url, image.key.as_str(), &image.image));
                    tokio::fs::write(&path, &image.data).await?;
                    info!(path = %path.display(), "Wrote image");
                }
            }
            Ok(None) => {
                warn!(url = %url, "Image not in cache");
                failed += 1;
            }
            Err(e) => {
                error!(url = %url, error = %e, "Failed to fetch image");
                failed += 1;
            }
        }
    }

    info!(
        total,
        failed,
        elapsed = ?started.elapsed(),
        "Fetch finished"
    );

    if failed > 0 {
        return Err(AppError::Failed(failed, total));
    }
    Ok(())
}

pub async fn prefetch(config: ImageManagerConfig, args: PrefetchArgs) -> Result<(), AppError> {
    let manager = ImageManager::new(config).await?;
    let prefetcher = Prefetcher::new(
        manager,
        PrefetchConfig {
            max_concurrent: args.concurrency.max(1),
            timeout: parse_duration(&args.timeout)?,
            cache_policy: args.policy,
        },
    );

    let total = args.urls.len();
    let report = prefetcher.prefetch(args.urls).await;
    for item in &report.results {
        if let Err(e) = &item.result {
            warn!(url = %item.url, error = %e, "Prefetch failed");
        }
    }

    // Downloads that outlived their wait are abandoned when the process exits
    let abandoned = prefetcher.cancel_all();
    if abandoned > 0 {
        warn!(count = abandoned, "Cancelled prefetches still in flight");
    }

    let summary = report.summary();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let failed = summary.failed + summary.timed_out;
    if failed > 0 {
        return Err(AppError::Failed(failed, total));
    }
    Ok(())
}

pub async fn clean(config: ImageManagerConfig, args: CleanArgs) -> Result<(), AppError> {
    let manager = ImageManager::new(config).await?;
    let cache = manager.cache();

    if args.all {
        cache.clear().await?;
        info!("Cache cleared");
        return Ok(());
    }

    let max_age = parse_duration(&args.max_age)?;
    let before = cache.stats().await?;
    let removed = cache.cleanup_stale(max_age).await;
    let after = cache.stats().await?;

    info!(
        removed,
        freed = %format_bytes(before.disk_bytes.saturating_sub(after.disk_bytes)),
        remaining = after.disk_entries,
        "Cleanup finished"
    );
    Ok(())
}

pub async fn stats(config: ImageManagerConfig, args: StatsArgs) -> Result<(), AppError> {
    let manager = ImageManager::new(config).await?;

    if let Some(url) = &args.url {
        let (tx, rx) = oneshot::channel();
        manager.retrieve_image(url, args.tier, move |outcome| {
            let _ = tx.send(outcome.result);
        });
        let found = rx
            .await
            .map_err(|_| AppError::Initialization("callback context closed".to_string()))??;

        let source = found.as_ref().map(|response| response.source);
        if args.json {
            let value = serde_json::json!({
                "url": url,
                "key": manager.key_for(url).as_str(),
                "source": source,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            match source {
                Some(ImageSource::Memory) => println!("{url}: cached in memory"),
                Some(_) => println!("{url}: cached on disk"),
                None => println!("{url}: not cached"),
            }
        }
        return Ok(());
    }

    let stats = manager.cache().stats().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "cache dir: {}",
            manager.config().cache_config.disk_path().display()
        );
        println!(
            "disk:      {} entries, {}",
            stats.disk_entries,
            format_bytes(stats.disk_bytes)
        );
        println!(
            "memory:    {} entries, {}",
            stats.memory_entries,
            format_bytes(stats.memory_bytes)
        );
    }
    Ok(())
}
