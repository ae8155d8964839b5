use clap::Parser;
use error::AppError;
use pixcache_engine::{CacheConfig, ImageManagerConfig};
use tracing::{Level, error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod commands;
mod error;
mod utils;

use cli::{CliArgs, Command};
use utils::{format_duration, parse_duration, parse_size};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        // Log the full error for debugging
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) -> Result<(), AppError> {
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(log_level).into()));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match &args.log_file {
        Some(path) => {
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?;
            let multi_writer = MakeWriterExt::and(std::io::stderr, log_file);
            tracing::subscriber::set_global_default(
                builder.with_writer(multi_writer).with_ansi(false).finish(),
            )
        }
        None => tracing::subscriber::set_global_default(builder.with_ansi(true).finish()),
    };
    result.map_err(|e| AppError::Initialization(e.to_string()))
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();
    init_logging(&args)?;

    let memory_size = parse_size(&args.memory_size)?;
    if memory_size == 0 {
        return Err(AppError::InvalidInput(
            "memory cache size must be greater than zero".to_string(),
        ));
    }
    let invalidation_timeout = parse_duration(&args.invalidation_timeout)?;

    let cache_config = CacheConfig {
        disk_cache_root: args.cache_dir.clone(),
        instance_name: args.instance.clone(),
        max_memory_cache_size: memory_size,
        invalidation_timeout,
        ..Default::default()
    };

    info!(
        cache_dir = %cache_config.disk_path().display(),
        invalidation_timeout = %format_duration(invalidation_timeout.as_secs_f64()),
        "Using image cache"
    );

    let mut builder = ImageManagerConfig::builder().with_cache_config(cache_config);

    match args.command {
        Command::Fetch(fetch) => {
            builder = builder.with_timeout(parse_duration(&fetch.timeout)?);
            commands::fetch(builder.build(), fetch).await
        }
        Command::Prefetch(prefetch) => commands::prefetch(builder.build(), prefetch).await,
        Command::Clean(clean) => commands::clean(builder.build(), clean).await,
        Command::Stats(stats) => commands::stats(builder.build(), stats).await,
    }
}
