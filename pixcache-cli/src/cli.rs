use clap::{Args, Parser, Subcommand};
use pixcache_engine::{CachePolicy, CacheTier};
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    author = "hua0512 <https://github.com/hua0512>",
    version,
    about = "Image download and cache tool",
    long_about = "Downloads images into a two-tier (memory and disk) cache.\n\
                  \n\
                  Concurrent requests for the same URL share a single fetch, cached\n\
                  entries expire when they have not been accessed for the invalidation\n\
                  timeout, and a cleanup pass removes long-unused files from disk."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Parent directory of the disk cache
    #[arg(
        long,
        global = true,
        help = "Parent directory of the disk cache (default: <system temp>/pixcache)"
    )]
    pub cache_dir: Option<PathBuf>,

    /// Cache instance name
    #[arg(
        long,
        global = true,
        default_value = "default",
        help = "Name of the cache instance, used as the disk subdirectory"
    )]
    pub instance: String,

    /// Memory tier size with optional unit (B, KB, MB, GB)
    #[arg(
        long,
        global = true,
        default_value = "64MB",
        help = "Maximum size of the in-memory cache with optional unit (B, KB, MB, GB). Example: \"128MB\""
    )]
    pub memory_size: String,

    /// Invalidation timeout with optional unit (s, m, h, d)
    #[arg(
        long,
        global = true,
        default_value = "1d",
        help = "Entries not accessed for this long are treated as stale. Examples: \"12h\", \"1d\""
    )]
    pub invalidation_timeout: String,

    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Optional log file
    #[arg(long, global = true, help = "Also write logs to this file")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Download images into the cache
    Fetch(FetchArgs),
    /// Warm the cache with a list of images
    Prefetch(PrefetchArgs),
    /// Remove long-unused entries from the disk cache
    Clean(CleanArgs),
    /// Show cache usage
    Stats(StatsArgs),
}

#[derive(Args)]
pub struct FetchArgs {
    /// Image URL(s) to download
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Cache policy
    #[arg(long, value_enum, default_value = "automatic")]
    pub policy: CachePolicy,

    /// Copy each image into this directory as well
    #[arg(short, long, help = "Directory where downloaded images are also written")]
    pub output_dir: Option<PathBuf>,

    /// Custom HTTP headers
    #[arg(
        short = 'H',
        long = "header",
        help = "Add custom HTTP header (can be used multiple times). Format: 'Name: Value'"
    )]
    pub headers: Vec<String>,

    /// Basic auth username
    #[arg(long, requires = "password")]
    pub user: Option<String>,

    /// Basic auth password
    #[arg(long, requires = "user")]
    pub password: Option<String>,

    /// Accept any server certificate
    #[arg(long, help = "Accept invalid TLS certificates (dangerous)")]
    pub insecure: bool,

    /// Overall timeout for each request
    #[arg(long, default_value = "30s", help = "Overall timeout for each HTTP request. Examples: \"30s\", \"2m\"")]
    pub timeout: String,
}

#[derive(Args)]
pub struct PrefetchArgs {
    /// Image URL(s) to prefetch
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Number of prefetches waited on at once
    #[arg(short = 'c', long, default_value = "4")]
    pub concurrency: usize,

    /// How long to wait for each image
    #[arg(long, default_value = "20s")]
    pub timeout: String,

    /// Cache policy
    #[arg(long, value_enum, default_value = "automatic")]
    pub policy: CachePolicy,
}

#[derive(Args)]
pub struct CleanArgs {
    /// Remove entries not accessed for this long
    #[arg(long, default_value = "30d", help = "Maximum age with optional unit (s, m, h, d)")]
    pub max_age: String,

    /// Remove every entry instead
    #[arg(long, conflicts_with = "max_age")]
    pub all: bool,
}

#[derive(Args)]
pub struct StatsArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,

    /// Look up whether a URL is cached, and in which tier
    #[arg(long)]
    pub url: Option<String>,

    /// Tier consulted by --url
    #[arg(long, value_enum, default_value = "any")]
    pub tier: CacheTier,
}
