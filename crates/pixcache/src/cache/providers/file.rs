//! # File Cache
//!
//! This module implements the persistent disk tier. Each entry is a single
//! file named by its key whose access time is the staleness clock, so there
//! is no separate metadata file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use filetime::FileTime;
use tokio::fs;
use tokio::io;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::types::{CacheKey, CacheResult};
use crate::cache::utils::age_of;

use super::CacheProvider;

const TEMP_EXTENSION: &str = "tmp";

/// Bytes read back from disk together with their access time.
#[derive(Debug, Clone)]
pub struct DiskEntry {
    pub data: Bytes,
    pub last_accessed: SystemTime,
}

impl DiskEntry {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            last_accessed: SystemTime::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileCache {
    cache_dir: PathBuf,
    initialized: Arc<AtomicBool>,
    enabled: bool,
    /// Single holder gate around every file operation of this instance
    io_gate: Arc<Mutex<()>>,
}

impl FileCache {
    /// Create a new file cache with the specified directory
    pub fn new(cache_dir: PathBuf, enabled: bool) -> Self {
        Self {
            cache_dir,
            initialized: Arc::new(AtomicBool::new(false)),
            enabled,
            io_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Initialize the cache directory
    pub(crate) async fn ensure_initialized(&self) -> io::Result<()> {
        // Fast path - already initialized
        if self.initialized.load(Ordering::Acquire) || !self.enabled {
            return Ok(());
        }

        fs::create_dir_all(&self.cache_dir).await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Get the path for a cached resource
    fn get_cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.to_filename())
    }

    /// Update the access time of an entry without rewriting its bytes.
    ///
    /// Returns `Ok(false)` if there is no entry for `key`.
    pub async fn touch(&self, key: &CacheKey) -> CacheResult<bool> {
        if !self.enabled {
            return Ok(false);
        }

        let path = self.get_cache_path(key);
        let _guard = self.io_gate.lock().await;

        match set_access_time(path, SystemTime::now()).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove the entry only if it is still older than `max_age`, checked
    /// under the gate so a concurrent touch or write wins.
    async fn remove_if_older(&self, path: &Path, max_age: Duration) -> CacheResult<bool> {
        let _guard = self.io_gate.lock().await;

        let metadata = match fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        if age_of(access_time(&metadata)) <= max_age {
            return Ok(false);
        }

        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_entry_paths(&self) -> CacheResult<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }
}

/// Last access time, falling back to modification time on platforms that
/// do not record access times.
fn access_time(metadata: &std::fs::Metadata) -> SystemTime {
    metadata
        .accessed()
        .or_else(|_| metadata.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

async fn set_access_time(path: PathBuf, time: SystemTime) -> io::Result<()> {
    tokio::task::spawn_blocking(move || {
        filetime::set_file_atime(&path, FileTime::from_system_time(time))
    })
    .await
    .map_err(io::Error::other)?
}

fn is_temp_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == TEMP_EXTENSION)
}

#[async_trait::async_trait]
impl CacheProvider for FileCache {
    type Entry = DiskEntry;

    async fn contains(&self, key: &CacheKey) -> CacheResult<bool> {
        if !self.enabled {
            return Ok(false);
        }

        fs::try_exists(self.get_cache_path(key)).await
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<DiskEntry>> {
        if !self.enabled {
            return Ok(None);
        }

        let path = self.get_cache_path(key);
        let _guard = self.io_gate.lock().await;

        // Metadata first: reading the bytes may itself move the access time.
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let last_accessed = access_time(&metadata);

        let data = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read cache data file");
                return Err(e);
            }
        };

        Ok(Some(DiskEntry {
            data: Bytes::from(data),
            last_accessed,
        }))
    }

    async fn put(&self, key: CacheKey, entry: DiskEntry) -> CacheResult<()> {
        if !self.enabled {
            return Ok(());
        }

        if !key.is_filename_safe() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cache key {key:?} is not a plain file name"),
            ));
        }

        self.ensure_initialized().await?;

        let data_path = self.get_cache_path(&key);
        let temp_data_path = data_path.with_extension(TEMP_EXTENSION);

        let _guard = self.io_gate.lock().await;

        // Write to a temporary file then rename over any existing entry
        if let Err(e) = fs::write(&temp_data_path, &entry.data).await {
            warn!(path = ?temp_data_path, error = %e, "Failed to write cache data file");
            let _ = fs::remove_file(&temp_data_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_data_path, &data_path).await {
            warn!(
                from = ?temp_data_path,
                to = ?data_path,
                error = %e,
                "Failed to rename temporary data file"
            );
            let _ = fs::remove_file(&temp_data_path).await;
            return Err(e);
        }

        if let Err(e) = set_access_time(data_path.clone(), entry.last_accessed).await {
            warn!(path = ?data_path, error = %e, "Failed to set access time on cache entry");
        }

        debug!(key = %key, size = entry.data.len(), "Cached entry to file");
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        if !self.enabled {
            return Ok(());
        }

        let path = self.get_cache_path(key);
        let _guard = self.io_gate.lock().await;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to remove cache data file");
                Err(e)
            }
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        if !self.enabled {
            return Ok(());
        }

        let mut entry_count = 0;
        for path in self.list_entry_paths().await? {
            let _guard = self.io_gate.lock().await;
            match fs::remove_file(&path).await {
                Ok(()) => entry_count += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = ?path, error = %e, "Failed to remove cache file"),
            }
        }

        debug!(count = entry_count, "Cleared disk cache entries");
        Ok(())
    }

    async fn sweep(&self, max_age: Duration) -> CacheResult<u64> {
        if !self.enabled {
            return Ok(0);
        }

        let mut removed = 0;
        for path in self.list_entry_paths().await? {
            match self.remove_if_older(&path, max_age).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(path = ?path, error = %e, "Failed to sweep cache file"),
            }
        }

        debug!(removed, dir = ?self.cache_dir, "Swept stale disk cache entries");
        Ok(removed)
    }

    async fn usage(&self) -> CacheResult<(u64, u64)> {
        if !self.enabled {
            return Ok((0, 0));
        }

        let mut count = 0;
        let mut bytes = 0;
        for path in self.list_entry_paths().await? {
            if is_temp_file(&path) {
                continue;
            }
            if let Ok(metadata) = fs::metadata(&path).await {
                count += 1;
                bytes += metadata.len();
            }
        }
        Ok((count, bytes))
    }
}
