// # File Cache Store
//
// File-based implementation of CacheStore with crash recovery.
//
// ## Purpose
//
// Keeps resolved records across restarts so the first lookups after a
// launch can be served from disk instead of the network. Freshness of loaded
// records is judged by the domain cache, not by the store.
//
// ## Crash Recovery
//
// - Atomic writes: write to `.tmp`, then rename over the live file
// - Backup: the previous live file is copied to `.backup` before each rename
// - Recovery: a file that fails to parse is replaced by its backup
//
// ## Write Coalescing
//
// `put` and `remove` only update the in-memory copy and schedule one write
// after `write_delay`; every change made before it fires lands in that write.
// `clear` and `flush` write immediately.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "records": {
//     "example.com/v4": {
//       "ips": ["1.2.3.4"],
//       "fetched_at": "2025-01-09T12:00:00Z",
//       "ttl_secs": 600,
//       "stack": "v4"
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::Error;
use crate::record::ResolutionRecord;
use crate::traits::CacheStore;

/// Cache file format version
const CACHE_FILE_VERSION: &str = "1.0";

/// Delay between the first unsaved change and the write that saves it
pub const DEFAULT_WRITE_DELAY: Duration = Duration::from_secs(5);

/// File-based cache store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use httpdns_core::store::FileCacheStore;
/// use httpdns_core::traits::CacheStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileCacheStore::new("/var/lib/httpdns/cache.json").await?;
///     let records = store.load_all().await?;
///     println!("{} persisted record(s)", records.len());
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileCacheStore {
    path: PathBuf,
    write_delay: Duration,
    state: Arc<Mutex<FileState>>,
}

#[derive(Debug)]
struct FileState {
    records: HashMap<String, ResolutionRecord>,
    dirty: bool,
    write_scheduled: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CacheFileFormat {
    version: String,
    records: HashMap<String, ResolutionRecord>,
}

/// Why a cache file could not be loaded
enum LoadFailure {
    /// File exists but is not a valid cache file
    Corrupted(String),
    /// File could not be read at all
    Unreadable(Error),
}

impl FileCacheStore {
    /// Create or load a file cache store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing cache file, if any
    /// 3. Fall back to the backup if the file is corrupted
    /// 4. Start empty if both are unusable
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create cache directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let records = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            write_delay: DEFAULT_WRITE_DELAY,
            state: Arc::new(Mutex::new(FileState {
                records,
                dirty: false,
                write_scheduled: false,
            })),
        })
    }

    /// Set how long changes are buffered before being written
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    async fn load_with_recovery(path: &Path) -> Result<HashMap<String, ResolutionRecord>, Error> {
        let reason = match Self::load_file(path).await {
            Ok(records) => {
                tracing::debug!("Loaded cache file: {} record(s)", records.len());
                return Ok(records);
            }
            Err(LoadFailure::Unreadable(e)) => return Err(e),
            Err(LoadFailure::Corrupted(reason)) => reason,
        };

        tracing::warn!(
            "Cache file appears corrupted: {}. Attempting recovery from backup.",
            reason
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No cache backup found. Starting with empty cache.");
            return Ok(HashMap::new());
        }

        match Self::load_file(&backup_path).await {
            Ok(records) => {
                tracing::info!("Recovered cache from backup: {} record(s)", records.len());
                if let Err(e) = fs::copy(&backup_path, path).await {
                    tracing::error!("Failed to restore cache file from backup: {}", e);
                }
                Ok(records)
            }
            Err(LoadFailure::Corrupted(backup_reason)) => {
                tracing::error!(
                    "Cache backup also corrupted: {}. Starting with empty cache.",
                    backup_reason
                );
                Ok(HashMap::new())
            }
            Err(LoadFailure::Unreadable(e)) => Err(e),
        }
    }

    async fn load_file(path: &Path) -> Result<HashMap<String, ResolutionRecord>, LoadFailure> {
        if !path.exists() {
            tracing::debug!("Cache file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadFailure::Unreadable(Error::cache_store(format!(
                "Failed to read cache file {}: {}",
                path.display(),
                e
            )))
        })?;

        let file: CacheFileFormat = serde_json::from_str(&content)
            .map_err(|e| LoadFailure::Corrupted(format!("{}: {}", path.display(), e)))?;

        if file.version != CACHE_FILE_VERSION {
            tracing::warn!(
                "Cache file version mismatch: expected {}, got {}. Attempting to load anyway.",
                CACHE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.records)
    }

    /// Record an unsaved change and make sure a write is pending
    fn mark_dirty(&self, state: &mut FileState) {
        state.dirty = true;
        if state.write_scheduled {
            return;
        }
        state.write_scheduled = true;

        let path = self.path.clone();
        let shared = Arc::clone(&self.state);
        let delay = self.write_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = shared.lock().await;
            state.write_scheduled = false;
            if !state.dirty {
                return;
            }
            if let Err(e) = Self::write_locked(&path, &mut state).await {
                tracing::warn!("Deferred cache write failed: {}", e);
            }
        });
    }

    /// Write the current records atomically
    ///
    /// Called with the state lock held so concurrent writers cannot reorder
    /// renames.
    async fn write_locked(path: &Path, state: &mut FileState) -> Result<(), Error> {
        let file = CacheFileFormat {
            version: CACHE_FILE_VERSION.to_string(),
            records: state.records.clone(),
        };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::cache_store(format!("Failed to serialize cache: {}", e)))?;

        let temp_path = Self::temp_path(path);
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::cache_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::cache_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.flush().await.map_err(|e| {
                Error::cache_store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if path.exists()
            && let Err(e) = fs::copy(path, Self::backup_path(path)).await
        {
            tracing::warn!("Failed to create cache backup: {}", e);
        }

        fs::rename(&temp_path, path).await.map_err(|e| {
            Error::cache_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;

        state.dirty = false;
        tracing::trace!("Cache written to file: {}", path.display());
        Ok(())
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut temp = path.to_path_buf();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    /// Location of the cache file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn load_all(&self) -> Result<HashMap<String, ResolutionRecord>, Error> {
        Ok(self.state.lock().await.records.clone())
    }

    async fn put(&self, key: &str, record: &ResolutionRecord) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.records.insert(key.to_string(), record.clone());
        self.mark_dirty(&mut state);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if state.records.remove(key).is_some() {
            self.mark_dirty(&mut state);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.records.clear();
        Self::write_locked(&self.path, &mut state).await
    }

    async fn flush(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if state.dirty {
            Self::write_locked(&self.path, &mut state).await
        } else {
            Ok(())
        }
    }
}
