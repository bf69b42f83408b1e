//! Disk-backed page cache.
//!
//! Entries are written as PNG files under a single cache directory. Writes
//! go through a temp file and a rename so a reader never observes a partial
//! entry, and every key carries its own lock so unrelated pages can be
//! cached concurrently while save and load on the same key serialize.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use directories::ProjectDirs;
use image::{ImageFormat, RgbaImage};
use thiserror::Error;

use crate::key::CacheKey;

/// Errors from cache persistence.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Counters for cache effectiveness.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub saves: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheInner {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    stats: Mutex<CacheStats>,
}

/// Persistent store of decoded page images, one PNG per [`CacheKey`].
///
/// Cheap to clone; all clones share the same directory, lock table, and
/// statistics.
#[derive(Clone)]
pub struct PageCache {
    inner: Arc<CacheInner>,
}

impl PageCache {
    /// Opens a cache rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        Ok(Self {
            inner: Arc::new(CacheInner {
                root,
                locks: Mutex::new(HashMap::new()),
                stats: Mutex::new(CacheStats::default()),
            }),
        })
    }

    /// Platform cache directory for page images, if one can be determined.
    pub fn default_cache_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "Paperflow", "Paperflow")
            .map(|dirs| dirs.cache_dir().join("pages"))
    }

    /// Directory holding the cache entries.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Whether a fully written entry exists for `key`.
    pub fn exists(&self, key: &CacheKey) -> bool {
        self.entry_path(key).is_file()
    }

    /// Persists `image` under `key`, overwriting any previous entry.
    ///
    /// The PNG is encoded into a temp file which is renamed into place, so
    /// concurrent readers see either the old entry or the new one.
    pub fn save(&self, key: &CacheKey, image: &RgbaImage) -> Result<(), CacheError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap();

        let path = self.entry_path(key);
        let tmp = path.with_extension("tmp");

        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        image.write_to(&mut writer, ImageFormat::Png)?;
        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        self.inner.stats.lock().unwrap().saves += 1;
        tracing::debug!(entry = %key.file_name(), "cached page image");
        Ok(())
    }

    /// Loads the entry for `key`, or `None` when absent or unreadable.
    ///
    /// A corrupt entry is treated as a miss rather than an error so the
    /// caller falls back to decoding the page again.
    pub fn load(&self, key: &CacheKey) -> Option<RgbaImage> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap();

        let path = self.entry_path(key);
        if !path.is_file() {
            self.inner.stats.lock().unwrap().misses += 1;
            return None;
        }

        match image::open(&path) {
            Ok(image) => {
                self.inner.stats.lock().unwrap().hits += 1;
                Some(image.into_rgba8())
            }
            Err(err) => {
                tracing::warn!(entry = %key.file_name(), error = %err, "unreadable cache entry");
                self.inner.stats.lock().unwrap().misses += 1;
                None
            }
        }
    }

    /// Snapshot of the hit/miss/save counters.
    pub fn stats(&self) -> CacheStats {
        *self.inner.stats.lock().unwrap()
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.inner.root.join(key.file_name())
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut locks = self.inner.locks.lock().unwrap();
        locks.entry(key.file_name()).or_default().clone()
    }
}
