//! Persistent cache storage on the local filesystem.
//!
//! ```text
//! <root>/index.json            cache names, in creation order
//! <root>/caches/<name>.json    entries of one cache (name base64url-encoded)
//! ```
//!
//! Every operation reads and writes through to disk under a single async
//! lock, so two handles on the same directory in one process must share one
//! `DiskCacheStorage`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use pwa_net::Request;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::cache::{check_cacheable, Cache, CacheEntry, CacheStorage};
use crate::Result;

const INDEX_FILE: &str = "index.json";
const CACHES_DIR: &str = "caches";

/// Cache storage persisted as JSON files under a directory.
#[derive(Debug)]
pub struct DiskCacheStorage {
    root: PathBuf,
    lock: Mutex<()>,
}

impl DiskCacheStorage {
    /// Open (creating if needed) storage rooted at `root`.
    pub async fn open_dir(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(CACHES_DIR)).await?;
        debug!(root = %root.display(), "Opened disk cache storage");
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.root
            .join(CACHES_DIR)
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(name)))
    }

    async fn read_index(&self) -> Result<Vec<String>> {
        match fs::read(self.root.join(INDEX_FILE)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_index(&self, names: &[String]) -> Result<()> {
        write_atomic(&self.root.join(INDEX_FILE), &serde_json::to_vec_pretty(names)?).await
    }

    async fn read_cache(&self, name: &str) -> Result<Option<Cache>> {
        match fs::read(self.cache_path(name)).await {
            Ok(bytes) => {
                let entries: Vec<CacheEntry> = serde_json::from_slice(&bytes)?;
                Ok(Some(Cache::from_entries(name, entries)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_cache(&self, cache: &Cache) -> Result<()> {
        let entries: Vec<&CacheEntry> = cache.entries().collect();
        write_atomic(&self.cache_path(&cache.name), &serde_json::to_vec(&entries)?).await
    }

    /// Make sure `name` is indexed and has a file. Caller holds the lock.
    async fn ensure_cache(&self, name: &str) -> Result<Cache> {
        let mut index = self.read_index().await?;
        if !index.iter().any(|n| n == name) {
            index.push(name.to_string());
            self.write_index(&index).await?;
        }

        match self.read_cache(name).await? {
            Some(cache) => Ok(cache),
            None => {
                let cache = Cache::new(name);
                self.write_cache(&cache).await?;
                Ok(cache)
            }
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.ensure_cache(name).await.map(|_| ())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        Ok(self.read_index().await?.iter().any(|n| n == name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        self.read_index().await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut index = self.read_index().await?;
        let before = index.len();
        index.retain(|n| n != name);
        if index.len() == before {
            return Ok(false);
        }

        // File first: an indexed name with no file reopens empty, while an
        // unindexed file would come back on the next open.
        match fs::remove_file(self.cache_path(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        trace!(cache = name, "Deleted cache file");
        self.write_index(&index).await?;
        Ok(true)
    }

    async fn match_in(&self, name: &str, request: &Request) -> Result<Option<CacheEntry>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_cache(name)
            .await?
            .and_then(|cache| cache.match_request(request).cloned()))
    }

    async fn put_all_in(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()> {
        for entry in &entries {
            check_cacheable(entry)?;
        }

        let _guard = self.lock.lock().await;
        let mut cache = self.ensure_cache(name).await?;
        for entry in entries {
            cache.put(entry)?;
        }
        self.write_cache(&cache).await
    }

    async fn entries_in(&self, name: &str) -> Result<Vec<CacheEntry>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_cache(name)
            .await?
            .map(|cache| cache.entries().cloned().collect())
            .unwrap_or_default())
    }
}
