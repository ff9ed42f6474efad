//! Cache storage: named caches of request → response entries.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hashbrown::HashMap;
use pwa_net::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use pwa_net::{Request, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Identity of a cached request: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    /// Key for a request.
    pub fn of(request: &Request) -> Self {
        Self {
            method: request.method.as_str().to_string(),
            url: normalize_url(&request.url),
        }
    }
}

fn normalize_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (fragment stripped).
    pub url: String,

    /// Request method.
    pub method: String,

    /// Final URL of the response, after redirects.
    pub response_url: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order. Values are raw bytes; they need not be
    /// visible ASCII.
    #[serde(with = "header_values_base64")]
    pub headers: Vec<(String, Vec<u8>)>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Build an entry for `request` from a network response.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Self {
            url: normalize_url(&request.url),
            method: request.method.as_str().to_string(),
            response_url: response.url.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    /// The key this entry is stored under.
    pub fn key(&self) -> CacheKey {
        CacheKey {
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }

    /// Rebuild the stored response, marked as served from cache.
    pub fn to_response(&self) -> Result<Response> {
        let url = Url::parse(&self.response_url)
            .map_err(|e| ServiceWorkerError::CacheError(format!("bad stored url: {e}")))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ServiceWorkerError::CacheError(format!("bad stored status: {e}")))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;
            let value = HeaderValue::from_bytes(value)
                .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;
            headers.append(name, value);
        }

        Ok(Response {
            url,
            status,
            headers,
            body: self.body.clone().into(),
            from_cache: true,
        })
    }
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod header_values_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        headers: &[(String, Vec<u8>)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(headers.iter().map(|(name, value)| (name, STANDARD.encode(value))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, Vec<u8>)>, D::Error> {
        Vec::<(String, String)>::deserialize(deserializer)?
            .into_iter()
            .map(|(name, value)| {
                let value = STANDARD.decode(value).map_err(de::Error::custom)?;
                Ok((name, value))
            })
            .collect()
    }
}

/// A single named cache.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<CacheKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Rebuild a cache from stored entries.
    pub fn from_entries(name: &str, entries: Vec<CacheEntry>) -> Self {
        let mut cache = Self::new(name);
        for entry in entries {
            cache.entries.insert(entry.key(), entry);
        }
        cache
    }

    /// Match a request.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        self.entries.get(&CacheKey::of(request))
    }

    /// Store an entry, replacing any entry with the same key.
    pub fn put(&mut self, entry: CacheEntry) -> Result<()> {
        check_cacheable(&entry)?;
        self.entries.insert(entry.key(), entry);
        Ok(())
    }

    /// Delete the entry for a request.
    pub fn delete(&mut self, request: &Request) -> bool {
        self.entries.remove(&CacheKey::of(request)).is_some()
    }

    /// All entries.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Only GET requests may be stored.
pub(crate) fn check_cacheable(entry: &CacheEntry) -> Result<()> {
    if entry.method != Method::GET.as_str() {
        return Err(ServiceWorkerError::CacheError(format!(
            "cannot cache {} request for {}",
            entry.method, entry.url
        )));
    }
    Ok(())
}

/// Named cache storage shared by every lifecycle handler.
///
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if absent.
    async fn open(&self, name: &str) -> Result<()>;

    /// Check if a cache exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// All cache names, in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Delete a cache. Returns `false` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Look up a request in one named cache. A missing cache matches nothing.
    async fn match_in(&self, name: &str, request: &Request) -> Result<Option<CacheEntry>>;

    /// Store entries in a named cache, creating it if absent. Either every
    /// entry is stored or none is.
    async fn put_all_in(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()>;

    /// Store one entry in a named cache.
    async fn put_in(&self, name: &str, entry: CacheEntry) -> Result<()> {
        self.put_all_in(name, vec![entry]).await
    }

    /// All entries of a named cache (empty if the cache is absent).
    async fn entries_in(&self, name: &str) -> Result<Vec<CacheEntry>>;
}

#[derive(Debug, Default)]
struct StorageInner {
    caches: HashMap<String, Cache>,
    order: Vec<String>,
}

impl StorageInner {
    fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }
}

/// In-memory cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    inner: RwLock<StorageInner>,
}

impl MemoryCacheStorage {
    /// Create new, empty cache storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.inner.write().await.open(name);
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.inner.read().await.caches.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().await.order.clone())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        inner.order.retain(|n| n != name);
        Ok(inner.caches.remove(name).is_some())
    }

    async fn match_in(&self, name: &str, request: &Request) -> Result<Option<CacheEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .caches
            .get(name)
            .and_then(|cache| cache.match_request(request))
            .cloned())
    }

    async fn put_all_in(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()> {
        for entry in &entries {
            check_cacheable(entry)?;
        }

        let mut inner = self.inner.write().await;
        let cache = inner.open(name);
        for entry in entries {
            cache.put(entry)?;
        }
        Ok(())
    }

    async fn entries_in(&self, name: &str) -> Result<Vec<CacheEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .caches
            .get(name)
            .map(|cache| cache.entries().cloned().collect())
            .unwrap_or_default())
    }
}
