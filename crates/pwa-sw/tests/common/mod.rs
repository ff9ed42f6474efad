//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pwa_net::http::StatusCode;
use pwa_net::{Fetcher, NetError, Request, Response};
use pwa_sw::{
    AgentConfig, CacheEntry, CacheStorage, InstallRetryConfig, MemoryCacheStorage, Platform,
    ServiceWorkerError,
};
use url::Url;

pub const SCOPE: &str = "http://localhost:8000/";

pub fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
}

/// Config with fast install retries.
pub fn config(cache_name: &str) -> AgentConfig {
    AgentConfig {
        cache_name: cache_name.to_string(),
        install_retry: InstallRetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_factor: 2.0,
            jitter: 0.0,
        },
        ..AgentConfig::for_scope(Url::parse(SCOPE).unwrap())
    }
}

/// In-process origin server with an offline switch and a request log.
#[derive(Default)]
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, (u16, String)>>,
    offline: AtomicBool,
    /// Requests that fail with a network error before the route is served.
    failures_left: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl FakeNetwork {
    /// A network serving every core asset with body `"<path> v<version>"`.
    pub fn serving_core_assets(version: u32) -> Arc<Self> {
        let network = Arc::new(Self::default());
        for path in pwa_sw::CORE_ASSETS {
            network.route(path, 200, &format!("{path} v{version}"));
        }
        network
    }

    pub fn route(&self, path: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url(path).to_string(), (status, body.to_string()));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.log.lock().unwrap().push(request.url.to_string());

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed("offline".to_string()));
        }
        let flaky = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if flaky {
            return Err(NetError::RequestFailed("connection reset".to_string()));
        }

        let routes = self.routes.lock().unwrap();
        let (status, body) = routes
            .get(request.url.as_str())
            .cloned()
            .unwrap_or((404, "not found".to_string()));
        Ok(Response::new(
            request.url.clone(),
            StatusCode::from_u16(status).unwrap(),
            body,
        ))
    }
}

/// Records every control signal in order.
#[derive(Default)]
pub struct RecordingPlatform {
    signals: Mutex<Vec<&'static str>>,
}

impl RecordingPlatform {
    pub fn signals(&self) -> Vec<&'static str> {
        self.signals.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn skip_waiting(&self) {
        self.signals.lock().unwrap().push("skip_waiting");
    }

    async fn claim_clients(&self) {
        self.signals.lock().unwrap().push("claim_clients");
    }
}

/// Memory storage whose `delete` fails for one cache name.
pub struct FailingDeleteStorage {
    pub inner: MemoryCacheStorage,
    pub poisoned: String,
}

#[async_trait]
impl CacheStorage for FailingDeleteStorage {
    async fn open(&self, name: &str) -> pwa_sw::Result<()> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> pwa_sw::Result<bool> {
        self.inner.has(name).await
    }

    async fn keys(&self) -> pwa_sw::Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> pwa_sw::Result<bool> {
        if name == self.poisoned {
            return Err(ServiceWorkerError::CacheError(format!("cannot delete {name}")));
        }
        self.inner.delete(name).await
    }

    async fn match_in(&self, name: &str, request: &Request) -> pwa_sw::Result<Option<CacheEntry>> {
        self.inner.match_in(name, request).await
    }

    async fn put_all_in(&self, name: &str, entries: Vec<CacheEntry>) -> pwa_sw::Result<()> {
        self.inner.put_all_in(name, entries).await
    }

    async fn entries_in(&self, name: &str) -> pwa_sw::Result<Vec<CacheEntry>> {
        self.inner.entries_in(name).await
    }
}
