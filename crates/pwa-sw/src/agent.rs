//! The offline cache agent: install, activate and fetch handlers.

use std::fmt;
use std::sync::Arc;

use futures::future::try_join_all;
use pwa_net::{Fetcher, Request, Response};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage};
use crate::config::AgentConfig;
use crate::platform::Platform;
use crate::{Result, ServiceWorkerError};

/// Offline cache agent for one deployed version.
///
/// Each handler returns a future the host awaits before it treats the
/// lifecycle step as finished.
pub struct OfflineAgent {
    config: AgentConfig,
    core_assets: Vec<Url>,
    root_url: Url,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    platform: Arc<dyn Platform>,
}

impl fmt::Debug for OfflineAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineAgent")
            .field("cache_name", &self.config.cache_name)
            .field("scope", &self.config.scope.as_str())
            .field("core_assets", &self.core_assets.len())
            .finish()
    }
}

impl OfflineAgent {
    /// Create an agent. Fails if the configuration does not validate.
    pub fn new(
        config: AgentConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        platform: Arc<dyn Platform>,
    ) -> Result<Self> {
        config.validate()?;
        let core_assets = config.core_asset_urls()?;
        let root_url = config.root_url()?;

        Ok(Self {
            config,
            core_assets,
            root_url,
            storage,
            fetcher,
            platform,
        })
    }

    /// Name of the current cache.
    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Absolute URLs pre-cached at install.
    pub fn core_assets(&self) -> &[Url] {
        &self.core_assets
    }

    /// Install: fetch every core asset and store them in the current cache.
    ///
    /// Any failed fetch or non-2xx response fails the install and nothing
    /// from this attempt is stored.
    pub async fn install(&self) -> Result<()> {
        info!(cache = %self.cache_name(), assets = self.core_assets.len(), "Installing");

        self.platform.skip_waiting().await;
        self.storage.open(self.cache_name()).await?;

        let fetches = self.core_assets.iter().map(|url| self.fetch_core_asset(url));
        let entries = try_join_all(fetches).await?;
        self.storage.put_all_in(self.cache_name(), entries).await?;

        info!(cache = %self.cache_name(), "Core assets cached");
        Ok(())
    }

    async fn fetch_core_asset(&self, url: &Url) -> Result<CacheEntry> {
        let request = Request::get(url.clone());
        let response = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|e| ServiceWorkerError::InstallFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.ok() {
            return Err(ServiceWorkerError::InstallFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status),
            });
        }

        debug!(url = %url, bytes = response.body.len(), "Fetched core asset");
        Ok(CacheEntry::from_response(&request, &response))
    }

    /// Activate: delete every cache except the current one, then claim
    /// clients. Returns the names of the deleted caches.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let current = self.cache_name();
        let stale: Vec<String> = self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter(|name| name != current)
            .collect();

        try_join_all(stale.iter().map(|name| async move {
            let existed = self.storage.delete(name).await?;
            debug!(cache = %name, existed, "Deleted stale cache");
            Ok::<_, ServiceWorkerError>(())
        }))
        .await?;

        info!(cache = %current, deleted = stale.len(), "Activated");
        self.platform.claim_clients().await;
        Ok(stale)
    }

    /// Fetch: route an intercepted request.
    ///
    /// `Ok(None)` means the agent has no response to give; the host should
    /// fail the request.
    pub async fn handle_fetch(&self, request: &Request) -> Result<Option<Response>> {
        if request.is_navigation() {
            self.network_first(request).await
        } else {
            self.cache_first(request).await.map(Some)
        }
    }

    async fn network_first(&self, request: &Request) -> Result<Option<Response>> {
        match self.fetcher.fetch(request).await {
            Ok(response) => Ok(Some(response)),
            Err(e) => {
                warn!(url = %request.url, error = %e, "Navigation failed, falling back to cache");
                let fallback = Request::get(self.root_url.clone());
                match self.storage.match_in(self.cache_name(), &fallback).await? {
                    Some(entry) => Ok(Some(entry.to_response()?)),
                    None => {
                        warn!(url = %self.root_url, "No cached fallback for navigation");
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn cache_first(&self, request: &Request) -> Result<Response> {
        if let Some(entry) = self.storage.match_in(self.cache_name(), request).await? {
            debug!(url = %request.url, "Cache hit");
            return entry.to_response();
        }

        debug!(url = %request.url, "Cache miss, fetching");
        Ok(self.fetcher.fetch(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::platform::NoopPlatform;
    use async_trait::async_trait;
    use pwa_net::http::StatusCode;
    use pwa_net::NetError;

    struct StaticFetcher;

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, request: &Request) -> std::result::Result<Response, NetError> {
            Ok(Response::new(request.url.clone(), StatusCode::OK, "net"))
        }
    }

    fn agent(config: AgentConfig) -> Result<OfflineAgent> {
        OfflineAgent::new(
            config,
            Arc::new(MemoryCacheStorage::new()),
            Arc::new(StaticFetcher),
            Arc::new(NoopPlatform),
        )
    }

    #[test]
    fn test_new_resolves_core_assets() {
        let agent = agent(AgentConfig::default()).unwrap();
        assert_eq!(agent.cache_name(), "movie-pwa-v1");
        assert_eq!(agent.core_assets()[2].as_str(), "http://localhost:8000/static/sw.js");
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = AgentConfig {
            cache_name: String::new(),
            ..AgentConfig::default()
        };
        assert!(matches!(agent(config), Err(ServiceWorkerError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_install_then_serve_from_cache() {
        let agent = agent(AgentConfig::default()).unwrap();
        agent.install().await.unwrap();

        let request = Request::get(agent.core_assets()[1].clone());
        let response = agent.handle_fetch(&request).await.unwrap().unwrap();
        assert!(response.from_cache);
        assert_eq!(&response.body[..], b"net");
    }
}
