//! Agent configuration

use std::path::Path;
use std::time::Duration;

use pwa_common::Backoff;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Cache name of the deployed version.
pub const CACHE_NAME: &str = "movie-pwa-v1";

/// Assets the app cannot run without.
pub const CORE_ASSETS: [&str; 5] = [
    "/",
    "/static/manifest.webmanifest",
    "/static/sw.js",
    "/static/icons/icon-192.png",
    "/static/icons/icon-512.png",
];

/// Offline agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Origin the agent controls; core asset paths resolve against it
    pub scope: Url,

    /// Version identifier, used as the name of the current cache
    pub cache_name: String,

    /// Paths pre-cached at install, in order
    pub core_assets: Vec<String>,

    /// Path served from cache when a navigation cannot reach the network
    pub root_path: String,

    /// How the registration host retries a failed install
    pub install_retry: InstallRetryConfig,
}

/// Install retries. The pause grows by `backoff_factor` after each failure,
/// up to `max_delay_ms`, with up to `jitter` of it added at random.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallRetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            scope: Url::parse("http://localhost:8000/").expect("static URL is valid"),
            cache_name: CACHE_NAME.to_string(),
            core_assets: CORE_ASSETS.iter().map(|s| s.to_string()).collect(),
            root_path: "/".to_string(),
            install_retry: InstallRetryConfig::default(),
        }
    }
}

impl Default for InstallRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl InstallRetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            attempts: self.max_attempts,
            base: Duration::from_millis(self.initial_delay_ms),
            cap: Duration::from_millis(self.max_delay_ms),
            factor: self.backoff_factor,
            jitter: self.jitter,
        }
    }
}

impl AgentConfig {
    /// Default configuration for another origin.
    pub fn for_scope(scope: Url) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ServiceWorkerError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::ConfigError(
                "cache_name must not be empty".to_string(),
            ));
        }
        if self.scope.cannot_be_a_base() {
            return Err(ServiceWorkerError::ConfigError(format!(
                "scope {} cannot be a base URL",
                self.scope
            )));
        }
        self.core_asset_urls()?;
        self.root_url()?;
        Ok(())
    }

    /// Resolve a path against the scope.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.scope
            .join(path)
            .map_err(|e| ServiceWorkerError::ConfigError(format!("bad path {path:?}: {e}")))
    }

    /// Absolute URLs of the core assets.
    pub fn core_asset_urls(&self) -> Result<Vec<Url>> {
        self.core_assets.iter().map(|p| self.resolve(p)).collect()
    }

    /// Absolute URL of the navigation fallback.
    pub fn root_url(&self) -> Result<Url> {
        self.resolve(&self.root_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_deployed_constants() {
        let config = AgentConfig::default();
        assert_eq!(config.cache_name, "movie-pwa-v1");
        assert_eq!(config.core_assets.len(), 5);
        assert_eq!(config.core_assets[0], "/");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_core_assets_resolve_against_scope() {
        let config = AgentConfig::for_scope(Url::parse("https://movies.example/app/").unwrap());
        let urls = config.core_asset_urls().unwrap();

        assert_eq!(urls[0].as_str(), "https://movies.example/");
        assert_eq!(
            urls[4].as_str(),
            "https://movies.example/static/icons/icon-512.png"
        );
        assert_eq!(config.root_url().unwrap().as_str(), "https://movies.example/");
    }

    #[test]
    fn test_empty_cache_name_rejected() {
        let config = AgentConfig {
            cache_name: "  ".to_string(),
            ..AgentConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ServiceWorkerError::ConfigError(_))
        ));
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(
            &path,
            r#"{ "scope": "https://movies.example/", "cache_name": "movie-pwa-v2" }"#,
        )
        .unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.cache_name, "movie-pwa-v2");
        assert_eq!(config.core_assets.len(), 5);
        assert_eq!(config.install_retry, InstallRetryConfig::default());
    }

    #[test]
    fn test_install_retry_backoff() {
        let backoff = InstallRetryConfig {
            max_attempts: 4,
            initial_delay_ms: 10,
            max_delay_ms: 20,
            backoff_factor: 3.0,
            jitter: 0.0,
        }
        .backoff();
        assert_eq!(backoff.attempts, 4);
        assert_eq!(backoff.pause_after(1), Duration::from_millis(10));
        assert_eq!(backoff.pause_after(2), Duration::from_millis(20));
    }

    #[test]
    fn test_install_retry_partial_json() {
        let retry: InstallRetryConfig =
            serde_json::from_str(r#"{ "max_attempts": 5, "jitter": 0.0 }"#).unwrap();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.backoff_factor, 2.0);
        assert_eq!(retry.backoff().pause_after(1), Duration::from_millis(500));
    }
}
