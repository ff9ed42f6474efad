//! # PWA Service Worker
//!
//! Offline cache agent for the movie PWA.
//!
//! ## Features
//!
//! - **Install**: pre-caches the core assets into the versioned cache
//! - **Activate**: deletes every cache whose name is not the current version
//! - **Fetch**: network-first for navigations (cached `/` as fallback),
//!   cache-first for everything else
//! - **Cache Storage**: pluggable, in-memory or on-disk
//! - **Registration host**: drives installing → waiting → active, retries
//!   failed installs and tracks which clients are controlled
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerRegistration
//!     ├── installing / waiting / active (ServiceWorker)
//!     │       └── OfflineAgent ── Platform (skip_waiting, claim_clients)
//!     └── Clients
//!
//! CacheStorage (MemoryCacheStorage | DiskCacheStorage)
//!     └── Cache
//!             └── (method, url) → CacheEntry
//! ```

use pwa_net::NetError;
use thiserror::Error;

pub mod agent;
pub mod cache;
pub mod config;
pub mod disk;
pub mod platform;
pub mod registration;

pub use agent::OfflineAgent;
pub use cache::{Cache, CacheEntry, CacheKey, CacheStorage, MemoryCacheStorage};
pub use config::{AgentConfig, InstallRetryConfig, CACHE_NAME, CORE_ASSETS};
pub use disk::DiskCacheStorage;
pub use platform::{NoopPlatform, Platform};
pub use registration::{
    Client, Clients, ServiceWorker, ServiceWorkerEvent, ServiceWorkerId,
    ServiceWorkerRegistration, ServiceWorkerState,
};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed for {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
