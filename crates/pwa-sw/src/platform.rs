//! Control signals the agent sends to its host.

use async_trait::async_trait;
use tracing::debug;

/// Host-side effects requested by the lifecycle handlers.
///
/// Both calls are fire-and-forget: the agent does not wait on the host to
/// act on them.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Activate this version as soon as it has installed instead of waiting
    /// for every page of the previous version to close.
    async fn skip_waiting(&self);

    /// Take control of every open client without a reload.
    async fn claim_clients(&self);
}

/// A platform that ignores every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPlatform;

#[async_trait]
impl Platform for NoopPlatform {
    async fn skip_waiting(&self) {
        debug!("skip_waiting ignored");
    }

    async fn claim_clients(&self) {
        debug!("claim_clients ignored");
    }
}
