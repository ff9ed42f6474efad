//! Registration host: runs the agent through its lifecycle.
//!
//! The host plays the part a browser plays for a real service worker. It
//! installs a new version (retrying failed installs), keeps it waiting or
//! activates it at once when the agent asked to skip waiting, hands control
//! of open clients to the agent that claimed them, and dispatches fetches.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use hashbrown::HashMap;
use pwa_common::retry_with_backoff;
use pwa_net::{Fetcher, Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::agent::OfflineAgent;
use crate::cache::CacheStorage;
use crate::config::AgentConfig;
use crate::platform::Platform;
use crate::{Result, ServiceWorkerError};

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Install handler running.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Activate handler running.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install/activate failed.
    Redundant,
}

/// Signals the agent raised through [`Platform`] during its handlers.
#[derive(Debug, Default)]
struct WorkerSignals {
    skip_waiting: AtomicBool,
    claim: AtomicBool,
}

#[async_trait]
impl Platform for WorkerSignals {
    async fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    async fn claim_clients(&self) {
        self.claim.store(true, Ordering::SeqCst);
    }
}

// ==================== Service Worker ====================

/// One version of the agent, as tracked by the host.
#[derive(Debug)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,

    /// Version identifier of this worker's agent.
    pub cache_name: String,

    pub state: ServiceWorkerState,

    /// Error message if install or activate failed.
    pub error: Option<String>,

    pub state_changed_at: Instant,

    agent: Arc<OfflineAgent>,
    signals: Arc<WorkerSignals>,
}

impl ServiceWorker {
    fn new(agent: Arc<OfflineAgent>, signals: Arc<WorkerSignals>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            cache_name: agent.cache_name().to_string(),
            state: ServiceWorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
            agent,
            signals,
        }
    }

    fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }

    /// The agent running in this worker.
    pub fn agent(&self) -> &Arc<OfflineAgent> {
        &self.agent
    }
}

// ==================== Clients ====================

/// An open page.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub url: Url,
    /// Worker currently intercepting this page's requests.
    pub controller: Option<ServiceWorkerId>,
}

/// Open pages known to the host.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new, uncontrolled page.
    pub fn open_window(&mut self, url: Url) -> Client {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
        let client = Client {
            id: id.clone(),
            url,
            controller: None,
        };
        self.clients.insert(id, client.clone());
        client
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Clients controlled by a worker.
    pub fn controlled_by(&self, worker: ServiceWorkerId) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| c.controller == Some(worker))
            .collect()
    }

    /// Make `worker` the controller of every client in `scope`. Returns the
    /// ids whose controller changed.
    pub fn claim(&mut self, worker: ServiceWorkerId, scope: &Url) -> Vec<String> {
        self.clients
            .values_mut()
            .filter(|c| c.url.as_str().starts_with(scope.as_str()))
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect()
    }
}

// ==================== Events ====================

/// Events emitted by the registration host.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceWorkerEvent {
    /// A worker moved to a new state.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// Every install attempt for a worker failed.
    InstallFailed {
        worker_id: ServiceWorkerId,
        error: String,
    },
    /// A client is now controlled by another worker.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
}

// ==================== Registration ====================

/// Lifecycle host for the agent versions registered on one scope.
pub struct ServiceWorkerRegistration {
    pub scope: Url,

    pub installing: Option<ServiceWorker>,

    /// Installed but not yet active.
    pub waiting: Option<ServiceWorker>,

    pub active: Option<ServiceWorker>,

    pub clients: Arc<RwLock<Clients>>,

    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerRegistration {
    /// Create a registration with no workers.
    pub fn new(
        scope: Url,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                scope,
                installing: None,
                waiting: None,
                active: None,
                clients: Arc::new(RwLock::new(Clients::new())),
                storage,
                fetcher,
                event_tx,
            },
            event_rx,
        )
    }

    fn transition(&self, worker: &mut ServiceWorker, state: ServiceWorkerState) {
        worker.set_state(state);
        debug!(worker = ?worker.id, cache = %worker.cache_name, ?state, "Worker state changed");
        let _ = self.event_tx.send(ServiceWorkerEvent::StateChange {
            worker_id: worker.id,
            new_state: state,
        });
    }

    /// Register a new version and run its install, retrying per
    /// `config.install_retry`.
    ///
    /// The new worker activates immediately if it asked to skip waiting or
    /// if nothing is active yet; otherwise it stays in `waiting`.
    pub async fn register(&mut self, config: AgentConfig) -> Result<ServiceWorkerId> {
        if config.scope.origin() != self.scope.origin() {
            return Err(ServiceWorkerError::ConfigError(format!(
                "agent scope {} is outside registration scope {}",
                config.scope, self.scope
            )));
        }

        let backoff = config.install_retry.backoff();
        let signals = Arc::new(WorkerSignals::default());
        let agent = Arc::new(OfflineAgent::new(
            config,
            Arc::clone(&self.storage),
            Arc::clone(&self.fetcher),
            signals.clone(),
        )?);

        let mut worker = ServiceWorker::new(Arc::clone(&agent), signals);
        let worker_id = worker.id;
        info!(worker = ?worker_id, cache = %worker.cache_name, "Registering");
        self.transition(&mut worker, ServiceWorkerState::Installing);
        self.installing = Some(worker);

        let installed = retry_with_backoff(&backoff, "install", || {
            let agent = Arc::clone(&agent);
            async move { agent.install().await }
        })
        .await;

        let mut worker = self.installing.take().ok_or_else(|| {
            ServiceWorkerError::StateError("installing worker vanished".to_string())
        })?;

        if let Err(e) = installed {
            warn!(worker = ?worker_id, error = %e, "Install failed");
            worker.error = Some(e.to_string());
            self.transition(&mut worker, ServiceWorkerState::Redundant);
            let _ = self.event_tx.send(ServiceWorkerEvent::InstallFailed {
                worker_id,
                error: e.to_string(),
            });
            return Err(e);
        }

        self.transition(&mut worker, ServiceWorkerState::Installed);
        if let Some(mut replaced) = self.waiting.take() {
            self.transition(&mut replaced, ServiceWorkerState::Redundant);
        }

        let skip = worker.signals.skip_waiting.load(Ordering::SeqCst);
        self.waiting = Some(worker);

        if skip || self.active.is_none() {
            self.activate_waiting().await?;
        }

        Ok(worker_id)
    }

    /// Activate the waiting worker, replacing the active one.
    pub async fn activate_waiting(&mut self) -> Result<()> {
        let mut worker = self
            .waiting
            .take()
            .ok_or_else(|| ServiceWorkerError::StateError("no waiting worker".to_string()))?;

        self.transition(&mut worker, ServiceWorkerState::Activating);

        if let Err(e) = worker.agent.activate().await {
            warn!(worker = ?worker.id, error = %e, "Activate failed");
            worker.error = Some(e.to_string());
            self.transition(&mut worker, ServiceWorkerState::Redundant);
            return Err(e);
        }

        if let Some(mut old) = self.active.take() {
            self.transition(&mut old, ServiceWorkerState::Redundant);
        }
        self.transition(&mut worker, ServiceWorkerState::Activated);

        if worker.signals.claim.load(Ordering::SeqCst) {
            let claimed = self.clients.write().await.claim(worker.id, &self.scope);
            for client_id in claimed {
                let _ = self.event_tx.send(ServiceWorkerEvent::ControllerChange {
                    client_id,
                    worker_id: worker.id,
                });
            }
        }

        info!(worker = ?worker.id, cache = %worker.cache_name, "Worker active");
        self.active = Some(worker);
        Ok(())
    }

    /// Dispatch a request issued by `client_id` (or by the browser itself
    /// for navigations).
    ///
    /// Navigations inside the scope and requests from controlled clients go
    /// through the active agent; everything else goes straight to the network.
    pub async fn handle_fetch(
        &self,
        request: &Request,
        client_id: Option<&str>,
    ) -> Result<Option<Response>> {
        if let Some(agent) = self.controller_for(request, client_id).await {
            return agent.handle_fetch(request).await;
        }

        debug!(url = %request.url, "Uncontrolled request, bypassing agent");
        Ok(Some(self.fetcher.fetch(request).await?))
    }

    async fn controller_for(
        &self,
        request: &Request,
        client_id: Option<&str>,
    ) -> Option<Arc<OfflineAgent>> {
        let active = self.active.as_ref()?;

        let in_scope_navigation =
            request.is_navigation() && request.url.as_str().starts_with(self.scope.as_str());
        let controlled_client = match client_id {
            Some(id) => self
                .clients
                .read()
                .await
                .get(id)
                .is_some_and(|c| c.controller == Some(active.id)),
            None => false,
        };

        (in_scope_navigation || controlled_client).then(|| Arc::clone(&active.agent))
    }

    /// Retire every worker.
    pub fn unregister(&mut self) {
        for mut worker in [self.installing.take(), self.waiting.take(), self.active.take()]
            .into_iter()
            .flatten()
        {
            self.transition(&mut worker, ServiceWorkerState::Redundant);
        }
    }
}
