//! Lifecycle dispatch between a host and the cache manager.
//!
//! The host delivers three events: `Install`, `Activate` and `Fetch`. A
//! `Worker` routes each one to the matching `LifecycleHandlers` callback
//! and tracks which state the worker is in, so fetches are only mediated
//! once activation (and with it bucket collection) has finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::http::Request;
use crate::manager::{CollectReport, Mediation, ProvisionReport};

/// Capabilities the host environment grants the worker.
/// Both calls are one-shot and idempotent.
pub trait Host: Send + Sync {
    /// Become eligible for control without waiting for old consumers.
    fn skip_waiting(&self);

    /// Take control of consumers that are already open.
    fn claim(&self);
}

/// In-process host that records the signals it received.
#[derive(Debug, Default)]
pub struct LocalHost {
    waiting_skipped: AtomicBool,
    claimed: AtomicBool,
}

impl LocalHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_waiting_skipped(&self) -> bool {
        self.waiting_skipped.load(Ordering::SeqCst)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }
}

impl Host for LocalHost {
    fn skip_waiting(&self) {
        if !self.waiting_skipped.swap(true, Ordering::SeqCst) {
            debug!("Host: skip waiting");
        }
    }

    fn claim(&self) {
        if !self.claimed.swap(true, Ordering::SeqCst) {
            debug!("Host: claimed open consumers");
        }
    }
}

#[async_trait]
pub trait LifecycleHandlers: Send + Sync {
    async fn on_provision(&self, host: &dyn Host) -> Result<ProvisionReport, CacheError>;

    async fn on_collect(&self, host: &dyn Host) -> Result<CollectReport, CacheError>;

    async fn on_mediate(&self, request: Request) -> Result<Mediation, CacheError>;
}

#[derive(Debug)]
pub enum Event {
    Install,
    Activate,
    Fetch(Request),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Installed(ProvisionReport),
    Activated(CollectReport),
    Fetched(Mediation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed; the host keeps whatever version it had before.
    Redundant,
}

pub struct Worker<H: LifecycleHandlers> {
    handlers: H,
    host: Arc<dyn Host>,
    state: WorkerState,
}

impl<H: LifecycleHandlers> Worker<H> {
    pub fn new(handlers: H, host: Arc<dyn Host>) -> Self {
        Self {
            handlers,
            host,
            state: WorkerState::Parsed,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn handlers(&self) -> &H {
        &self.handlers
    }

    pub async fn dispatch(&mut self, event: Event) -> Result<EventOutcome, CacheError> {
        match event {
            Event::Install => self.install().await.map(EventOutcome::Installed),
            Event::Activate => self.activate().await.map(EventOutcome::Activated),
            Event::Fetch(request) => self.fetch(request).await.map(EventOutcome::Fetched),
        }
    }

    /// Install then activate, the path taken after `skip_waiting`.
    pub async fn start(&mut self) -> Result<(ProvisionReport, CollectReport), CacheError> {
        let provisioned = self.install().await?;
        let collected = self.activate().await?;
        Ok((provisioned, collected))
    }

    async fn install(&mut self) -> Result<ProvisionReport, CacheError> {
        self.expect_state(WorkerState::Parsed, "install")?;
        self.state = WorkerState::Installing;
        match self.handlers.on_provision(self.host.as_ref()).await {
            Ok(report) => {
                self.state = WorkerState::Installed;
                info!(bucket = %report.bucket, "Worker installed");
                Ok(report)
            }
            Err(e) => {
                self.state = WorkerState::Redundant;
                warn!(error = %e, "Worker install failed");
                Err(e)
            }
        }
    }

    async fn activate(&mut self) -> Result<CollectReport, CacheError> {
        self.expect_state(WorkerState::Installed, "activate")?;
        self.state = WorkerState::Activating;
        let report = self.handlers.on_collect(self.host.as_ref()).await;
        // A failed collection still activates, so the claim must happen here
        if let Err(e) = &report {
            warn!(error = %e, "Bucket collection failed, activating anyway");
            self.host.claim();
        }
        self.state = WorkerState::Activated;
        info!("Worker activated");
        report
    }

    async fn fetch(&self, request: Request) -> Result<Mediation, CacheError> {
        if self.state != WorkerState::Activated {
            debug!(state = ?self.state, url = %request.url, "Worker not in control, passing request through");
            return Ok(Mediation::Passthrough);
        }
        self.handlers.on_mediate(request).await
    }

    fn expect_state(&self, expected: WorkerState, event: &str) -> Result<(), CacheError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CacheError::Lifecycle(format!(
                "cannot {} in state {:?}",
                event, self.state
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::http::Response;
    use crate::manager::CacheManager;
    use crate::store::{CacheStorage, MemoryStorage};
    use crate::testing::{ScriptedNetwork, StubbornStorage};
    use reqwest::Url;

    const ORIGIN: &str = "http://localhost:8080/";

    fn setup(version: &str) -> (MemoryStorage, ScriptedNetwork, Arc<LocalHost>, Worker<CacheManager>) {
        let storage = MemoryStorage::new();
        let network = ScriptedNetwork::new();
        let host = Arc::new(LocalHost::new());
        let config = ManagerConfig::new("notes", version, ORIGIN).with_shell_resources(["/", "/index.html"]);
        let manager =
            CacheManager::new(config, Arc::new(storage.clone()), Arc::new(network.clone())).unwrap();
        let worker = Worker::new(manager, host.clone());
        (storage, network, host, worker)
    }

    fn serve_shell(network: &ScriptedNetwork) {
        network.respond("http://localhost:8080/", Response::new(200, "<html>"));
        network.respond("http://localhost:8080/index.html", Response::new(200, "<html>"));
    }

    fn fetch(path: &str) -> Event {
        Event::Fetch(Request::get(Url::parse(ORIGIN).unwrap().join(path).unwrap()))
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (storage, network, host, mut worker) = setup("v1");
        storage.open("notes-v0").await.unwrap();
        serve_shell(&network);

        let outcome = worker.dispatch(Event::Install).await.unwrap();
        assert!(matches!(outcome, EventOutcome::Installed(_)));
        assert_eq!(worker.state(), WorkerState::Installed);
        assert!(host.is_waiting_skipped());

        let outcome = worker.dispatch(Event::Activate).await.unwrap();
        match outcome {
            EventOutcome::Activated(report) => assert_eq!(report.deleted, vec!["notes-v0".to_string()]),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(worker.state(), WorkerState::Activated);
        assert!(host.is_claimed());

        let outcome = worker.dispatch(fetch("/index.html")).await.unwrap();
        assert_eq!(outcome, EventOutcome::Fetched(Mediation::Network(Response::new(200, "<html>"))));
    }

    #[tokio::test]
    async fn test_failed_install_makes_worker_redundant() {
        let (storage, _network, host, mut worker) = setup("v2");
        storage.open("notes-v1").await.unwrap();

        assert!(matches!(
            worker.dispatch(Event::Install).await,
            Err(CacheError::Provision { .. })
        ));
        assert_eq!(worker.state(), WorkerState::Redundant);
        assert!(!host.is_waiting_skipped());

        // The previous version's bucket is untouched
        assert_eq!(storage.keys().await.unwrap(), vec!["notes-v1".to_string()]);
        assert!(matches!(
            worker.dispatch(Event::Activate).await,
            Err(CacheError::Lifecycle(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_before_activation_passes_through() {
        let (_storage, network, _host, mut worker) = setup("v1");
        serve_shell(&network);
        worker.dispatch(Event::Install).await.unwrap();
        let calls_after_install = network.calls().len();

        let outcome = worker.dispatch(fetch("/styles.css")).await.unwrap();
        assert_eq!(outcome, EventOutcome::Fetched(Mediation::Passthrough));
        assert_eq!(network.calls().len(), calls_after_install);
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let (_storage, _network, _host, mut worker) = setup("v1");
        assert!(matches!(
            worker.dispatch(Event::Activate).await,
            Err(CacheError::Lifecycle(_))
        ));
        assert_eq!(worker.state(), WorkerState::Parsed);
    }

    #[tokio::test]
    async fn test_start_runs_install_and_activate() {
        let (storage, network, host, mut worker) = setup("v3");
        serve_shell(&network);
        storage.open("notes-v2").await.unwrap();

        let (provisioned, collected) = worker.start().await.unwrap();
        assert_eq!(provisioned.bucket, "notes-v3");
        assert_eq!(collected.deleted, vec!["notes-v2".to_string()]);
        assert!(host.is_waiting_skipped() && host.is_claimed());
        assert_eq!(worker.handlers().bucket_name(), "notes-v3");
    }

    #[tokio::test]
    async fn test_activate_claims_even_when_enumeration_fails() {
        let storage = StubbornStorage::default();
        let network = ScriptedNetwork::new();
        let host = Arc::new(LocalHost::new());
        serve_shell(&network);
        let config = ManagerConfig::new("notes", "v1", ORIGIN).with_shell_resources(["/", "/index.html"]);
        let manager =
            CacheManager::new(config, Arc::new(storage.clone()), Arc::new(network.clone())).unwrap();
        let mut worker = Worker::new(manager, host.clone());

        worker.dispatch(Event::Install).await.unwrap();
        storage.refuse_keys();

        assert!(matches!(
            worker.dispatch(Event::Activate).await,
            Err(CacheError::Store(_))
        ));
        assert_eq!(worker.state(), WorkerState::Activated);
        assert!(host.is_claimed());

        // Requests are mediated once activated
        let outcome = worker.dispatch(fetch("/index.html")).await.unwrap();
        assert_eq!(outcome, EventOutcome::Fetched(Mediation::Network(Response::new(200, "<html>"))));
    }

    #[test]
    fn test_host_signals_are_idempotent() {
        let host = LocalHost::new();
        host.claim();
        host.claim();
        assert!(host.is_claimed());
        assert!(!host.is_waiting_skipped());
    }
}
