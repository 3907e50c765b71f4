//! The offline cache manager.
//!
//! `CacheManager` owns the three lifecycle duties:
//! - provisioning the shell resources into the current bucket on install
//! - collecting every bucket of another version on activate
//! - mediating each request network-first, falling back to the bucket
//!
//! Storage and network are injected so the same logic runs against the
//! disk store and a real origin in the CLI, and against fakes in tests.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use reqwest::Method;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::error::{CacheError, StoreError};
use crate::http::{CacheMode, Request, RequestKey, Response};
use crate::lifecycle::{Host, LifecycleHandlers};
use crate::network::Network;
use crate::store::{CacheStorage, EntryInfo};

/// Outcome of mediating one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mediation {
    /// Not ours to handle; the host proceeds with its default behavior.
    Passthrough,
    Network(Response),
    Cached(Response),
    /// Synthetic script served when the always-fresh resource is unreachable.
    Placeholder(Response),
}

impl Mediation {
    pub fn response(&self) -> Option<&Response> {
        match self {
            Mediation::Passthrough => None,
            Mediation::Network(r) | Mediation::Cached(r) | Mediation::Placeholder(r) => Some(r),
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Mediation::Passthrough => None,
            Mediation::Network(r) | Mediation::Cached(r) | Mediation::Placeholder(r) => Some(r),
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Mediation::Passthrough => "passthrough",
            Mediation::Network(_) => "network",
            Mediation::Cached(_) => "cache",
            Mediation::Placeholder(_) => "placeholder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub bucket: String,
    pub resources: Vec<RequestKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub kept: Option<String>,
    pub deleted: Vec<String>,
    /// Buckets whose deletion failed, with the error message
    pub failed: Vec<(String, String)>,
}

impl CollectReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct CacheManager {
    config: ManagerConfig,
    bucket_name: String,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheManager {
    pub fn new(
        config: ManagerConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let bucket_name = config.bucket_name();
        Ok(Self {
            config,
            bucket_name,
            storage,
            network,
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    // ===== Provisioning =====

    /// Fetch every shell resource and store them in the current bucket.
    ///
    /// All fetches must succeed with an ok status before anything is
    /// written, so a failed install leaves no half-filled bucket behind.
    pub async fn provision(&self) -> Result<ProvisionReport, CacheError> {
        let urls = self.config.shell_urls()?;
        debug!(bucket = %self.bucket_name, count = urls.len(), "Provisioning shell resources");

        let fetches = urls.into_iter().map(|url| {
            let network = Arc::clone(&self.network);
            async move {
                let request = Request::get(url);
                let response = network
                    .fetch(&request, CacheMode::Default)
                    .await
                    .map_err(|e| CacheError::Provision {
                        url: request.url.to_string(),
                        reason: e.to_string(),
                    })?;
                if !response.is_ok() {
                    return Err(CacheError::from_status(request.url.as_str(), &response));
                }
                Ok((request.key(), response))
            }
        });

        let fetched = match try_join_all(fetches).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(bucket = %self.bucket_name, error = %e, "Install aborted");
                return Err(e);
            }
        };

        let bucket = self.storage.open(&self.bucket_name).await?;
        let mut resources = Vec::with_capacity(fetched.len());
        for (key, response) in fetched {
            bucket.put(key.clone(), response).await?;
            if !resources.contains(&key) {
                resources.push(key);
            }
        }

        info!(bucket = %self.bucket_name, resources = resources.len(), "Shell resources provisioned");
        Ok(ProvisionReport {
            bucket: self.bucket_name.clone(),
            resources,
        })
    }

    // ===== Garbage Collection =====

    /// Delete every bucket that does not belong to the current version.
    /// Deletions run concurrently; one failing does not stop the rest.
    pub async fn collect(&self) -> Result<CollectReport, CacheError> {
        let names = self.storage.keys().await?;
        let (current, stale): (Vec<String>, Vec<String>) =
            names.into_iter().partition(|name| *name == self.bucket_name);

        let deletions = stale.into_iter().map(|name| {
            let storage = Arc::clone(&self.storage);
            async move {
                let result = storage.delete(&name).await;
                (name, result)
            }
        });

        let mut report = CollectReport {
            kept: current.into_iter().next(),
            ..CollectReport::default()
        };
        for (name, result) in join_all(deletions).await {
            match result {
                Ok(_) => {
                    debug!(bucket = %name, "Deleted stale bucket");
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!(bucket = %name, error = %e, "Failed to delete stale bucket");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        info!(
            current = %self.bucket_name,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Bucket collection complete"
        );
        Ok(report)
    }

    // ===== Request Mediation =====

    pub async fn mediate(&self, request: Request) -> Result<Mediation, CacheError> {
        if !request.is_network_scheme() {
            debug!(url = %request.url, "Ignoring non-network request");
            return Ok(Mediation::Passthrough);
        }

        if self.config.is_always_fresh(&request.url) {
            return Ok(self.fetch_fresh(&request).await);
        }

        match self.network.fetch(&request, CacheMode::Default).await {
            Ok(response) => {
                if response.is_ok() && request.method == Method::GET {
                    self.store_in_background(request.key(), response.clone()).await;
                }
                Ok(Mediation::Network(response))
            }
            Err(err) => {
                let key = request.key();
                debug!(key = %key, error = %err, "Network failed, trying cache");
                match self.lookup(&key).await {
                    Some(cached) => Ok(Mediation::Cached(cached)),
                    None => Err(CacheError::Unavailable { key, source: err }),
                }
            }
        }
    }

    /// Network only, never the bucket. Falls back to a stub script.
    async fn fetch_fresh(&self, request: &Request) -> Mediation {
        match self.network.fetch(request, CacheMode::NoStore).await {
            Ok(response) => Mediation::Network(response),
            Err(e) => {
                warn!(url = %request.url, error = %e, "Always-fresh resource unreachable, serving placeholder");
                Mediation::Placeholder(Self::placeholder(request))
            }
        }
    }

    fn placeholder(request: &Request) -> Response {
        // Paths are percent-encoded, so no quote can break the literal
        let body = format!(
            "console.error(\"Failed to load {}: network unavailable\");",
            request.url.path()
        );
        Response::new(200, body)
            .with_header("Content-Type", "application/javascript")
            .with_header("Cache-Control", "no-store")
    }

    async fn lookup(&self, key: &RequestKey) -> Option<Response> {
        let result: Result<Option<Response>, StoreError> = async {
            if !self.storage.has(&self.bucket_name).await? {
                return Ok(None);
            }
            self.storage.open(&self.bucket_name).await?.get(key).await
        }
        .await;

        result.unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Cache lookup failed");
            None
        })
    }

    async fn store_in_background(&self, key: RequestKey, response: Response) {
        let storage = Arc::clone(&self.storage);
        let bucket_name = self.bucket_name.clone();

        let handle = tokio::spawn(async move {
            let result: Result<(), StoreError> = async {
                storage.open(&bucket_name).await?.put(key.clone(), response).await
            }
            .await;
            match result {
                Ok(()) => debug!(bucket = %bucket_name, key = %key, "Cached response"),
                Err(e) => warn!(bucket = %bucket_name, key = %key, error = %e, "Failed to cache response"),
            }
        });

        let mut pending = self.pending.lock().await;
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for every background cache write started so far.
    pub async fn settle(&self) {
        let handles = std::mem::take(&mut *self.pending.lock().await);
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Background cache write did not complete");
            }
        }
    }

    // ===== Administration =====

    /// Delete every bucket, current version included, outside the lifecycle.
    pub async fn clear_all(&self) -> Result<Vec<String>, CacheError> {
        self.settle().await;
        let names = self.storage.keys().await?;
        let deletions = names.into_iter().map(|name| {
            let storage = Arc::clone(&self.storage);
            async move {
                let result = storage.delete(&name).await;
                (name, result)
            }
        });

        let mut deleted = Vec::new();
        let mut first_error = None;
        for (name, result) in join_all(deletions).await {
            match result {
                Ok(_) => deleted.push(name),
                Err(e) => {
                    warn!(bucket = %name, error = %e, "Failed to clear bucket");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => {
                info!(count = deleted.len(), "Cleared all buckets");
                Ok(deleted)
            }
        }
    }

    /// Entries of the current bucket, empty if it was never provisioned.
    pub async fn bucket_entries(&self) -> Result<Vec<EntryInfo>, CacheError> {
        if !self.storage.has(&self.bucket_name).await? {
            return Ok(Vec::new());
        }
        Ok(self.storage.open(&self.bucket_name).await?.entries().await?)
    }

    pub async fn bucket_names(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.storage.keys().await?)
    }
}

#[async_trait]
impl LifecycleHandlers for CacheManager {
    async fn on_provision(&self, host: &dyn Host) -> Result<ProvisionReport, CacheError> {
        let report = self.provision().await?;
        host.skip_waiting();
        Ok(report)
    }

    async fn on_collect(&self, host: &dyn Host) -> Result<CollectReport, CacheError> {
        let report = self.collect().await?;
        host.claim();
        Ok(report)
    }

    async fn on_mediate(&self, request: Request) -> Result<Mediation, CacheError> {
        self.mediate(request).await
    }
}

// ============================================================================
// Tests
// ============================================================================
