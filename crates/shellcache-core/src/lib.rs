//! shellcache - an offline cache manager for an application shell.
//!
//! A versioned bucket holds the shell resources needed to boot offline.
//! Installing a version provisions its bucket, activating it deletes the
//! buckets of every other version, and each request afterwards is served
//! network-first with the bucket as fallback.
//!
//! ```no_run
//! use std::sync::Arc;
//! use shellcache_core::{CacheManager, DiskStorage, HttpNetwork, LocalHost, ManagerConfig, Worker};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ManagerConfig::load()?;
//! let storage = Arc::new(DiskStorage::new(ManagerConfig::cache_dir()?)?);
//! let manager = CacheManager::new(config, storage, Arc::new(HttpNetwork::new()?))?;
//! let mut worker = Worker::new(manager, Arc::new(LocalHost::new()));
//! worker.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod manager;
pub mod network;
pub mod store;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::ManagerConfig;
pub use error::{CacheError, NetworkError, StoreError};
pub use http::{CacheMode, Request, RequestKey, Response};
pub use lifecycle::{Event, EventOutcome, Host, LifecycleHandlers, LocalHost, Worker, WorkerState};
pub use manager::{CacheManager, CollectReport, Mediation, ProvisionReport};
pub use network::{HttpNetwork, Network};
pub use store::{Bucket, CacheStorage, DiskStorage, EntryInfo, MemoryStorage};

/// Re-exported so hosts can build requests without depending on reqwest.
pub use reqwest::{Method, Url};
