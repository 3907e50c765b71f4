//! Test doubles for the network and storage seams.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{NetworkError, StoreError};
use crate::http::{CacheMode, Request, Response};
use crate::network::Network;
use crate::store::{Bucket, CacheStorage, MemoryStorage};

/// Network that answers from a script. Unscripted URLs fail like an
/// unplugged cable.
#[derive(Clone, Default)]
pub struct ScriptedNetwork {
    routes: Arc<Mutex<HashMap<String, Response>>>,
    calls: Arc<Mutex<Vec<(String, CacheMode)>>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: Response) {
        self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    pub fn go_offline(&self, url: &str) {
        self.routes.lock().unwrap().remove(url);
    }

    pub fn calls(&self) -> Vec<(String, CacheMode)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request, mode: CacheMode) -> Result<Response, NetworkError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push((url.clone(), mode));
        self.routes
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .ok_or(NetworkError::Transport {
                url,
                message: "connection refused".to_string(),
            })
    }
}

/// Memory storage whose deletion of selected buckets always fails, and
/// whose enumeration can be made to fail.
#[derive(Clone, Default)]
pub struct StubbornStorage {
    pub inner: MemoryStorage,
    stuck: Arc<Mutex<HashSet<String>>>,
    keys_refused: Arc<AtomicBool>,
}

impl StubbornStorage {
    pub fn refuse_delete(&self, name: &str) {
        self.stuck.lock().unwrap().insert(name.to_string());
    }

    pub fn refuse_keys(&self) {
        self.keys_refused.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStorage for StubbornStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Bucket>, StoreError> {
        self.inner.open(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        if self.stuck.lock().unwrap().contains(name) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("bucket {} is locked", name),
            )));
        }
        self.inner.delete(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        if self.keys_refused.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "cache root is unreadable",
            )));
        }
        self.inner.keys().await
    }
}
