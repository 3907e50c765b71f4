use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Bucket, CacheStorage, EntryInfo, StoredEntry};
use crate::error::StoreError;
use crate::http::{RequestKey, Response};

/// In-process bucket store. Clones share the same buckets.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    buckets: Arc<RwLock<HashMap<String, Arc<MemoryBucket>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Bucket>, StoreError> {
        let mut buckets = self.buckets.write().await;
        let bucket: Arc<dyn Bucket> = buckets
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryBucket::new(name)))
            .clone();
        Ok(bucket)
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.buckets.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.buckets.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn has(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.buckets.read().await.contains_key(name))
    }
}

pub struct MemoryBucket {
    name: String,
    entries: RwLock<HashMap<RequestKey, StoredEntry>>,
}

impl MemoryBucket {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: RequestKey, response: Response) -> Result<(), StoreError> {
        let entry = StoredEntry::new(key.clone(), response);
        self.entries.write().await.insert(key, entry);
        Ok(())
    }

    async fn get(&self, key: &RequestKey) -> Result<Option<Response>, StoreError> {
        Ok(self.entries.read().await.get(key).map(|e| e.response.clone()))
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool, StoreError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn entries(&self) -> Result<Vec<EntryInfo>, StoreError> {
        let mut infos: Vec<EntryInfo> = self.entries.read().await.values().map(|e| e.info()).collect();
        infos.sort_by(|a, b| a.key.url.cmp(&b.key.url).then(a.key.method.cmp(&b.key.method)));
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(url: &str) -> RequestKey {
        RequestKey {
            method: "GET".to_string(),
            url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_creates_and_reuses_bucket() {
        let storage = MemoryStorage::new();
        let a = storage.open("notes-v1").await.unwrap();
        a.put(key("http://localhost/"), Response::new(200, "root")).await.unwrap();

        let again = storage.open("notes-v1").await.unwrap();
        assert_eq!(again.keys().await.unwrap(), vec![key("http://localhost/")]);
        assert_eq!(storage.keys().await.unwrap(), vec!["notes-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_put_overwrites_entry() {
        let storage = MemoryStorage::new();
        let bucket = storage.open("b").await.unwrap();
        bucket.put(key("http://localhost/a"), Response::new(200, "old")).await.unwrap();
        bucket.put(key("http://localhost/a"), Response::new(200, "new")).await.unwrap();

        let got = bucket.get(&key("http://localhost/a")).await.unwrap().unwrap();
        assert_eq!(got.text(), "new");
        assert_eq!(bucket.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_bucket() {
        let storage = MemoryStorage::new();
        storage.open("old").await.unwrap();
        assert!(storage.has("old").await.unwrap());
        assert!(storage.delete("old").await.unwrap());
        assert!(!storage.delete("old").await.unwrap());
        assert!(!storage.has("old").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_after_bucket_removed_is_detached() {
        let storage = MemoryStorage::new();
        let bucket = storage.open("notes-v1").await.unwrap();
        storage.delete("notes-v1").await.unwrap();

        bucket.put(key("http://localhost/a"), Response::new(200, "a")).await.unwrap();
        assert!(!storage.has("notes-v1").await.unwrap());
        let reopened = storage.open("notes-v1").await.unwrap();
        assert!(reopened.get(&key("http://localhost/a")).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_last_writer_wins() {
        let storage = MemoryStorage::new();
        let bucket = storage.open("b").await.unwrap();
        let writers: Vec<_> = (0..50)
            .map(|i| {
                let bucket = Arc::clone(&bucket);
                tokio::spawn(async move {
                    bucket.put(key("http://localhost/a"), Response::new(200, format!("body {}", i))).await
                })
            })
            .collect();
        for result in futures::future::join_all(writers).await {
            result.unwrap().unwrap();
        }

        assert_eq!(bucket.entries().await.unwrap().len(), 1);
        let stored = bucket.get(&key("http://localhost/a")).await.unwrap().unwrap();
        assert!(stored.text().starts_with("body "));
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let storage = MemoryStorage::new();
        let bucket = storage.open("b").await.unwrap();
        bucket.put(key("http://localhost/a"), Response::new(200, "a")).await.unwrap();
        assert!(bucket.delete(&key("http://localhost/a")).await.unwrap());
        assert!(bucket.get(&key("http://localhost/a")).await.unwrap().is_none());
    }
}
