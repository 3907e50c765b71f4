use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use super::{Bucket, CacheStorage, EntryInfo, StoredEntry};
use crate::error::StoreError;
use crate::http::{RequestKey, Response};

const ENTRY_EXTENSION: &str = "json";

/// Distinguishes temp files of concurrent writers for the same key
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Buckets persisted under a root directory.
///
/// Each bucket is a directory named by the hex encoding of its name, each
/// entry a JSON file named by the SHA-256 of its request key. Entries are
/// written to a temp file and renamed into place, so readers only ever see
/// a complete response.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        self.root.join(hex::encode(name))
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Bucket>, StoreError> {
        let dir = self.bucket_path(name);
        fs::create_dir_all(&dir).await?;
        Ok(Arc::new(DiskBucket {
            name: name.to_string(),
            dir,
        }))
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let dir = self.bucket_path(name);
        if !fs::try_exists(&dir).await? {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).await?;
        debug!(bucket = name, "Deleted bucket directory");
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let decoded = hex::decode(file_name.to_string_lossy().as_bytes())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok());
            match decoded {
                Some(name) => names.push(name),
                None => debug!(dir = ?file_name, "Skipping foreign directory in cache root"),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn has(&self, name: &str) -> Result<bool, StoreError> {
        Ok(fs::try_exists(self.bucket_path(name)).await?)
    }
}

pub struct DiskBucket {
    name: String,
    dir: PathBuf,
}

impl DiskBucket {
    fn entry_path(&self, key: &RequestKey) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.to_string());
        let hash = hasher.finalize();
        self.dir.join(format!("{:x}.{}", hash, ENTRY_EXTENSION))
    }

    async fn read_entry(path: &Path) -> Result<StoredEntry, StoreError> {
        let contents = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[async_trait]
impl Bucket for DiskBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: RequestKey, response: Response) -> Result<(), StoreError> {
        let path = self.entry_path(&key);
        let entry = StoredEntry::new(key, response);
        let contents = serde_json::to_vec(&entry)?;

        // The bucket may have been removed since it was opened, by `clear_all`
        // or another process sharing the root. Unlike the memory store, where
        // the write lands in a detached bucket, this recreates the bucket.
        fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension(format!(
            "tmp{}-{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, contents).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, key: &RequestKey) -> Result<Option<Response>, StoreError> {
        let path = self.entry_path(key);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let entry = Self::read_entry(&path).await?;
        if &entry.key != key {
            return Err(StoreError::Corrupt(format!(
                "entry {} holds {} instead of {}",
                path.display(),
                entry.key,
                key
            )));
        }
        Ok(Some(entry.response))
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool, StoreError> {
        let path = self.entry_path(key);
        if !fs::try_exists(&path).await? {
            return Ok(false);
        }
        fs::remove_file(&path).await?;
        Ok(true)
    }

    async fn entries(&self) -> Result<Vec<EntryInfo>, StoreError> {
        let mut infos = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(infos),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            match Self::read_entry(&path).await {
                Ok(stored) => infos.push(stored.info()),
                Err(e) => {
                    warn!(bucket = %self.name, path = %path.display(), error = %e, "Skipping unreadable cache entry");
                }
            }
        }
        infos.sort_by(|a, b| a.key.url.cmp(&b.key.url).then(a.key.method.cmp(&b.key.method)));
        Ok(infos)
    }
}
