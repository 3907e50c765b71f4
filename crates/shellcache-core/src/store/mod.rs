//! Named cache buckets holding request-keyed responses.
//!
//! This module provides the storage seam the manager is built on:
//! - `CacheStorage`: open, delete and enumerate buckets by name
//! - `Bucket`: put, get, delete and list entries within one bucket
//!
//! Two implementations are provided, `MemoryStorage` for tests and
//! embedding, and `DiskStorage` for hosts that persist across runs.

pub mod disk;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::http::{RequestKey, Response};

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open the bucket with this name, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn Bucket>, StoreError>;

    /// Delete a bucket. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;

    /// Names of every bucket currently present.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    async fn has(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.keys().await?.iter().any(|k| k == name))
    }
}

#[async_trait]
pub trait Bucket: Send + Sync {
    fn name(&self) -> &str;

    /// Store a response, replacing any previous entry for the key.
    async fn put(&self, key: RequestKey, response: Response) -> Result<(), StoreError>;

    async fn get(&self, key: &RequestKey) -> Result<Option<Response>, StoreError>;

    async fn delete(&self, key: &RequestKey) -> Result<bool, StoreError>;

    async fn entries(&self) -> Result<Vec<EntryInfo>, StoreError>;

    async fn keys(&self) -> Result<Vec<RequestKey>, StoreError> {
        Ok(self.entries().await?.into_iter().map(|e| e.key).collect())
    }
}

/// A captured response as it sits in a bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: RequestKey,
    pub response: Response,
    pub cached_at: DateTime<Utc>,
}

impl StoredEntry {
    pub fn new(key: RequestKey, response: Response) -> Self {
        Self {
            key,
            response,
            cached_at: Utc::now(),
        }
    }

    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            key: self.key.clone(),
            status: self.response.status,
            size: self.response.body.len(),
            cached_at: self.cached_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: RequestKey,
    pub status: u16,
    pub size: usize,
    pub cached_at: DateTime<Utc>,
}

impl EntryInfo {
    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn info_aged(minutes: i64) -> EntryInfo {
        EntryInfo {
            key: RequestKey {
                method: "GET".to_string(),
                url: "http://localhost/".to_string(),
            },
            status: 200,
            size: 0,
            cached_at: Utc::now() - Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_age_display_just_now() {
        assert_eq!(info_aged(0).age_display(), "just now");
        assert_eq!(info_aged(-5).age_display(), "just now");
    }

    #[test]
    fn test_age_display_rounding() {
        assert_eq!(info_aged(45).age_display(), "45m ago");
        assert_eq!(info_aged(80).age_display(), "1h ago");
        assert_eq!(info_aged(100).age_display(), "2h ago");
        assert_eq!(info_aged(1440 + 13 * 60).age_display(), "2d ago");
    }

    #[test]
    fn test_entry_info_from_stored() {
        let key = RequestKey {
            method: "GET".to_string(),
            url: "http://localhost/a".to_string(),
        };
        let entry = StoredEntry::new(key.clone(), Response::new(200, "abc"));
        let info = entry.info();
        assert_eq!(info.key, key);
        assert_eq!(info.size, 3);
        assert_eq!(info.status, 200);
    }
}
