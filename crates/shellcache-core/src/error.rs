use thiserror::Error;

use crate::http::{RequestKey, Response};

#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Failed to read response body from {url}: {message}")]
    Body { url: String, message: String },
}

impl NetworkError {
    pub fn url(&self) -> &str {
        match self {
            NetworkError::Transport { url, .. } | NetworkError::Body { url, .. } => url,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode or decode entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Provisioning failed for {url}: {reason}")]
    Provision { url: String, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("No cached response for {key} after network failure: {source}")]
    Unavailable {
        key: RequestKey,
        #[source]
        source: NetworkError,
    },

    #[error("Invalid lifecycle transition: {0}")]
    Lifecycle(String),
}

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl CacheError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// A shell resource answered with a non-ok status.
    pub fn from_status(url: &str, response: &Response) -> Self {
        let body = response.text();
        CacheError::Provision {
            url: url.to_string(),
            reason: format!("Status {}: {}", response.status, Self::truncate_body(&body)),
        }
    }
}
