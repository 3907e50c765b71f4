//! HTTP network access backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;

use super::Network;
use crate::error::NetworkError;
use crate::http::{CacheMode, Request, Response};

/// HTTP request timeout in seconds.
/// The only timeout in the system; mediation itself never gives up early.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Network client for the origin.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    pub fn new() -> Result<Self, NetworkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| NetworkError::Transport {
                url: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    /// Wrap an already configured client, sharing its connection pool.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn cache_headers(mode: CacheMode) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        if mode == CacheMode::NoStore {
            headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-store"));
            headers.insert(header::PRAGMA, header::HeaderValue::from_static("no-cache"));
        }
        headers
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request, mode: CacheMode) -> Result<Response, NetworkError> {
        let url = request.url.to_string();

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .headers(Self::cache_headers(mode))
            .send()
            .await
            .map_err(|e| NetworkError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        // Only hand back a response once the whole body is in memory
        let body = response.bytes().await.map_err(|e| NetworkError::Body {
            url: url.clone(),
            message: e.to_string(),
        })?;

        debug!(url = %url, status, bytes = body.len(), ?mode, "Network fetch complete");

        Ok(Response {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}
