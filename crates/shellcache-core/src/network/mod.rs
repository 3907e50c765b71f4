//! Network access for the cache manager.
//!
//! The manager never talks to a socket directly; it goes through the
//! `Network` trait so tests can script responses and failures.
//! `HttpNetwork` is the production implementation over `reqwest`.
//!
//! A `Network` only fails for transport problems. HTTP error statuses come
//! back as ordinary responses and the caller decides what to do with them.

pub mod client;

use async_trait::async_trait;

use crate::error::NetworkError;
use crate::http::{CacheMode, Request, Response};

pub use client::HttpNetwork;

#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request, mode: CacheMode) -> Result<Response, NetworkError>;
}
