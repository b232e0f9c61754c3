//! Named request/response cache stores.
//!
//! This module provides the `CacheStorage` trait the agent reads and writes
//! through, plus two implementations:
//! - `MemoryCacheStorage`: process-local, for embedding and tests
//! - `DiskCacheStorage`: a JSON index plus body files per named cache, survives restarts
//!
//! Entries are keyed by request identity (method and URL without fragment).
//! When the stored response carries a `Vary` header, the named request
//! headers must also match for a lookup to hit. `Vary: *` responses are
//! refused at write time.

pub mod disk;
pub mod memory;

use async_trait::async_trait;
use reqwest::Method;

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

use crate::error::CacheError;
use crate::http::{Request, Response};

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the named cache if it does not exist yet.
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    /// Names of all caches, oldest first.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Delete a whole cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Look up `request` in the named cache. A missing cache is a miss.
    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>, CacheError>;

    /// Store `response` for `request`, creating the cache when needed and
    /// replacing any entry with the same identity.
    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<(), CacheError>;
}

/// A stored response together with the request header values it varies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub vary: Vec<(String, Option<String>)>,
    pub response: Response,
}

impl CacheEntry {
    pub fn new(request: &Request, response: Response) -> Result<Self, CacheError> {
        if request.method != Method::GET {
            return Err(CacheError::Unsupported(format!(
                "{} {}",
                request.method, request.url
            )));
        }

        let names = response.vary();
        if names.iter().any(|name| name == "*") {
            return Err(CacheError::Unsupported(format!(
                "{} varies on every request header",
                request.url
            )));
        }

        let vary = names
            .into_iter()
            .map(|name| {
                let value = request.header(&name).map(str::to_string);
                (name, value)
            })
            .collect();

        Ok(Self {
            key: request.cache_key(),
            vary,
            response,
        })
    }

    pub fn matches(&self, request: &Request) -> bool {
        if self.key != request.cache_key() {
            return false;
        }
        self.vary
            .iter()
            .all(|(name, value)| request.header(name) == value.as_deref())
    }
}
