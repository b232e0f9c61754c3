use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, error, warn};

use super::Agent;
use crate::error::CacheError;
use crate::http::{Request, Response};

/// How the agent answered a fetch event.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the host performs its default network handling.
    Passthrough,
    /// Served from the active cache without touching the network.
    Cached(Response),
    /// Fetched from the network. Cacheable responses are also being written
    /// to the active cache in the background.
    Network(Response),
    /// The network request failed and no response is available.
    NoResponse,
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Cached(r) | FetchOutcome::Network(r) => Some(r),
            FetchOutcome::Passthrough | FetchOutcome::NoResponse => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Cached(r) | FetchOutcome::Network(r) => Some(r),
            FetchOutcome::Passthrough | FetchOutcome::NoResponse => None,
        }
    }
}

/// Completion report for a background cache write.
#[derive(Debug)]
pub struct CacheWrite {
    pub cache_name: String,
    pub url: String,
    pub result: Result<(), CacheError>,
}

impl Agent {
    /// Only same-origin `GET` requests are intercepted.
    pub fn intercepts(&self, request: &Request) -> bool {
        request.method == Method::GET && request.url.origin() == self.origin.origin()
    }

    /// Answer a request cache-first, falling back to the network.
    ///
    /// Cache hits are returned verbatim with no freshness check. On a miss a
    /// `200` same-origin network response is stored by a detached task while
    /// the original is returned, so a slow write never delays the page.
    pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
        if !self.intercepts(&request) {
            return FetchOutcome::Passthrough;
        }

        match self.host.caches.match_request(&self.cache_name, &request).await {
            Ok(Some(response)) => {
                debug!(url = %request.url, "Serving from cache");
                return FetchOutcome::Cached(response);
            }
            Ok(None) => debug!(url = %request.url, "Cache miss"),
            Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed, using network"),
        }

        let response = match self.host.network.fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                error!(url = %request.url, error = %e, "Fetch failed");
                return FetchOutcome::NoResponse;
            }
        };

        if !response.is_cacheable() {
            debug!(
                url = %request.url,
                status = %response.status,
                response_type = ?response.response_type,
                "Response not cacheable"
            );
            return FetchOutcome::Network(response);
        }

        self.spawn_cache_write(request, response.clone());
        FetchOutcome::Network(response)
    }

    fn spawn_cache_write(&self, request: Request, response: Response) {
        let caches = Arc::clone(&self.host.caches);
        let cache_name = self.cache_name.clone();
        let tx = self.cache_writes.clone();

        tokio::spawn(async move {
            let result = caches.put(&cache_name, &request, response).await;
            match &result {
                Ok(()) => debug!(cache = %cache_name, url = %request.url, "Cached network response"),
                Err(e) => warn!(cache = %cache_name, url = %request.url, error = %e, "Failed to cache response"),
            }

            if let Some(tx) = tx {
                let write = CacheWrite {
                    cache_name,
                    url: request.url.to_string(),
                    result,
                };
                if tx.send(write).await.is_err() {
                    debug!("Cache write channel closed");
                }
            }
        });
    }
}
