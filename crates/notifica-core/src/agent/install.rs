use futures::future::join_all;
use reqwest::{StatusCode, Url};
use tracing::{error, info};

use super::Agent;
use crate::error::{AgentError, PrecacheError, PrecacheFailure};
use crate::http::{Request, ResponseType};

/// What an install stored, and what it could not.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub cache_name: String,
    pub stored: Vec<String>,
    pub failed: Vec<PrecacheFailure>,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Agent {
    /// Pre-cache the asset manifest into the active store, then ask the host
    /// to activate this agent immediately.
    ///
    /// Pre-caching is best-effort: failed assets are logged and the install
    /// still completes, unless `strict_precache` is set, in which case the
    /// `PrecacheError` is returned and the host is not asked to skip waiting.
    pub async fn install(&self) -> Result<InstallReport, AgentError> {
        info!(cache = %self.cache_name, "Install: pre-caching asset manifest");
        self.host.caches.open(&self.cache_name).await?;
        info!(cache = %self.cache_name, "Cache opened");

        let urls = self.config.precache_urls()?;
        let total = urls.len();
        let results = join_all(urls.into_iter().map(|url| self.precache_one(url))).await;

        let mut stored = Vec::new();
        let mut failed = Vec::new();
        for result in results {
            match result {
                Ok(url) => stored.push(url),
                Err(failure) => failed.push(failure),
            }
        }

        if !failed.is_empty() {
            let err = PrecacheError {
                cache_name: self.cache_name.clone(),
                total,
                failed: failed.clone(),
            };
            error!(error = %err, "Some assets could not be cached");
            for failure in &failed {
                error!(url = %failure.url, reason = %failure.reason, "Failed to cache asset");
            }
            if self.config.strict_precache {
                return Err(err.into());
            }
        }

        self.host.scope.skip_waiting().await?;
        info!(cache = %self.cache_name, stored = stored.len(), failed = failed.len(), "Install complete");

        Ok(InstallReport {
            cache_name: self.cache_name.clone(),
            stored,
            failed,
        })
    }

    async fn precache_one(&self, url: Url) -> Result<String, PrecacheFailure> {
        let request = Request::get(url.clone());
        let response = self
            .host
            .network
            .fetch(&request)
            .await
            .map_err(|e| PrecacheFailure::new(url.as_str(), e.to_string()))?;

        // Same cacheability rule as the fetch path.
        if response.status != StatusCode::OK {
            return Err(PrecacheFailure::from_status(url.as_str(), response.status));
        }
        if response.response_type != ResponseType::Basic {
            return Err(PrecacheFailure::new(
                url.as_str(),
                format!("Response type {:?}", response.response_type),
            ));
        }

        self.host
            .caches
            .put(&self.cache_name, &request, response)
            .await
            .map_err(|e| PrecacheFailure::new(url.as_str(), e.to_string()))?;

        Ok(url.into())
    }
}
