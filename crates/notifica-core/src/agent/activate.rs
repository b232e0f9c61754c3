use futures::future::try_join_all;
use tracing::info;

use super::Agent;
use crate::error::AgentError;

impl Agent {
    /// Delete every cache generation except the active one, then take control
    /// of open clients. Returns the deleted cache names.
    ///
    /// A failed deletion aborts activation before clients are claimed.
    pub async fn activate(&self) -> Result<Vec<String>, AgentError> {
        info!(cache = %self.cache_name, "Activate: removing stale caches");

        let stale: Vec<String> = self
            .host
            .caches
            .keys()
            .await?
            .into_iter()
            .filter(|name| name != &self.cache_name)
            .collect();

        try_join_all(stale.iter().map(|name| async move {
            info!(cache = %name, "Removing stale cache");
            self.host.caches.delete(name).await
        }))
        .await?;

        self.host.scope.claim().await?;
        Ok(stale)
    }
}
