use tracing::{info, warn};

use super::Agent;
use crate::error::AgentError;
use crate::push::{Notification, PushPayload};

impl Agent {
    /// Show a notification for a push message body.
    ///
    /// Missing or malformed payloads are reported as `PushError` and nothing
    /// is displayed.
    pub async fn handle_push(&self, body: Option<&[u8]>) -> Result<Notification, AgentError> {
        let payload = match PushPayload::parse(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Rejected push message");
                return Err(e.into());
            }
        };
        info!(?payload, "Push received");

        let (title, options) = payload.into_notification(&self.config.notification);
        let notification = self.host.notifier.show(&title, &options).await?;
        Ok(notification)
    }

    /// Close the clicked notification and open a window at its URL.
    /// Returns the URL opened.
    pub async fn handle_notification_click(&self, notification: &Notification) -> Result<String, AgentError> {
        info!(id = notification.id, title = %notification.title, "Notification clicked");
        self.host.notifier.close(notification).await?;

        let url = notification.url().to_string();
        self.host.scope.open_window(&url).await?;
        Ok(url)
    }
}
