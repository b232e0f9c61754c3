use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::info;

use super::{Notifier, WorkerScope};
use crate::error::HostError;
use crate::push::{Notification, NotificationOptions};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Notifier that logs notifications instead of drawing them.
#[derive(Debug, Default)]
pub struct TracingNotifier {
    next_id: AtomicU64,
    shown: Mutex<Vec<Notification>>,
    closed: Mutex<Vec<u64>>,
}

impl TracingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notification shown so far, including closed ones.
    pub fn shown(&self) -> Vec<Notification> {
        locked(&self.shown).clone()
    }

    /// Ids of closed notifications, in close order.
    pub fn closed(&self) -> Vec<u64> {
        locked(&self.closed).clone()
    }

    /// Notifications shown and not yet closed.
    pub fn visible(&self) -> Vec<Notification> {
        let closed = self.closed();
        self.shown()
            .into_iter()
            .filter(|n| !closed.contains(&n.id))
            .collect()
    }
}

#[async_trait]
impl Notifier for TracingNotifier {
    async fn show(&self, title: &str, options: &NotificationOptions) -> Result<Notification, HostError> {
        let notification = Notification {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            title: title.to_string(),
            options: options.clone(),
        };
        info!(
            id = notification.id,
            title = %notification.title,
            body = %notification.options.body,
            url = %notification.options.data.url,
            "Showing notification"
        );
        locked(&self.shown).push(notification.clone());
        Ok(notification)
    }

    async fn close(&self, notification: &Notification) -> Result<(), HostError> {
        info!(id = notification.id, "Closing notification");
        locked(&self.closed).push(notification.id);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeCall {
    SkipWaiting,
    Claim,
    OpenWindow(String),
}

/// Worker scope that logs lifecycle and window requests.
#[derive(Debug, Default)]
pub struct TracingScope {
    calls: Mutex<Vec<ScopeCall>>,
}

impl TracingScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ScopeCall> {
        locked(&self.calls).clone()
    }

    fn record(&self, call: ScopeCall) {
        locked(&self.calls).push(call);
    }
}

#[async_trait]
impl WorkerScope for TracingScope {
    async fn skip_waiting(&self) -> Result<(), HostError> {
        info!("Skipping wait for existing clients");
        self.record(ScopeCall::SkipWaiting);
        Ok(())
    }

    async fn claim(&self) -> Result<(), HostError> {
        info!("Claiming open clients");
        self.record(ScopeCall::Claim);
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<(), HostError> {
        info!(url, "Opening window");
        self.record(ScopeCall::OpenWindow(url.to_string()));
        Ok(())
    }
}
