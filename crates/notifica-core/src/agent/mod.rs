//! The offline-caching and push-notification agent.
//!
//! One `Agent` handles the five platform events:
//! - install: pre-cache the asset manifest, then skip waiting
//! - activate: delete stale cache generations, then claim clients
//! - fetch: cache-first with network fallback and populate
//! - push: show a notification built from the payload
//! - notification click: close it and open its URL
//!
//! Apart from the host-managed cache store the agent keeps no state between
//! events, so handlers take `&self` and may run concurrently.

mod activate;
mod fetch;
mod install;
mod notify;

use std::sync::Arc;

use bytes::Bytes;
use reqwest::Url;
use tokio::sync::mpsc;

pub use fetch::{CacheWrite, FetchOutcome};
pub use install::InstallReport;

use crate::cache::CacheStorage;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::host::{Network, Notifier, WorkerScope};
use crate::http::Request;
use crate::push::Notification;

/// Platform services the agent runs against.
#[derive(Clone)]
pub struct Host {
    pub caches: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Network>,
    pub notifier: Arc<dyn Notifier>,
    pub scope: Arc<dyn WorkerScope>,
}

pub struct Agent {
    config: Arc<AgentConfig>,
    origin: Url,
    cache_name: String,
    host: Host,
    cache_writes: Option<mpsc::Sender<CacheWrite>>,
}

impl Agent {
    pub fn new(config: AgentConfig, host: Host) -> Result<Self, AgentError> {
        config.validate()?;
        let origin = config.origin_url()?;
        let cache_name = config.cache_name();

        Ok(Self {
            config: Arc::new(config),
            origin,
            cache_name,
            host,
            cache_writes: None,
        })
    }

    /// Report every background cache write on `tx` once it settles.
    pub fn with_cache_write_channel(mut self, tx: mpsc::Sender<CacheWrite>) -> Self {
        self.cache_writes = Some(tx);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Name of the active cache store.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Route a platform event to its handler.
    pub async fn dispatch(&self, event: AgentEvent) -> Result<EventOutcome, AgentError> {
        match event {
            AgentEvent::Install => Ok(EventOutcome::Installed(self.install().await?)),
            AgentEvent::Activate => Ok(EventOutcome::Activated(self.activate().await?)),
            AgentEvent::Fetch(request) => Ok(EventOutcome::Fetched(self.handle_fetch(request).await)),
            AgentEvent::Push(body) => {
                let notification = self.handle_push(body.as_deref()).await?;
                Ok(EventOutcome::NotificationShown(notification))
            }
            AgentEvent::NotificationClick(notification) => {
                let url = self.handle_notification_click(&notification).await?;
                Ok(EventOutcome::WindowOpened(url))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    Install,
    Activate,
    Fetch(Request),
    /// Raw push message body, if the message carried one.
    Push(Option<Bytes>),
    NotificationClick(Notification),
}

#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallReport),
    /// Names of the deleted cache generations.
    Activated(Vec<String>),
    Fetched(FetchOutcome),
    NotificationShown(Notification),
    WindowOpened(String),
}
