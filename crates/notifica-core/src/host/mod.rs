//! Traits for the platform services the agent drives.
//!
//! - `Network`: issues requests the cache could not answer
//! - `Notifier`: shows and dismisses notifications
//! - `WorkerScope`: lifecycle control and client windows
//!
//! `TracingNotifier` and `TracingScope` are headless implementations that
//! log every call and keep a record of it.

pub mod logging;

use async_trait::async_trait;

pub use logging::{ScopeCall, TracingNotifier, TracingScope};

use crate::error::{HostError, NetworkError};
use crate::http::{Request, Response};
use crate::push::{Notification, NotificationOptions};

#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(&self, title: &str, options: &NotificationOptions) -> Result<Notification, HostError>;

    async fn close(&self, notification: &Notification) -> Result<(), HostError>;
}

#[async_trait]
pub trait WorkerScope: Send + Sync {
    /// Activate the freshly installed agent without waiting for existing
    /// clients to close.
    async fn skip_waiting(&self) -> Result<(), HostError>;

    /// Take control of already-open clients without a reload.
    async fn claim(&self) -> Result<(), HostError>;

    /// Open (or focus) a window navigated to `url`.
    async fn open_window(&self, url: &str) -> Result<(), HostError>;
}
