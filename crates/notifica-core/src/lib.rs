//! Core library for notifica.
//!
//! notifica is an offline-caching and push-notification agent for a web
//! application. It serves same-origin `GET` requests cache-first, falls back
//! to the network and populates the cache, replaces whole cache generations
//! across deployments, and raises notifications from push messages.
//!
//! The agent never talks to a platform directly. Cache storage, the network,
//! the notification UI and the worker lifecycle are reached through the
//! traits in [`cache`] and [`host`], so the same policy runs behind a browser
//! binding, the `notifica` command-line host, or a test harness.

pub mod agent;
pub mod cache;
pub mod config;
pub mod error;
pub mod host;
pub mod http;
pub mod net;
pub mod push;

pub use agent::{Agent, AgentEvent, CacheWrite, EventOutcome, FetchOutcome, Host, InstallReport};
pub use cache::{CacheStorage, DiskCacheStorage, MemoryCacheStorage};
pub use config::AgentConfig;
pub use error::{AgentError, CacheError, HostError, NetworkError, PrecacheError, PushError};
pub use host::{Network, Notifier, TracingNotifier, TracingScope, WorkerScope};
pub use http::{Request, Response, ResponseType};
pub use net::HttpNetwork;
pub use push::{Notification, NotificationDefaults, NotificationOptions, PushPayload};
