use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt cache entry in {cache}: {reason}")]
    Corrupt { cache: String, reason: String },

    #[error("Request not cacheable: {0}")]
    Unsupported(String),
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Network unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum PushError {
    #[error("Push message carried no payload")]
    MissingPayload,

    #[error("Malformed push payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
#[error("Host operation {operation} failed: {reason}")]
pub struct HostError {
    pub operation: &'static str,
    pub reason: String,
}

impl HostError {
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

/// One manifest asset that could not be stored during install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheFailure {
    pub url: String,
    pub reason: String,
}

impl PrecacheFailure {
    pub fn new(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn from_status(url: impl Into<String>, status: StatusCode) -> Self {
        Self::new(url, format!("Status {}", status))
    }
}

#[derive(Error, Debug, Clone)]
#[error("Failed to pre-cache {} of {total} assets into {cache_name}", .failed.len())]
pub struct PrecacheError {
    pub cache_name: String,
    pub total: usize,
    pub failed: Vec<PrecacheFailure>,
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Precache(#[from] PrecacheError),

    #[error(transparent)]
    Push(#[from] PushError),

    #[error(transparent)]
    Host(#[from] HostError),
}
