//! Agent configuration management.
//!
//! This module handles loading the agent configuration: the origin it
//! controls, the cache generation, the pre-cache manifest and the
//! notification defaults.
//!
//! Configuration is read from `~/.config/notifica/config.json` when present,
//! then overridden by `NOTIFICA_*` environment variables. The cache version
//! can also be baked in at build time through `NOTIFICA_CACHE_VERSION`, so a
//! deployment pipeline bumps the generation without editing source.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::push::NotificationDefaults;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "notifica";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_ORIGIN: &str = "http://localhost:8080";

const DEFAULT_CACHE_PREFIX: &str = "notifica-pwa-cache";

/// Generation used when neither the build nor the environment supplies one.
const FALLBACK_CACHE_VERSION: &str = "v7";

/// Page shell, stylesheet, web manifest, icon set, platform-brand icons and
/// notification sounds.
const DEFAULT_PRECACHE: &[&str] = &[
    "/",
    "/index.html",
    "/assets/css/style.css",
    "/manifest.json",
    "/assets/icons/icon-72x72.png",
    "/assets/icons/icon-96x96.png",
    "/assets/icons/icon-128x128.png",
    "/assets/icons/icon-144x144.png",
    "/assets/icons/icon-152x152.png",
    "/assets/icons/icon-192x192.png",
    "/assets/icons/icon-384x384.png",
    "/assets/icons/icon-512x512.png",
    "/assets/icons/perfectpay-icon.png",
    "/assets/icons/stripe-icon.png",
    "/assets/icons/transferwise-icon.png",
    "/assets/sounds/notification1.mp3",
    "/assets/sounds/notification2.mp3",
];

pub const ENV_ORIGIN: &str = "NOTIFICA_ORIGIN";
pub const ENV_CACHE_VERSION: &str = "NOTIFICA_CACHE_VERSION";
pub const ENV_STRICT_PRECACHE: &str = "NOTIFICA_STRICT_PRECACHE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Origin whose same-origin `GET` requests the agent intercepts.
    pub origin: String,
    pub cache_prefix: String,
    /// Generation identifier. Changing it invalidates every previously
    /// stored entry on the next activation.
    pub cache_version: String,
    /// Root-relative paths stored into the cache at install.
    pub precache: Vec<String>,
    /// Fail install when any manifest asset cannot be stored.
    pub strict_precache: bool,
    pub notification: NotificationDefaults,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            cache_version: option_env!("NOTIFICA_CACHE_VERSION")
                .unwrap_or(FALLBACK_CACHE_VERSION)
                .to_string(),
            precache: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
            strict_precache: false,
            notification: NotificationDefaults::default(),
        }
    }
}

impl AgentConfig {
    /// Load from `path`, or the default config location when `None`, then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `NOTIFICA_*` overrides using `lookup` to read variables.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(origin) = lookup(ENV_ORIGIN) {
            self.origin = origin;
        }
        if let Some(version) = lookup(ENV_CACHE_VERSION) {
            self.cache_version = version;
        }
        if let Some(strict) = lookup(ENV_STRICT_PRECACHE) {
            self.strict_precache = matches!(
                strict.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.cache_prefix.trim().is_empty() {
            return Err(AgentError::Config("cache_prefix must not be empty".to_string()));
        }
        if self.cache_version.trim().is_empty() {
            return Err(AgentError::Config("cache_version must not be empty".to_string()));
        }
        self.origin_url()?;
        Ok(())
    }

    /// Name of the active cache store for this generation.
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.cache_version)
    }

    pub fn origin_url(&self) -> Result<Url, AgentError> {
        let url = Url::parse(&self.origin)
            .map_err(|e| AgentError::Config(format!("invalid origin {:?}: {}", self.origin, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(AgentError::Config(format!(
                "origin must be http or https, got {}",
                other
            ))),
        }
    }

    /// Manifest entries resolved against the origin, in manifest order.
    pub fn precache_urls(&self) -> Result<Vec<Url>, AgentError> {
        let origin = self.origin_url()?;
        self.precache
            .iter()
            .map(|path| {
                origin
                    .join(path)
                    .map_err(|e| AgentError::Config(format!("invalid manifest entry {:?}: {}", path, e)))
            })
            .collect()
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the on-disk cache stores.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
