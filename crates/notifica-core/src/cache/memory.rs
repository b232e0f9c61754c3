use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheStorage};
use crate::error::CacheError;
use crate::http::{Request, Response};

/// In-memory cache storage. Cache names keep their creation order.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<Vec<(String, HashMap<String, CacheEntry>)>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in the named cache, if it exists.
    pub async fn len(&self, name: &str) -> Option<usize> {
        let caches = self.caches.read().await;
        caches
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, entries)| entries.len())
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        if !caches.iter().any(|(n, _)| n == name) {
            caches.push((name.to_string(), HashMap::new()));
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let caches = self.caches.read().await;
        Ok(caches.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut caches = self.caches.write().await;
        let before = caches.len();
        caches.retain(|(n, _)| n != name);
        Ok(caches.len() != before)
    }

    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>, CacheError> {
        let caches = self.caches.read().await;
        let hit = caches
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, entries)| entries.get(&request.cache_key()))
            .filter(|entry| entry.matches(request))
            .map(|entry| entry.response.clone());
        Ok(hit)
    }

    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<(), CacheError> {
        let entry = CacheEntry::new(request, response)?;
        let mut caches = self.caches.write().await;
        let index = match caches.iter().position(|(n, _)| n == name) {
            Some(i) => i,
            None => {
                caches.push((name.to_string(), HashMap::new()));
                caches.len() - 1
            }
        };
        caches[index].1.insert(entry.key.clone(), entry);
        Ok(())
    }
}
