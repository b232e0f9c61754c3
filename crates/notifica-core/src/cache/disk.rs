use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CacheEntry, CacheStorage};
use crate::error::CacheError;
use crate::http::{Request, Response, ResponseType};

/// Extension of the per-cache index file.
const INDEX_EXT: &str = "json";

/// Extension of the per-cache directory holding response bodies.
const BODIES_EXT: &str = "bodies";

/// Suffix for files being written before they are renamed into place.
const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }
}

pub fn age_display(minutes: i64) -> String {
    if minutes < 1 {
        // Clock skew lands here too
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / 1440)
    }
}

/// Index record for a `CacheEntry`. The body lives in a sidecar file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    vary: Vec<(String, Option<String>)>,
    status: u16,
    response_type: ResponseType,
    url: Option<String>,
    headers: Vec<(String, String)>,
    body_file: String,
    body_len: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheFile {
    name: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    next_body_id: u64,
    entries: BTreeMap<String, CachedData<StoredEntry>>,
}

impl CacheFile {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            next_body_id: 0,
            entries: BTreeMap::new(),
        }
    }
}

/// A cache index found in the cache directory.
enum Listing {
    Readable(CacheFile),
    /// Index that failed to parse, named after its file stem.
    Unreadable(String),
}

/// Summary of one on-disk cache.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub name: String,
    pub entries: usize,
    pub last_updated: Option<DateTime<Utc>>,
    /// The index could not be parsed; the next activation or write replaces it.
    pub unreadable: bool,
}

impl CacheStats {
    pub fn age_display(&self) -> String {
        self.last_updated
            .map(|t| age_display((Utc::now() - t).num_minutes()))
            .unwrap_or_else(|| "never".to_string())
    }
}

/// Cache storage persisted on disk.
///
/// Each named cache is a small JSON index (`{stem}.json`) plus a directory of
/// raw body files (`{stem}.bodies/`), so lookups parse metadata only. Index
/// and body files are written to a temporary path and renamed into place.
pub struct DiskCacheStorage {
    cache_dir: PathBuf,
    // Serializes read-modify-write cycles from concurrent cache writes.
    lock: Mutex<()>,
}

impl DiskCacheStorage {
    pub fn new(cache_dir: PathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            lock: Mutex::new(()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn index_path(&self, name: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", file_stem(name), INDEX_EXT))
    }

    fn bodies_dir(&self, name: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", file_stem(name), BODIES_EXT))
    }

    async fn load(&self, name: &str) -> Result<Option<CacheFile>, CacheError> {
        let path = self.index_path(name);
        Self::load_path(&path).await
    }

    async fn load_path(path: &Path) -> Result<Option<CacheFile>, CacheError> {
        // Parsed from bytes so a write cut inside a UTF-8 sequence is still a
        // serialization error.
        match tokio::fs::read(path).await {
            Ok(contents) => Ok(Some(serde_json::from_slice(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the named index, replacing an unreadable one with an empty cache.
    async fn load_or_reset(&self, name: &str) -> Result<(CacheFile, bool), CacheError> {
        match self.load(name).await {
            Ok(Some(file)) => Ok((file, false)),
            Ok(None) => Ok((CacheFile::new(name), true)),
            Err(CacheError::Serialization(e)) => {
                warn!(cache = name, error = %e, "Replacing unreadable cache index");
                remove_dir_if_exists(&self.bodies_dir(name)).await?;
                Ok((CacheFile::new(name), true))
            }
            Err(e) => Err(e),
        }
    }

    async fn save(&self, file: &CacheFile) -> Result<(), CacheError> {
        let contents = serde_json::to_string_pretty(file)?;
        write_atomic(&self.index_path(&file.name), contents.as_bytes()).await
    }

    async fn load_all(&self) -> Result<Vec<Listing>, CacheError> {
        let mut readable = Vec::new();
        let mut unreadable = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.cache_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(INDEX_EXT) {
                continue;
            }
            match Self::load_path(&path).await {
                Ok(Some(file)) => readable.push(file),
                Ok(None) => {}
                Err(e) => {
                    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                    let name = decode_stem(stem);
                    warn!(cache = %name, path = %path.display(), error = %e, "Unreadable cache index");
                    unreadable.push(name);
                }
            }
        }
        readable.sort_by_key(|f| f.created_at);
        unreadable.sort();

        // Unreadable indexes have no creation time; list them as oldest.
        Ok(unreadable
            .into_iter()
            .map(Listing::Unreadable)
            .chain(readable.into_iter().map(Listing::Readable))
            .collect())
    }

    /// Entry counts and last write time for every cache, oldest first.
    pub async fn stats(&self) -> Result<Vec<CacheStats>, CacheError> {
        let _guard = self.lock.lock().await;
        let listings = self.load_all().await?;
        Ok(listings
            .into_iter()
            .map(|listing| match listing {
                Listing::Readable(f) => CacheStats {
                    entries: f.entries.len(),
                    last_updated: f.entries.values().map(|e| e.cached_at).max(),
                    name: f.name,
                    unreadable: false,
                },
                Listing::Unreadable(name) => CacheStats {
                    name,
                    entries: 0,
                    last_updated: None,
                    unreadable: true,
                },
            })
            .collect())
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let _guard = self.lock.lock().await;
        let (file, created) = self.load_or_reset(name).await?;
        if created {
            debug!(cache = name, "Creating cache");
            self.save(&file).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .map(|listing| match listing {
                Listing::Readable(f) => f.name,
                Listing::Unreadable(name) => name,
            })
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let _guard = self.lock.lock().await;
        let existed = match tokio::fs::remove_file(self.index_path(name)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        remove_dir_if_exists(&self.bodies_dir(name)).await?;
        Ok(existed)
    }

    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>, CacheError> {
        let _guard = self.lock.lock().await;
        let file = match self.load(name).await? {
            Some(file) => file,
            None => return Ok(None),
        };
        let key = request.cache_key();
        let stored = match file.entries.get(&key) {
            Some(stored) => &stored.data,
            None => return Ok(None),
        };

        let body_path = self.bodies_dir(name).join(&stored.body_file);
        let body = match tokio::fs::read(&body_path).await {
            Ok(body) if body.len() as u64 == stored.body_len => Bytes::from(body),
            Ok(body) => {
                return Err(corrupt(
                    name,
                    format!("body {} has {} bytes, expected {}", stored.body_file, body.len(), stored.body_len),
                ))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(corrupt(name, format!("body {} missing", stored.body_file)))
            }
            Err(e) => return Err(e.into()),
        };

        let entry = decode_entry(name, key, stored, body)?;
        Ok(entry.matches(request).then_some(entry.response))
    }

    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<(), CacheError> {
        let entry = CacheEntry::new(request, response)?;
        let _guard = self.lock.lock().await;
        let (mut file, _) = self.load_or_reset(name).await?;

        let bodies = self.bodies_dir(name);
        tokio::fs::create_dir_all(&bodies).await?;
        let body_file = format!("{}.bin", file.next_body_id);
        file.next_body_id += 1;
        write_atomic(&bodies.join(&body_file), &entry.response.body).await?;

        let key = entry.key.clone();
        let previous = file
            .entries
            .insert(key, CachedData::new(encode_entry(entry, body_file)));
        self.save(&file).await?;

        if let Some(previous) = previous {
            if let Err(e) = tokio::fs::remove_file(bodies.join(&previous.data.body_file)).await {
                debug!(cache = name, error = %e, "Failed to remove replaced body");
            }
        }
        Ok(())
    }
}

/// Write `contents` next to `path` and rename it into place, so a crash
/// never leaves a truncated file under the final name.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn remove_dir_if_exists(path: &Path) -> Result<(), CacheError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn corrupt(cache: &str, reason: String) -> CacheError {
    CacheError::Corrupt {
        cache: cache.to_string(),
        reason,
    }
}

fn encode_entry(entry: CacheEntry, body_file: String) -> StoredEntry {
    StoredEntry {
        vary: entry.vary,
        status: entry.response.status.as_u16(),
        response_type: entry.response.response_type,
        url: entry.response.url.map(|u| u.to_string()),
        headers: entry.response.headers,
        body_len: entry.response.body.len() as u64,
        body_file,
    }
}

fn decode_entry(cache: &str, key: String, stored: &StoredEntry, body: Bytes) -> Result<CacheEntry, CacheError> {
    let status = StatusCode::from_u16(stored.status)
        .map_err(|e| corrupt(cache, format!("status {}: {}", stored.status, e)))?;
    let url = stored
        .url
        .as_deref()
        .map(Url::parse)
        .transpose()
        .map_err(|e| corrupt(cache, format!("url: {}", e)))?;

    Ok(CacheEntry {
        key,
        vary: stored.vary.clone(),
        response: Response {
            status,
            response_type: stored.response_type,
            url,
            headers: stored.headers.clone(),
            body,
        },
    })
}

/// File-system safe stem for a cache name. Bytes outside `[A-Za-z0-9._-]`
/// are percent-encoded, so distinct names never share a file.
fn file_stem(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => stem.push(byte as char),
            _ => stem.push_str(&format!("%{:02X}", byte)),
        }
    }
    stem
}

/// Inverse of `file_stem`.
fn decode_stem(stem: &str) -> String {
    let raw = stem.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' && i + 3 <= raw.len() {
            let hex = std::str::from_utf8(&raw[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                bytes.push(byte);
                i += 3;
                continue;
            }
        }
        bytes.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
