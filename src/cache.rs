//! Response cache for completion requests.
//!
//! Keys are the hex SHA-256 of the full rendered request, so a change to the
//! model, the rule text, the codebook or the item list misses the cache.

use crate::service::{CompletionRequest, CompletionService};
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::{debug, warn};

pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    /// Store `value`, replacing any earlier value for `key`
    fn set(&self, key: &str, value: &str);
}

/// Content hash of a request
pub fn request_key(request: &CompletionRequest) -> String {
    let mut hasher = Sha256::new();
    for part in [
        request.model.as_str(),
        request.system.as_str(),
        request.user.as_str(),
    ] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.update(request.temperature.to_le_bytes());

    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), value.to_string());
        }
    }
}

// ============================================================================
// On-disk
// ============================================================================

/// One `<key>.txt` file per entry under a directory
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// Open (creating if needed) a cache directory
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", key))
    }

    fn write_entry(&self, key: &str, value: &str) -> io::Result<()> {
        let tmp = self.dir.join(format!("{}.tmp", key));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, self.entry_path(key))
    }
}

impl ResponseCache for DiskCache {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.entry_path(key)).ok()
    }

    fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.write_entry(key, value) {
            warn!("Failed to write cache entry {}: {}", key, e);
        }
    }
}

// ============================================================================
// Cached service
// ============================================================================

/// Completion service that answers repeated requests from a cache
pub struct CachedService<S, C> {
    inner: S,
    cache: C,
    hits: AtomicUsize,
}

impl<S: CompletionService, C: ResponseCache> CachedService<S, C> {
    pub fn new(inner: S, cache: C) -> Self {
        Self {
            inner,
            cache,
            hits: AtomicUsize::new(0),
        }
    }

    /// Requests answered from the cache so far
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

impl<S: CompletionService, C: ResponseCache> CompletionService for CachedService<S, C> {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let key = request_key(request);
        if let Some(cached) = self.cache.get(&key) {
            debug!("Completion cache hit {}", &key[..12]);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }

        let response = self.inner.complete(request)?;
        self.cache.set(&key, &response);
        Ok(response)
    }
}
