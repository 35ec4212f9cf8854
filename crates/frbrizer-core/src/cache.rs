use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::storage::database::Database;

/// Shared "seen" markers keyed by `(namespace, key, scope)`.
///
/// The matcher uses it to skip identifiers already expanded in the current
/// run; the cluster service uses it as a per-record processing guard.
pub trait IdentifierCache: Send + Sync {
    /// Returns `true` if the entry was already set (and unexpired). Otherwise
    /// sets it and returns `false`.
    fn check_and_set(&self, namespace: &str, key: &str, scope: &str) -> Result<bool>;

    fn remove(&self, namespace: &str, key: &str, scope: &str) -> Result<()>;
}

type CacheKey = (String, String, String);

/// Process-local cache with per-entry expiry.
pub struct MemoryCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, Instant>>,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|expires| **expires > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Instant>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl IdentifierCache for MemoryCache {
    fn check_and_set(&self, namespace: &str, key: &str, scope: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.lock();
        let entry = (namespace.to_string(), key.to_string(), scope.to_string());

        if let Some(expires) = entries.get(&entry)
            && *expires > now
        {
            return Ok(true);
        }
        entries.insert(entry, now + self.ttl);
        Ok(false)
    }

    fn remove(&self, namespace: &str, key: &str, scope: &str) -> Result<()> {
        self.lock()
            .remove(&(namespace.to_string(), key.to_string(), scope.to_string()));
        Ok(())
    }
}

/// Cache persisted in the catalog database, visible to every worker and
/// process sharing the file.
pub struct SqliteCache {
    db: Arc<Database>,
    ttl_secs: u64,
}

impl SqliteCache {
    pub fn new(db: Arc<Database>, ttl_secs: u64) -> Self {
        Self { db, ttl_secs }
    }
}

impl IdentifierCache for SqliteCache {
    fn check_and_set(&self, namespace: &str, key: &str, scope: &str) -> Result<bool> {
        self.db
            .cache_check_and_set(namespace, key, scope, self.ttl_secs)
    }

    fn remove(&self, namespace: &str, key: &str, scope: &str) -> Result<()> {
        self.db.cache_remove(namespace, key, scope)
    }
}
