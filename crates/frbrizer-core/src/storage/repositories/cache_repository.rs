use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::Result;

pub trait CacheRepository {
    /// Marks `(namespace, key, scope)` for `ttl_secs`. Returns `true` when the
    /// entry was already present and unexpired, `false` when this call set it.
    fn check_and_set(&self, namespace: &str, key: &str, scope: &str, ttl_secs: u64) -> Result<bool>;
    fn remove(&self, namespace: &str, key: &str, scope: &str) -> Result<()>;
    fn purge_expired(&self) -> Result<usize>;
}

pub struct SqliteCacheRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCacheRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl<'a> CacheRepository for SqliteCacheRepository<'a> {
    fn check_and_set(&self, namespace: &str, key: &str, scope: &str, ttl_secs: u64) -> Result<bool> {
        let now = Utc::now().timestamp();
        let expires_at = now.saturating_add(ttl_secs as i64);

        // A single statement keeps the check and the set atomic on a shared file.
        let changed = self.conn.execute(
            "INSERT INTO cache_entries (namespace, key, scope, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, key, scope) DO UPDATE SET expires_at = excluded.expires_at
             WHERE cache_entries.expires_at <= ?5",
            params![namespace, key, scope, expires_at, now],
        )?;
        Ok(changed == 0)
    }

    fn remove(&self, namespace: &str, key: &str, scope: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2 AND scope = ?3",
            params![namespace, key, scope],
        )?;
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![Utc::now().timestamp()],
        )?;
        Ok(removed)
    }
}
