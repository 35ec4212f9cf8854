mod connection;
mod migrations;
mod schema;

pub use connection::CatalogConnection;
pub use migrations::{get_applied_versions, run_migrations, Migration};
pub use schema::SCHEMA_VERSION;

use std::path::Path;

use rusqlite::{Connection, Transaction};
use uuid::Uuid;

use crate::error::{CatalogError, Result};
use crate::models::{CatalogStats, Record, Work, WorkSummary};

use super::queries::{CatalogStatsQuery, WorkSearchQuery};
use super::repositories::{
    CacheRepository, RecordRepository, Repository, SqliteCacheRepository, SqliteRecordRepository,
    SqliteWorkRepository, WorkRepository,
};

/// Facade over the catalog store. Cheap reads go through the helpers below;
/// multi-statement writes go through [`Database::with_transaction`].
pub struct Database {
    conn: CatalogConnection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: CatalogConnection::open(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: CatalogConnection::open_in_memory()?,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.conn.file()
    }

    /// Runs `f` inside one transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn with_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> std::result::Result<T, E>,
        E: From<CatalogError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(CatalogError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(CatalogError::from)?;
        Ok(value)
    }

    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    // ─── Records ───────────────────────────────────────────

    pub fn upsert_record(&self, record: &Record) -> Result<Uuid> {
        self.with_transaction(|tx| SqliteRecordRepository::new(tx).upsert(record))
    }

    /// Upserts a batch in one transaction, returning the stored uuids in order.
    pub fn upsert_records(&self, records: &[Record]) -> Result<Vec<Uuid>> {
        self.with_transaction(|tx| {
            let repo = SqliteRecordRepository::new(tx);
            records.iter().map(|r| repo.upsert(r)).collect()
        })
    }

    pub fn get_record(&self, id: &Uuid) -> Result<Record> {
        self.with_connection(|conn| {
            SqliteRecordRepository::new(conn)
                .find_by_id(id)?
                .ok_or_else(|| CatalogError::RecordNotFound(id.to_string()))
        })
    }

    pub fn get_records(&self, ids: &[Uuid]) -> Result<Vec<Record>> {
        self.with_connection(|conn| SqliteRecordRepository::new(conn).find_many(ids))
    }

    pub fn record_ids_for_identifiers(&self, identifiers: &[String]) -> Result<Vec<Uuid>> {
        self.with_connection(|conn| {
            SqliteRecordRepository::new(conn).find_ids_by_identifiers(identifiers)
        })
    }

    pub fn list_record_ids(&self, pending_only: bool, limit: usize) -> Result<Vec<Uuid>> {
        self.with_connection(|conn| SqliteRecordRepository::new(conn).list_ids(pending_only, limit))
    }

    pub fn count_records(&self) -> Result<usize> {
        self.with_connection(|conn| SqliteRecordRepository::new(conn).count())
    }

    // ─── Works ─────────────────────────────────────────────

    pub fn get_work(&self, id: &Uuid) -> Result<Work> {
        self.with_connection(|conn| {
            SqliteWorkRepository::new(conn)
                .find_by_id(id)?
                .ok_or_else(|| CatalogError::WorkNotFound(id.to_string()))
        })
    }

    pub fn count_works(&self) -> Result<usize> {
        self.with_connection(|conn| SqliteWorkRepository::new(conn).count())
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        self.with_connection(|conn| CatalogStatsQuery::new(conn).get_stats())
    }

    // ─── Search documents ──────────────────────────────────

    pub fn search_works(&self, query: &str, limit: usize) -> Result<Vec<WorkSummary>> {
        self.with_connection(|conn| WorkSearchQuery::new(conn).fts(query, limit))
    }

    pub fn index_work(&self, work: &Work) -> Result<()> {
        self.with_connection(|conn| WorkSearchQuery::new(conn).index(work))
    }

    pub fn remove_work_documents(&self, work_ids: &[Uuid]) -> Result<usize> {
        self.with_connection(|conn| WorkSearchQuery::new(conn).remove(work_ids))
    }

    // ─── Cache ─────────────────────────────────────────────

    pub fn cache_check_and_set(
        &self,
        namespace: &str,
        key: &str,
        scope: &str,
        ttl_secs: u64,
    ) -> Result<bool> {
        self.with_connection(|conn| {
            SqliteCacheRepository::new(conn).check_and_set(namespace, key, scope, ttl_secs)
        })
    }

    pub fn cache_remove(&self, namespace: &str, key: &str, scope: &str) -> Result<()> {
        self.with_connection(|conn| SqliteCacheRepository::new(conn).remove(namespace, key, scope))
    }

    pub fn purge_expired_cache(&self) -> Result<usize> {
        self.with_connection(|conn| SqliteCacheRepository::new(conn).purge_expired())
    }
}
