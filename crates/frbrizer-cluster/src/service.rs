use std::collections::HashSet;
use std::sync::Arc;

use frbrizer_core::{AppConfig, CatalogError, Database, IdentifierCache, SqliteCache};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assembler::{AssembledWork, Assembler};
use crate::editions::group_editions;
use crate::features::build_feature_table;
use crate::index::{FtsSearchIndex, SearchIndexer};
use crate::kmeans::KMeansPipeline;
use crate::matcher::{Matcher, RecordStore};
use crate::selector::select_and_label;
use crate::{ClusterError, Result};

pub const PROCESSING_NAMESPACE: &str = "processing";
const PROCESSING_SCOPE: &str = "record";

/// Summary of one clustered pool.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterOutcome {
    pub work_id: Uuid,
    pub created: bool,
    pub edition_count: usize,
    pub record_count: usize,
    pub record_ids: Vec<Uuid>,
    pub k: usize,
    pub stale_work_ids: Vec<Uuid>,
    /// Set when the Work was persisted but the search index could not be
    /// brought up to date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkMode {
    /// Every record, clustered or not.
    Full,
    /// Records with `cluster_status = false`.
    Incremental,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    pub record_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkReport {
    pub mode: BulkMode,
    pub processed: Vec<ClusterOutcome>,
    /// Records already covered by an earlier pool of the batch or held by
    /// another worker.
    pub skipped: Vec<Uuid>,
    pub failed: Vec<BulkFailure>,
}

impl BulkReport {
    pub fn new(mode: BulkMode) -> Self {
        Self {
            mode,
            processed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn merge(&mut self, other: BulkReport) {
        self.processed.extend(other.processed);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }
}

/// Entry point of the clustering pipeline: matcher, features, cluster-count
/// selection, edition grouping, Work assembly and search indexing.
pub struct ClusterService {
    db: Arc<Database>,
    config: AppConfig,
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn IdentifierCache>,
    guard: Arc<dyn IdentifierCache>,
    indexer: Arc<dyn SearchIndexer>,
}

impl ClusterService {
    /// Service with database-backed caches and the FTS index.
    pub fn new(db: Arc<Database>, config: AppConfig) -> Self {
        let cache = Arc::new(SqliteCache::new(db.clone(), config.matcher.cache_ttl_secs));
        let guard = Arc::new(SqliteCache::new(db.clone(), config.worker.processing_ttl_secs));
        let indexer = Arc::new(FtsSearchIndex::new(db.clone()));
        Self {
            store: db.clone(),
            db,
            config,
            cache,
            guard,
            indexer,
        }
    }

    /// Replaces the identifier index the matcher expands over.
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = store;
        self
    }

    /// Replaces the identifier cache used by the matcher.
    pub fn with_cache(mut self, cache: Arc<dyn IdentifierCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the cache holding the per-record processing guard.
    pub fn with_guard(mut self, guard: Arc<dyn IdentifierCache>) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn SearchIndexer>) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Clusters the pool of one record into a Work.
    pub fn cluster_record(&self, id: &Uuid) -> Result<ClusterOutcome> {
        self.cluster_in(id, &self.run_namespace())
    }

    /// Clusters up to `worker.batch_limit` records chosen by `mode`.
    pub fn cluster_bulk(&self, mode: BulkMode) -> Result<BulkReport> {
        let ids = self
            .db
            .list_record_ids(mode == BulkMode::Incremental, self.config.worker.batch_limit)?;
        info!(?mode, records = ids.len(), "bulk clustering started");
        Ok(self.cluster_batch(&ids, mode))
    }

    /// Clusters `ids` in order, sharing one cache namespace. Per-record
    /// failures are collected and never stop the batch; after a failure the
    /// batch continues in a fresh namespace.
    pub fn cluster_batch(&self, ids: &[Uuid], mode: BulkMode) -> BulkReport {
        let mut namespace = self.run_namespace();
        let mut report = BulkReport::new(mode);
        let mut covered: HashSet<Uuid> = HashSet::new();

        for id in ids {
            if covered.contains(id) {
                report.skipped.push(*id);
                continue;
            }
            match self.cluster_guarded(id, &namespace, mode) {
                Ok(Some(outcome)) => {
                    covered.extend(outcome.record_ids.iter().copied());
                    report.processed.push(outcome);
                }
                Ok(None) => report.skipped.push(*id),
                Err(e) => {
                    warn!(record_id = %id, error = %e, "record clustering failed");
                    report.failed.push(BulkFailure {
                        record_id: *id,
                        error: e.to_string(),
                    });
                    namespace = self.run_namespace();
                }
            }
        }

        info!(
            processed = report.processed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "bulk clustering finished"
        );
        report
    }

    /// `None` when another worker holds the record or, in incremental mode,
    /// when it was clustered since the batch was listed.
    fn cluster_guarded(&self, id: &Uuid, namespace: &str, mode: BulkMode) -> Result<Option<ClusterOutcome>> {
        let key = id.to_string();
        let held = self
            .guard
            .check_and_set(PROCESSING_NAMESPACE, &key, PROCESSING_SCOPE)
            .map_err(|e| ClusterError::Cache(e.to_string()))?;
        if held {
            debug!(record_id = %id, "record held by another worker");
            return Ok(None);
        }

        let result = match mode {
            BulkMode::Incremental => self.load_record_status(id).and_then(|clustered| {
                if clustered {
                    Ok(None)
                } else {
                    self.cluster_in(id, namespace).map(Some)
                }
            }),
            BulkMode::Full => self.cluster_in(id, namespace).map(Some),
        };

        if let Err(e) = self.guard.remove(PROCESSING_NAMESPACE, &key, PROCESSING_SCOPE) {
            warn!(record_id = %id, error = %e, "processing guard not released");
        }
        result
    }

    fn load_record_status(&self, id: &Uuid) -> Result<bool> {
        Ok(self.load_record(id)?.cluster_status)
    }

    fn load_record(&self, id: &Uuid) -> Result<frbrizer_core::Record> {
        self.db.get_record(id).map_err(|e| match e {
            CatalogError::RecordNotFound(id) => ClusterError::RecordNotFound(id),
            other => other.into(),
        })
    }

    fn cluster_in(&self, id: &Uuid, namespace: &str) -> Result<ClusterOutcome> {
        let record = self.load_record(id)?;

        let matcher = Matcher::new(
            self.store.as_ref(),
            self.cache.as_ref(),
            &self.config.matcher,
            namespace,
        );
        let pool = matcher.matched_pool(&record)?;

        let table = build_feature_table(&pool);
        let pipeline = KMeansPipeline::new(&self.config.features, &self.config.kmeans);
        let selection = select_and_label(&pipeline, &table)?;
        let groups = group_editions(&table, &selection.labels);

        let assembled = Assembler::new(&self.db)
            .excluding(&self.config.matcher.excluded_schemes)
            .assemble_and_persist(&pool, &groups)?;
        let index_error = self.refresh_index(&assembled);

        let mut record_ids: Vec<Uuid> = pool.iter().map(|r| r.id).collect();
        record_ids.sort();
        info!(
            record_id = %id,
            work_id = %assembled.work.id,
            pool = record_ids.len(),
            k = selection.k,
            editions = assembled.work.editions.len(),
            "record clustered"
        );

        Ok(ClusterOutcome {
            work_id: assembled.work.id,
            created: assembled.created,
            edition_count: assembled.work.editions.len(),
            record_count: record_ids.len(),
            record_ids,
            k: selection.k,
            stale_work_ids: assembled.stale_work_ids,
            index_error,
        })
    }

    /// Drops stale Works from the index and indexes the new one. Errors are
    /// logged and returned as text.
    fn refresh_index(&self, assembled: &AssembledWork) -> Option<String> {
        let mut errors = Vec::new();
        if let Err(e) = self.indexer.delete(&assembled.stale_work_ids) {
            warn!(stale = assembled.stale_work_ids.len(), error = %e, "stale works not removed from search index");
            errors.push(e.to_string());
        }
        if let Err(e) = self.indexer.index(&assembled.work) {
            warn!(work_id = %assembled.work.id, error = %e, "work not indexed");
            errors.push(e.to_string());
        }
        (!errors.is_empty()).then(|| errors.join("; "))
    }

    fn run_namespace(&self) -> String {
        format!("{}:{}", self.config.matcher.cache_namespace, Uuid::now_v7().simple())
    }
}
