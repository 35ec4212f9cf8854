use std::sync::Arc;

use frbrizer_core::{Database, Work};
use tracing::debug;
use uuid::Uuid;

use crate::Result;

/// Search index over persisted Works. Called after the Work transaction
/// commits; a failure here never undoes the Work.
pub trait SearchIndexer: Send + Sync {
    fn index(&self, work: &Work) -> Result<()>;
    fn delete(&self, work_ids: &[Uuid]) -> Result<()>;
}

/// Index backed by the catalog's `works_fts` table.
pub struct FtsSearchIndex {
    db: Arc<Database>,
}

impl FtsSearchIndex {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl SearchIndexer for FtsSearchIndex {
    fn index(&self, work: &Work) -> Result<()> {
        self.db.index_work(work)?;
        Ok(())
    }

    fn delete(&self, work_ids: &[Uuid]) -> Result<()> {
        if work_ids.is_empty() {
            return Ok(());
        }
        let removed = self.db.remove_work_documents(work_ids)?;
        debug!(requested = work_ids.len(), removed, "search documents removed");
        Ok(())
    }
}
