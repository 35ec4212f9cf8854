mod cache_repository;
mod record_repository;
mod work_repository;

pub use cache_repository::{CacheRepository, SqliteCacheRepository};
pub use record_repository::{RecordRepository, SqliteRecordRepository};
pub use work_repository::{SqliteWorkRepository, WorkClaim, WorkRepository};

use crate::error::Result;

/// Upper bound on bound parameters per `IN (...)` query.
pub(crate) const SQL_CHUNK: usize = 500;

pub trait Repository {
    type Entity;
    type Id;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>>;
    fn save(&self, entity: &Self::Entity) -> Result<()>;
    fn delete(&self, id: &Self::Id) -> Result<bool>;
}

pub(crate) fn placeholders(count: usize) -> String {
    placeholders_from(1, count)
}

pub(crate) fn placeholders_from(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}
