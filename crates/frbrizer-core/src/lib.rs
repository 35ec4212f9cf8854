pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use cache::{IdentifierCache, MemoryCache, SqliteCache};
pub use config::AppConfig;
pub use error::{CatalogError, ExitCode, Result};
pub use models::*;

pub use storage::database::{CatalogConnection, Database, Migration};

pub use storage::repositories::{
    CacheRepository, RecordRepository, Repository, SqliteCacheRepository,
    SqliteRecordRepository, SqliteWorkRepository, WorkClaim, WorkRepository,
};

pub use storage::queries::{CatalogStatsQuery, WorkSearchQuery};
