use frbrizer_core::CatalogError;
use thiserror::Error;

/// Typed failure reasons of a clustering run.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("matching failed: {0}")]
    Matching(String),

    #[error("cannot form {requested} clusters from {distinct} distinct feature vectors")]
    Degenerate { requested: usize, distinct: usize },

    #[error("k-means error: {0}")]
    KMeans(String),

    #[error("assembly failed: {0}")]
    Assembly(String),

    #[error("storage error: {0}")]
    Storage(#[from] CatalogError),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),
}

impl ClusterError {
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::Degenerate { .. })
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
