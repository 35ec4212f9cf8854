use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub records: usize,
    pub pending_records: usize,
    pub works: usize,
    pub editions: usize,
    pub items: usize,
    pub links: usize,
    /// Editions grouped under the unknown-year bucket.
    pub undated_editions: usize,
    /// Works with a document in the search index.
    pub indexed_works: usize,
}

/// Search hit over the works index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkSummary {
    pub id: Uuid,
    pub title: String,
    pub authors: Vec<String>,
    pub edition_count: usize,
}
