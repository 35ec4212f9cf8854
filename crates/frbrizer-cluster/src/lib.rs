//! frbrizer clustering: groups matched bibliographic records into Works and
//! Editions.

pub mod assembler;
pub mod editions;
pub mod error;
pub mod features;
pub mod index;
pub mod kmeans;
pub mod matcher;
pub mod selector;
pub mod service;
pub mod vectorize;

pub use assembler::{AssembledWork, Assembler, build_work};
pub use editions::{EditionGroup, group_editions};
pub use error::{ClusterError, Result};
pub use features::{FeatureRow, FeatureTable, build_feature_table};
pub use index::{FtsSearchIndex, SearchIndexer};
pub use kmeans::{Clustering, KMeansPipeline};
pub use matcher::{Matcher, RecordStore};
pub use selector::{Selection, select_and_label, select_k};
pub use service::{BulkFailure, BulkMode, BulkReport, ClusterOutcome, ClusterService};
