mod stats;
mod work_search;

pub use stats::CatalogStatsQuery;
pub use work_search::WorkSearchQuery;
