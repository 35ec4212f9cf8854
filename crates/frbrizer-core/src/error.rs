use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Work not found: {0}")]
    WorkNotFound(String),

    /// A source record that cannot enter the catalog, e.g. one without a title.
    #[error("Invalid record {source_id}: {reason}")]
    InvalidRecord { source_id: String, reason: String },

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RecordNotFound(_) | Self::WorkNotFound(_))
    }
}

/// Process exit codes of `frbrizer`.
#[repr(i32)]
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    NotFound = 2,
    InvalidArgs = 3,
    /// At least one record failed to cluster.
    ClusterFailed = 4,
}

pub type Result<T> = std::result::Result<T, CatalogError>;
