use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

/// Root application configuration, loaded from `~/.config/frbrizer/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub core: CoreConfig,
    pub matcher: MatcherConfig,
    pub features: FeatureConfig,
    pub kmeans: KMeansConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub library_path: String,
}

/// Identifier fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum identifiers per store query.
    pub batch_size: usize,
    /// Schemes never used to expand the pool (unreliable for bulk matching).
    pub excluded_schemes: Vec<String>,
    pub cache_namespace: String,
    pub cache_ttl_secs: u64,
    pub max_pool_size: usize,
    /// Normalized-Levenshtein floor between a candidate title and the
    /// trigger title. `None` disables the check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_similarity_threshold: Option<f64>,
}

/// Weights and n-gram ranges of the clustering feature space.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub place_weight: f64,
    pub publisher_weight: f64,
    pub edition_weight: f64,
    pub pub_date_weight: f64,
    pub text_ngram_range: (usize, usize),
    pub edition_ngram_range: (usize, usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansConfig {
    pub seed: u64,
    pub n_runs: usize,
    pub max_iterations: u64,
    pub tolerance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub workers: usize,
    pub batch_limit: usize,
    pub processing_ttl_secs: u64,
}

// ─── Defaults ──────────────────────────────────────────────

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const PLACE_WEIGHT: f64 = 0.5;
pub const PUBLISHER_WEIGHT: f64 = 1.0;
pub const EDITION_WEIGHT: f64 = 0.75;
pub const PUB_DATE_WEIGHT: f64 = 2.0;
pub const TEXT_NGRAM_RANGE: (usize, usize) = (2, 4);
pub const EDITION_NGRAM_RANGE: (usize, usize) = (1, 3);

impl Default for CoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("frbrizer");

        Self {
            library_path: data_dir.to_string_lossy().to_string(),
        }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            excluded_schemes: vec!["lccn".to_string()],
            cache_namespace: "cluster-ids".to_string(),
            cache_ttl_secs: 3600,
            max_pool_size: 10_000,
            title_similarity_threshold: None,
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            place_weight: PLACE_WEIGHT,
            publisher_weight: PUBLISHER_WEIGHT,
            edition_weight: EDITION_WEIGHT,
            pub_date_weight: PUB_DATE_WEIGHT,
            text_ngram_range: TEXT_NGRAM_RANGE,
            edition_ngram_range: EDITION_NGRAM_RANGE,
        }
    }
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            n_runs: 10,
            max_iterations: 300,
            tolerance: 1e-4,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            batch_limit: 1000,
            processing_ttl_secs: 600,
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/frbrizer/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("FRBRIZER_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("frbrizer")
            .join("config.toml")
    }

    /// Reads [`AppConfig::config_path`]; a missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    /// Load config from `path`, validating it.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes pretty TOML, creating the parent directory.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.matcher.batch_size == 0 || self.matcher.batch_size > DEFAULT_BATCH_SIZE {
            return Err(CatalogError::ConfigError(format!(
                "matcher.batch_size must be within 1..={DEFAULT_BATCH_SIZE}, got {}",
                self.matcher.batch_size
            )));
        }
        for (name, (lo, hi)) in [
            ("features.text_ngram_range", self.features.text_ngram_range),
            ("features.edition_ngram_range", self.features.edition_ngram_range),
        ] {
            if lo == 0 || lo > hi {
                return Err(CatalogError::ConfigError(format!(
                    "{name} must satisfy 1 <= min <= max, got ({lo}, {hi})"
                )));
            }
        }
        if self.kmeans.n_runs == 0 {
            return Err(CatalogError::ConfigError("kmeans.n_runs must be positive".to_string()));
        }
        Ok(())
    }

    // ─── Derived paths ─────────────────────────────────────

    pub fn library_path(&self) -> PathBuf {
        PathBuf::from(&self.core.library_path)
    }

    pub fn set_library_path(&mut self, path: PathBuf) {
        self.core.library_path = path.to_string_lossy().to_string();
    }

    /// `<library>/db/frbrizer.db`
    pub fn database_path(&self) -> PathBuf {
        self.library_path().join("db").join("frbrizer.db")
    }
}
