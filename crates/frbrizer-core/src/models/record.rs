use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identifiers::TaggedIdentifier;
use crate::error::CatalogError;

// ─── Record ────────────────────────────────────────────────

/// A normalized bibliographic description from one source.
///
/// List fields keep the pipe-delimited string encodings produced by the
/// ingestion mappings:
/// * `authors`: `name|authority_id|...|role`
/// * `dates`: `value|date_type`
/// * `identifiers`: `value|scheme`
/// * `has_version`: `statement|edition_number`
/// * `rights`: `source|license|reason|statement|date`
/// * `has_part`: `[item_no|]uri|source|media_type|flags_json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    pub source: String,
    pub source_id: String,
    pub title: String,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default)]
    pub dates: Vec<String>,

    #[serde(default)]
    pub identifiers: Vec<String>,

    #[serde(default)]
    pub publisher: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial: Option<String>,

    #[serde(default)]
    pub has_version: Vec<String>,

    #[serde(default)]
    pub rights: Vec<String>,

    #[serde(default)]
    pub subjects: Vec<String>,

    #[serde(default)]
    pub has_part: Vec<String>,

    #[serde(default)]
    pub languages: Vec<String>,

    #[serde(default)]
    pub frbr_status: FrbrStatus,

    /// `true` once the record's pool has been clustered into a Work.
    #[serde(default)]
    pub cluster_status: bool,

    #[serde(default = "Utc::now")]
    pub date_modified: DateTime<Utc>,
}

impl Record {
    pub fn new(
        source: impl Into<String>,
        source_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            source_id: source_id.into(),
            title: title.into(),
            authors: Vec::new(),
            dates: Vec::new(),
            identifiers: Vec::new(),
            publisher: Vec::new(),
            spatial: None,
            has_version: Vec::new(),
            rights: Vec::new(),
            subjects: Vec::new(),
            has_part: Vec::new(),
            languages: Vec::new(),
            frbr_status: FrbrStatus::ToDo,
            cluster_status: false,
            date_modified: Utc::now(),
        }
    }

    /// Rejects records that cannot be matched or displayed.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let reason = if self.source.trim().is_empty() || self.source_id.trim().is_empty() {
            "missing source or source_id"
        } else if self.title.trim().is_empty() {
            "record has no title"
        } else {
            return Ok(());
        };
        Err(CatalogError::InvalidRecord {
            source_id: self.source_id.clone(),
            reason: reason.to_string(),
        })
    }

    /// Parsed identifiers; malformed entries are skipped.
    pub fn tagged_identifiers(&self) -> Vec<TaggedIdentifier> {
        self.identifiers
            .iter()
            .filter_map(|raw| TaggedIdentifier::parse(raw))
            .collect()
    }

    /// Identifiers in matching form, deduplicated and sorted.
    pub fn normalized_identifiers(&self) -> Vec<TaggedIdentifier> {
        let mut ids: Vec<TaggedIdentifier> = self
            .tagged_identifiers()
            .iter()
            .map(TaggedIdentifier::normalized)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// `(value, date_type)` pairs of the `dates` field.
    pub fn date_entries(&self) -> Vec<(&str, &str)> {
        self.dates
            .iter()
            .filter_map(|raw| raw.rsplit_once('|'))
            .map(|(value, kind)| (value.trim(), kind.trim()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrbrStatus {
    #[default]
    ToDo,
    Complete,
}

impl std::fmt::Display for FrbrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToDo => write!(f, "to_do"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

impl std::str::FromStr for FrbrStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "to_do" => Ok(Self::ToDo),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("Invalid FrbrStatus: {s}")),
        }
    }
}
