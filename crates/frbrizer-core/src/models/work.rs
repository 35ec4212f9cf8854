use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identifiers::TaggedIdentifier;

// ─── Work ──────────────────────────────────────────────────

/// Canonical entity for one intellectual creation, owning its editions.
/// A Work is the unit of persistence and of search-index replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Work {
    pub id: Uuid,
    pub title: String,

    #[serde(default)]
    pub alt_titles: Vec<String>,

    #[serde(default)]
    pub agents: Vec<Agent>,

    #[serde(default)]
    pub identifiers: Vec<TaggedIdentifier>,

    #[serde(default)]
    pub subjects: Vec<String>,

    #[serde(default)]
    pub languages: Vec<String>,

    pub editions: Vec<Edition>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Work {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            title: title.into(),
            alt_titles: Vec::new(),
            agents: Vec::new(),
            identifiers: Vec::new(),
            subjects: Vec::new(),
            languages: Vec::new(),
            editions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Every record uuid across all editions.
    pub fn record_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .editions
            .iter()
            .flat_map(|e| e.record_ids.iter().copied())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

// ─── Edition ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edition {
    pub id: Uuid,

    /// Normalized publication year; `None` for the unknown-year bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_year: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition_statement: Option<String>,

    #[serde(default)]
    pub identifiers: Vec<TaggedIdentifier>,

    #[serde(default)]
    pub agents: Vec<Agent>,

    #[serde(default)]
    pub rights: Vec<Rights>,

    #[serde(default)]
    pub items: Vec<Item>,

    /// Source records grouped into this edition.
    pub record_ids: Vec<Uuid>,
}

impl Edition {
    pub fn new(publication_year: Option<i32>) -> Self {
        Self {
            id: Uuid::now_v7(),
            publication_year,
            title: None,
            publisher: None,
            place: None,
            edition_statement: None,
            identifiers: Vec::new(),
            agents: Vec::new(),
            rights: Vec::new(),
            items: Vec::new(),
            record_ids: Vec::new(),
        }
    }
}

// ─── Item / Link ───────────────────────────────────────────

/// A physical or digital manifestation of an edition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub source: String,

    /// Record the item was built from.
    pub record_id: Uuid,

    #[serde(default)]
    pub links: Vec<Link>,

    #[serde(default)]
    pub rights: Vec<Rights>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    pub media_type: String,
    #[serde(default)]
    pub flags: serde_json::Value,
}

/// One `has_part` entry: `[item_no|]uri|source|media_type|flags_json`.
#[derive(Debug, Clone, PartialEq)]
pub struct PartLink {
    pub item_no: String,
    pub uri: String,
    pub source: String,
    pub media_type: String,
    pub flags: String,
}

impl PartLink {
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split('|').map(str::trim).collect();
        let (item_no, rest) = match parts.len() {
            5 => (parts[0], &parts[1..]),
            4 => ("1", &parts[..]),
            _ => return None,
        };
        if rest[0].is_empty() {
            return None;
        }
        Some(Self {
            item_no: item_no.to_string(),
            uri: rest[0].to_string(),
            source: rest[1].to_string(),
            media_type: rest[2].to_string(),
            flags: rest[3].to_string(),
        })
    }
}

// ─── Agent ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_id: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,
}

impl Agent {
    /// Parse `name|authority_id|...|role`; only the name is required.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split('|').map(str::trim).collect();
        let name = parts.first().copied().unwrap_or_default();
        if name.is_empty() {
            return None;
        }
        let authority_id = parts
            .get(1)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let roles = match parts.len() {
            n if n >= 3 => parts[n - 1]
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_lowercase)
                .collect(),
            _ => vec!["author".to_string()],
        };
        Some(Self {
            name: name.to_string(),
            authority_id,
            roles,
        })
    }

    /// Identity used when merging agents from several records.
    pub fn dedup_key(&self) -> (String, Option<String>) {
        (self.name.to_lowercase(), self.authority_id.clone())
    }
}

// ─── Rights ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rights {
    pub source: String,
    pub license: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl Rights {
    /// Parse `source|license|reason|statement|date`.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split('|').map(str::trim).collect();
        let field = |i: usize| {
            parts
                .get(i)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };
        let license = field(1)?;
        Some(Self {
            source: field(0).unwrap_or_default(),
            license,
            reason: field(2),
            statement: field(3),
            date: field(4),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_link_with_and_without_item_number() {
        let four = PartLink::parse("https://a.org/1.pdf|hathitrust|application/pdf|{}").unwrap();
        assert_eq!(four.item_no, "1");
        assert_eq!(four.media_type, "application/pdf");

        let five = PartLink::parse("2|https://a.org/2.epub|doab|application/epub+zip|{\"download\": true}").unwrap();
        assert_eq!(five.item_no, "2");
        assert_eq!(five.source, "doab");
        assert_eq!(five.flags, "{\"download\": true}");

        assert!(PartLink::parse("https://a.org|x").is_none());
        assert!(PartLink::parse("|hathitrust|text/html|{}").is_none());
    }

    #[test]
    fn test_agent_parse() {
        let a = Agent::parse("Melville, Herman|n79006936|viaf|author, editor").unwrap();
        assert_eq!(a.name, "Melville, Herman");
        assert_eq!(a.authority_id.as_deref(), Some("n79006936"));
        assert_eq!(a.roles, vec!["author".to_string(), "editor".to_string()]);

        let bare = Agent::parse("Anonymous").unwrap();
        assert_eq!(bare.authority_id, None);
        assert_eq!(bare.roles, vec!["author".to_string()]);

        assert!(Agent::parse("|n123").is_none());
    }

    #[test]
    fn test_rights_parse() {
        let r = Rights::parse("hathitrust|public_domain|pd|Public Domain|2020").unwrap();
        assert_eq!(r.license, "public_domain");
        assert_eq!(r.date.as_deref(), Some("2020"));
        assert!(Rights::parse("hathitrust||pd").is_none());
    }

    #[test]
    fn test_work_record_ids() {
        let mut work = Work::new("Moby Dick");
        let a = Uuid::from_u128(2);
        let b = Uuid::from_u128(1);
        let mut e1 = Edition::new(Some(1851));
        e1.record_ids = vec![a, b];
        let mut e2 = Edition::new(None);
        e2.record_ids = vec![a];
        work.editions = vec![e1, e2];
        assert_eq!(work.record_ids(), vec![b, a]);
    }
}
