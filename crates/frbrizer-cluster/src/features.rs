use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use frbrizer_core::Record;

static BOILERPLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:place of publication not identified|publisher not identified|sn)\b")
        .expect("valid publisher boilerplate regex")
});
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})$").expect("valid regex"));
static YEAR_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})\s*-\s*(\d{4})$").expect("valid regex"));
static FULL_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-\d{2}-\d{2}$").expect("valid regex"));

/// Date types consulted for the publication year, in order of preference.
const DATE_PREFERENCE: [&str; 2] = ["copyright_date", "publication_date"];

/// One clustering input row. `pub_date` is 0 when the year is unknown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub place: String,
    pub publisher: String,
    pub edition: Option<String>,
    pub pub_date: i32,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureTable {
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(rows: Vec<FeatureRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Exactly one row per record, in input order. Records with nothing usable
/// still get a row and cluster together as an undifferentiated group.
pub fn build_feature_table(records: &[Record]) -> FeatureTable {
    let rows = records
        .iter()
        .map(|record| FeatureRow {
            place: record.spatial.as_deref().map(str::trim).unwrap_or_default().to_string(),
            publisher: clean_publisher(&record.publisher.join(", ")),
            edition: extract_edition(record),
            pub_date: extract_pub_date(record),
            uuid: record.id,
        })
        .collect();
    FeatureTable::new(rows)
}

/// Normalizes a publisher string for comparison. Applying it twice gives the
/// same result as applying it once.
pub fn clean_publisher(raw: &str) -> String {
    let lowered = raw.to_lowercase().replace('&', " and ");
    let stripped: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    let mut cleaned = collapse_whitespace(&stripped);
    loop {
        let next = collapse_whitespace(&BOILERPLATE_RE.replace_all(&cleaned, " "));
        if next == cleaned {
            return cleaned;
        }
        cleaned = next;
    }
}

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RE.replace_all(s, " ").trim().to_string()
}

/// Statement of the first `statement|edition_number` entry.
pub fn extract_edition(record: &Record) -> Option<String> {
    let first = record.has_version.first()?;
    let statement = first.split('|').next().unwrap_or_default().trim();
    (!statement.is_empty()).then(|| statement.to_string())
}

/// Year from a single date value: `YYYY`, `YYYY-YYYY` (truncated mean of the
/// endpoints) or `YYYY-MM-DD`. Surrounding brackets and punctuation are ignored.
pub fn parse_pub_year(value: &str) -> Option<i32> {
    let trimmed = value.trim_matches(|c: char| !c.is_ascii_alphanumeric());

    if let Some(caps) = YEAR_RE.captures(trimmed) {
        return caps[1].parse().ok();
    }
    if let Some(caps) = YEAR_RANGE_RE.captures(trimmed) {
        let start: i32 = caps[1].parse().ok()?;
        let end: i32 = caps[2].parse().ok()?;
        return Some((start + end) / 2);
    }
    if let Some(caps) = FULL_DATE_RE.captures(trimmed) {
        return caps[1].parse().ok();
    }
    None
}

/// Preferred publication year of `record`, 0 when none is usable.
pub fn extract_pub_date(record: &Record) -> i32 {
    let entries = record.date_entries();
    for date_type in DATE_PREFERENCE {
        for (value, kind) in entries.iter().filter(|(_, kind)| *kind == date_type) {
            match parse_pub_year(value) {
                Some(year) => return year,
                None => warn!(record_id = %record.id, value, kind, "unparseable date ignored"),
            }
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_dates(dates: &[&str]) -> Record {
        let mut r = Record::new("test", "1", "Title");
        r.dates = dates.iter().map(|s| s.to_string()).collect();
        r
    }

    #[test]
    fn test_clean_publisher() {
        assert_eq!(clean_publisher("Random House, Inc."), "random house inc");
        assert_eq!(clean_publisher("Harper & Brothers"), "harper and brothers");
        assert_eq!(clean_publisher("Simon&Schuster"), "simon and schuster");
        assert_eq!(clean_publisher("[s.n.]"), "");
        assert_eq!(clean_publisher("[Publisher not identified]"), "");
        assert_eq!(
            clean_publisher("Place of publication not identified : Penguin"),
            "penguin"
        );
        assert_eq!(clean_publisher("  Snow   Press "), "snow press");
    }

    #[test]
    fn test_clean_publisher_is_idempotent() {
        let inputs = [
            "Random House, Inc.",
            "s n s n publisher",
            "s.n. & s.n.",
            "[Place of publication not identified] : [publisher not identified]",
            "İSTANBUL Yayınları",
            "   ",
            "Éditions du Seuil & Cie.",
            "publisher not sn identified",
        ];
        for input in inputs {
            let once = clean_publisher(input);
            assert_eq!(clean_publisher(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn test_parse_pub_year_formats() {
        assert_eq!(parse_pub_year("1995"), Some(1995));
        assert_eq!(parse_pub_year("[1995]."), Some(1995));
        assert_eq!(parse_pub_year("1923-1925"), Some(1924));
        assert_eq!(parse_pub_year("1923-1926"), Some(1924));
        assert_eq!(parse_pub_year("2001-05-17"), Some(2001));
        assert_eq!(parse_pub_year("c1995?"), None);
        assert_eq!(parse_pub_year("n.d."), None);
        assert_eq!(parse_pub_year(""), None);
    }

    #[test]
    fn test_year_range_publication_date() {
        let record = record_with_dates(&["1923-1925|publication_date"]);
        assert_eq!(extract_pub_date(&record), 1924);
    }

    #[test]
    fn test_copyright_date_wins() {
        let record = record_with_dates(&["1950|publication_date", "1948|copyright_date"]);
        assert_eq!(extract_pub_date(&record), 1948);

        let unusable = record_with_dates(&["unknown|copyright_date", "1950|publication_date"]);
        assert_eq!(extract_pub_date(&unusable), 1950);

        assert_eq!(extract_pub_date(&record_with_dates(&["1900|issued"])), 0);
    }

    #[test]
    fn test_every_record_yields_a_row() {
        let empty = Record::new("test", "empty", "");
        let mut full = Record::new("test", "full", "Moby Dick");
        full.publisher = vec!["Harper".to_string(), "Brothers".to_string()];
        full.spatial = Some(" New York ".to_string());
        full.has_version = vec!["2nd ed.|2".to_string()];
        full.dates = vec!["1851|publication_date".to_string()];

        let table = build_feature_table(&[empty.clone(), full.clone()]);
        assert_eq!(table.len(), 2);

        let rows = table.rows();
        assert_eq!(rows[0].uuid, empty.id);
        assert_eq!(rows[0].place, "");
        assert_eq!(rows[0].publisher, "");
        assert_eq!(rows[0].edition, None);
        assert_eq!(rows[0].pub_date, 0);

        assert_eq!(rows[1].place, "New York");
        assert_eq!(rows[1].publisher, "harper brothers");
        assert_eq!(rows[1].edition.as_deref(), Some("2nd ed."));
        assert_eq!(rows[1].pub_date, 1851);
    }
}
