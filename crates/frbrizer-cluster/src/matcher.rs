use std::collections::{BTreeMap, HashSet, VecDeque};

use frbrizer_core::config::MatcherConfig;
use frbrizer_core::{Database, IdentifierCache, Record, TaggedIdentifier};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{ClusterError, Result};

/// Read side of the identifier index the matcher expands over.
pub trait RecordStore: Send + Sync {
    /// Records carrying any of the tagged, normalized `value|scheme` strings.
    fn record_ids_for_identifiers(&self, identifiers: &[String]) -> frbrizer_core::Result<Vec<Uuid>>;
    fn records(&self, ids: &[Uuid]) -> frbrizer_core::Result<Vec<Record>>;
}

impl RecordStore for Database {
    fn record_ids_for_identifiers(&self, identifiers: &[String]) -> frbrizer_core::Result<Vec<Uuid>> {
        Database::record_ids_for_identifiers(self, identifiers)
    }

    fn records(&self, ids: &[Uuid]) -> frbrizer_core::Result<Vec<Record>> {
        self.get_records(ids)
    }
}

/// Transitive identifier fan-out: finds every record reachable from a seed
/// through chains of shared identifiers.
pub struct Matcher<'a> {
    store: &'a dyn RecordStore,
    cache: &'a dyn IdentifierCache,
    config: &'a MatcherConfig,
    namespace: String,
}

impl<'a> Matcher<'a> {
    /// `namespace` scopes the cache markers; one namespace per run.
    pub fn new(
        store: &'a dyn RecordStore,
        cache: &'a dyn IdentifierCache,
        config: &'a MatcherConfig,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Every record id reachable from `identifiers`, sorted. Empty when no
    /// identifier is queryable.
    pub fn find_all_matching_records(&self, identifiers: &[String]) -> Result<Vec<Uuid>> {
        let pool = self.expand(identifiers, None)?;
        Ok(pool.into_keys().collect())
    }

    /// The matched pool of `record`, always containing the record itself.
    pub fn matched_pool(&self, record: &Record) -> Result<Vec<Record>> {
        let mut pool = self.expand(&record.identifiers, Some(record))?;
        pool.entry(record.id).or_insert_with(|| record.clone());
        Ok(pool.into_values().collect())
    }

    /// Tagged strings used for lookups: parsed, normalized and not on the
    /// deny-list. Malformed entries are dropped.
    fn queryable(&self, raw: &[String]) -> Vec<String> {
        let mut out: Vec<String> = raw
            .iter()
            .filter_map(|r| TaggedIdentifier::parse(r))
            .filter(|id| !self.is_excluded(&id.scheme))
            .map(|id| id.normalized().tagged())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    fn is_excluded(&self, scheme: &str) -> bool {
        self.config
            .excluded_schemes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme))
    }

    /// Marks the identifier in the run cache; `false` if it was already seen.
    fn claim(&self, tagged: &str) -> Result<bool> {
        let (value, scheme) = tagged.rsplit_once('|').unwrap_or((tagged, ""));
        let seen = self
            .cache
            .check_and_set(&self.namespace, value, scheme)
            .map_err(|e| ClusterError::Cache(e.to_string()))?;
        Ok(!seen)
    }

    fn expand(&self, seed: &[String], anchor: Option<&Record>) -> Result<BTreeMap<Uuid, Record>> {
        let mut pool: BTreeMap<Uuid, Record> = BTreeMap::new();
        let mut visited_ids: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        let anchor_title = anchor.map(|r| normalize_title(&r.title));
        if let Some(record) = anchor {
            pool.insert(record.id, record.clone());
        }

        for tagged in self.queryable(seed) {
            if visited_ids.insert(tagged.clone()) {
                queue.push_back(tagged);
            }
        }

        let batch_size = self.config.batch_size.clamp(1, 100);
        let mut capped = false;

        while !queue.is_empty() && !capped {
            let mut batch = Vec::with_capacity(batch_size);
            while batch.len() < batch_size
                && let Some(tagged) = queue.pop_front()
            {
                if self.claim(&tagged)? {
                    batch.push(tagged);
                }
            }
            if batch.is_empty() {
                continue;
            }

            let ids = self
                .store
                .record_ids_for_identifiers(&batch)
                .map_err(|e| ClusterError::Matching(e.to_string()))?;
            let new_ids: Vec<Uuid> = ids.into_iter().filter(|id| !pool.contains_key(id)).collect();
            if new_ids.is_empty() {
                continue;
            }

            let records = self
                .store
                .records(&new_ids)
                .map_err(|e| ClusterError::Matching(e.to_string()))?;

            for record in records {
                if pool.len() >= self.config.max_pool_size {
                    warn!(
                        max_pool_size = self.config.max_pool_size,
                        "matched pool reached its size cap; expansion stopped"
                    );
                    capped = true;
                    break;
                }

                if let (Some(threshold), Some(anchor)) =
                    (self.config.title_similarity_threshold, anchor_title.as_deref())
                    && !similar_titles(anchor, &normalize_title(&record.title), threshold)
                {
                    debug!(record_id = %record.id, "candidate dropped by title guard");
                    continue;
                }

                for tagged in self.queryable(&record.identifiers) {
                    if visited_ids.insert(tagged.clone()) {
                        queue.push_back(tagged);
                    }
                }
                pool.insert(record.id, record);
            }
        }

        debug!(pool_size = pool.len(), identifiers = visited_ids.len(), "identifier expansion finished");
        Ok(pool)
    }
}

fn normalize_title(title: &str) -> String {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn similar_titles(a: &str, b: &str, threshold: f64) -> bool {
    if a.is_empty() || b.is_empty() || a == b {
        return true;
    }
    strsim::normalized_levenshtein(a, b) >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use frbrizer_core::{CatalogError, MemoryCache};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn record(db: &Database, source_id: &str, title: &str, identifiers: &[&str]) -> Record {
        let mut r = Record::new("test", source_id, title);
        r.identifiers = identifiers.iter().map(|s| s.to_string()).collect();
        db.upsert_record(&r).unwrap();
        r
    }

    fn cache() -> MemoryCache {
        MemoryCache::new(Duration::from_secs(60))
    }

    #[test]
    fn test_transitive_chain_is_found() {
        let db = Database::open_in_memory().unwrap();
        let config = MatcherConfig::default();
        let a = record(&db, "a", "Moby Dick", &["1|oclc"]);
        let b = record(&db, "b", "Moby Dick", &["1|oclc", "0306406152|isbn"]);
        let c = record(&db, "c", "Moby Dick", &["978-0-306-40615-7|isbn", "9|owi"]);
        let d = record(&db, "d", "Moby Dick", &["9|owi"]);
        record(&db, "e", "Walden", &["77|oclc"]);

        let cache = cache();
        let matcher = Matcher::new(&db, &cache, &config, "ids:run-1");
        let mut expected = vec![a.id, b.id, c.id, d.id];
        expected.sort();
        assert_eq!(matcher.find_all_matching_records(&a.identifiers).unwrap(), expected);
    }

    #[test]
    fn test_cycles_terminate() {
        let db = Database::open_in_memory().unwrap();
        let config = MatcherConfig::default();
        let a = record(&db, "a", "T", &["1|oclc", "2|oclc"]);
        let b = record(&db, "b", "T", &["2|oclc", "3|oclc"]);
        let c = record(&db, "c", "T", &["3|oclc", "1|oclc"]);

        let cache = cache();
        let matcher = Matcher::new(&db, &cache, &config, "ids:run-1");
        let pool = matcher.matched_pool(&a).unwrap();
        let ids: Vec<Uuid> = pool.iter().map(|r| r.id).collect();
        let mut expected = vec![a.id, b.id, c.id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_excluded_scheme_does_not_link() {
        let db = Database::open_in_memory().unwrap();
        let config = MatcherConfig::default();
        let a = record(&db, "a", "T", &["55|lccn"]);
        record(&db, "b", "T", &["55|lccn"]);

        let cache = cache();
        let matcher = Matcher::new(&db, &cache, &config, "ids:run-1");
        assert!(matcher.find_all_matching_records(&a.identifiers).unwrap().is_empty());

        let pool = matcher.matched_pool(&a).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].id, a.id);
    }

    #[test]
    fn test_batches_respect_batch_size() {
        struct Counting<'a> {
            inner: &'a Database,
            calls: AtomicUsize,
            largest: AtomicUsize,
        }
        impl RecordStore for Counting<'_> {
            fn record_ids_for_identifiers(&self, identifiers: &[String]) -> frbrizer_core::Result<Vec<Uuid>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.largest.fetch_max(identifiers.len(), Ordering::SeqCst);
                self.inner.record_ids_for_identifiers(identifiers)
            }
            fn records(&self, ids: &[Uuid]) -> frbrizer_core::Result<Vec<Record>> {
                self.inner.get_records(ids)
            }
        }

        let db = Database::open_in_memory().unwrap();
        let identifiers: Vec<String> = (0..250).map(|i| format!("{i}|oclc")).collect();
        let refs: Vec<&str> = identifiers.iter().map(String::as_str).collect();
        let a = record(&db, "a", "T", &refs);

        let store = Counting {
            inner: &db,
            calls: AtomicUsize::new(0),
            largest: AtomicUsize::new(0),
        };
        let config = MatcherConfig::default();
        let cache = cache();
        let matcher = Matcher::new(&store, &cache, &config, "ids:run-1");
        assert_eq!(matcher.find_all_matching_records(&a.identifiers).unwrap(), vec![a.id]);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.largest.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_backend_failure_is_matching_error() {
        struct Broken;
        impl RecordStore for Broken {
            fn record_ids_for_identifiers(&self, _: &[String]) -> frbrizer_core::Result<Vec<Uuid>> {
                Err(CatalogError::Io(std::io::Error::other("index offline")))
            }
            fn records(&self, _: &[Uuid]) -> frbrizer_core::Result<Vec<Record>> {
                Ok(Vec::new())
            }
        }

        let config = MatcherConfig::default();
        let cache = cache();
        let matcher = Matcher::new(&Broken, &cache, &config, "ids:run-1");
        let err = matcher
            .find_all_matching_records(&["1|oclc".to_string()])
            .unwrap_err();
        assert!(matches!(err, ClusterError::Matching(_)));
    }

    #[test]
    fn test_marked_identifiers_are_skipped_within_namespace() {
        let db = Database::open_in_memory().unwrap();
        let config = MatcherConfig::default();
        let a = record(&db, "a", "T", &["1|oclc"]);
        let b = record(&db, "b", "T", &["1|oclc"]);

        let cache = cache();
        let first = Matcher::new(&db, &cache, &config, "ids:run-1");
        assert_eq!(first.find_all_matching_records(&a.identifiers).unwrap().len(), 2);

        let same_run = Matcher::new(&db, &cache, &config, "ids:run-1");
        assert_eq!(same_run.matched_pool(&b).unwrap().len(), 1);

        let next_run = Matcher::new(&db, &cache, &config, "ids:run-2");
        assert_eq!(next_run.matched_pool(&b).unwrap().len(), 2);
    }

    #[test]
    fn test_pool_size_cap_and_title_guard() {
        let db = Database::open_in_memory().unwrap();
        let a = record(&db, "a", "Moby Dick", &["1|oclc"]);
        record(&db, "b", "Moby-Dick", &["1|oclc"]);
        record(&db, "c", "Cookery for Beginners", &["1|oclc"]);

        let mut config = MatcherConfig::default();
        config.title_similarity_threshold = Some(0.8);
        let cache = cache();
        let guarded = Matcher::new(&db, &cache, &config, "ids:guard");
        let titles: Vec<String> = guarded.matched_pool(&a).unwrap().into_iter().map(|r| r.title).collect();
        assert_eq!(titles.len(), 2);
        assert!(!titles.contains(&"Cookery for Beginners".to_string()));

        let mut config = MatcherConfig::default();
        config.max_pool_size = 2;
        let capped = Matcher::new(&db, &cache, &config, "ids:cap");
        assert_eq!(capped.matched_pool(&a).unwrap().len(), 2);
    }

    #[test]
    fn test_title_similarity() {
        assert!(similar_titles("moby dick", "moby dick", 0.9));
        assert!(!similar_titles("moby dick", "walden", 0.5));
        assert_eq!(normalize_title("Moby-Dick; or, The Whale"), "moby dick or the whale");
    }
}
