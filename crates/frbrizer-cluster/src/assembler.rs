use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use frbrizer_core::{
    Agent, Database, Edition, Item, Link, PartLink, Record, RecordRepository, Repository, Rights,
    SqliteRecordRepository, SqliteWorkRepository, TaggedIdentifier, Work, WorkRepository,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::editions::EditionGroup;
use crate::features::extract_edition;
use crate::{ClusterError, Result};

/// Outcome of persisting one clustered Work.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledWork {
    pub work: Work,
    /// `true` when no prior Work claimed the pool.
    pub created: bool,
    /// Prior Works merged into this one and deleted.
    pub stale_work_ids: Vec<Uuid>,
    /// Records that belonged to a replaced Work but are outside this pool;
    /// they are flagged for re-clustering.
    pub released_record_ids: Vec<Uuid>,
}

pub struct Assembler<'a> {
    db: &'a Database,
    excluded_schemes: &'a [String],
}

impl<'a> Assembler<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            excluded_schemes: &[],
        }
    }

    /// Identifiers of these schemes never count as a claim on an existing Work.
    pub fn excluding(mut self, schemes: &'a [String]) -> Self {
        self.excluded_schemes = schemes;
        self
    }

    /// Builds the Work graph and persists it in a single transaction.
    ///
    /// The Work with the strongest claim on the pool (matched identifiers
    /// plus owned records, then oldest) keeps its id and has its editions
    /// replaced; every other claiming Work is deleted. A Work sharing only
    /// identifiers with the pool while owning records outside it is left
    /// alone. Nothing is written if any step fails.
    pub fn assemble_and_persist(
        &self,
        records: &[Record],
        groups: &[EditionGroup],
    ) -> Result<AssembledWork> {
        let mut work = build_work(records, groups)?;

        let mut pool_ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        pool_ids.sort();
        pool_ids.dedup();
        let pool: HashSet<Uuid> = pool_ids.iter().copied().collect();
        let identifiers: Vec<String> = work
            .identifiers
            .iter()
            .filter(|id| !self.excluded_schemes.iter().any(|s| s.eq_ignore_ascii_case(&id.scheme)))
            .map(TaggedIdentifier::tagged)
            .collect();

        let assembled = self.db.with_transaction(|tx| -> Result<AssembledWork> {
            let works = SqliteWorkRepository::new(tx);
            let record_repo = SqliteRecordRepository::new(tx);

            let mut claims = Vec::new();
            for claim in works.find_claims(&identifiers, &pool_ids)? {
                // A Work matched only by identifier whose records all lie
                // outside the pool belongs to another family.
                if claim.record_claims == 0
                    && works
                        .record_ids_of(&[claim.work_id])?
                        .iter()
                        .any(|id| !pool.contains(id))
                {
                    debug!(work_id = %claim.work_id, "identifier-only claim on a foreign work ignored");
                    continue;
                }
                claims.push(claim);
            }
            let created = match claims.first() {
                Some(winner) => {
                    work.id = winner.work_id;
                    work.created_at = winner.created_at;
                    false
                }
                None => true,
            };

            let claimed: Vec<Uuid> = claims.iter().map(|c| c.work_id).collect();
            let released_record_ids: Vec<Uuid> = works
                .record_ids_of(&claimed)?
                .into_iter()
                .filter(|id| !pool.contains(id))
                .collect();

            let stale_work_ids: Vec<Uuid> = claimed.iter().copied().filter(|id| *id != work.id).collect();
            for id in &stale_work_ids {
                works.delete(id)?;
            }

            works.save(&work)?;
            record_repo.mark_clustered(&pool_ids)?;
            if !released_record_ids.is_empty() {
                record_repo.set_cluster_status(&released_record_ids, false)?;
            }

            Ok(AssembledWork {
                work,
                created,
                stale_work_ids,
                released_record_ids,
            })
        })?;

        info!(
            work_id = %assembled.work.id,
            editions = assembled.work.editions.len(),
            records = pool_ids.len(),
            stale = assembled.stale_work_ids.len(),
            created = assembled.created,
            "work persisted"
        );
        Ok(assembled)
    }
}

/// Pure construction of the Work graph from a pool and its edition groups.
/// Fails when a group names a record outside the pool or when no record
/// carries a title.
pub fn build_work(records: &[Record], groups: &[EditionGroup]) -> Result<Work> {
    let by_id: HashMap<Uuid, &Record> = records.iter().map(|r| (r.id, r)).collect();

    let work_title = most_common(records.iter().map(|r| r.title.trim()))
        .ok_or_else(|| ClusterError::Assembly("no record in the pool has a title".to_string()))?;

    let mut editions = Vec::with_capacity(groups.len());
    for group in groups {
        let members = group
            .record_ids
            .iter()
            .map(|id| {
                by_id.get(id).copied().ok_or_else(|| {
                    ClusterError::Assembly(format!("edition member {id} is not in the pool"))
                })
            })
            .collect::<Result<Vec<&Record>>>()?;
        editions.push(build_edition(group, &members));
    }

    let mut work = Work::new(work_title.clone());
    work.alt_titles = unique_case_insensitive(
        records
            .iter()
            .map(|r| r.title.trim())
            .filter(|t| !t.eq_ignore_ascii_case(&work_title)),
    );
    work.agents = merge_agents(editions.iter().flat_map(|e| e.agents.iter().cloned()));
    work.identifiers = merge_identifiers(editions.iter().flat_map(|e| e.identifiers.iter().cloned()));
    work.subjects = unique_case_insensitive(records.iter().flat_map(|r| r.subjects.iter().map(|s| s.trim())));
    work.languages = unique_case_insensitive(records.iter().flat_map(|r| r.languages.iter().map(|s| s.trim())));
    work.editions = editions;
    work.updated_at = Utc::now();
    Ok(work)
}

fn build_edition(group: &EditionGroup, members: &[&Record]) -> Edition {
    let mut edition = Edition::new(group.publication_year());

    edition.title = most_common(members.iter().map(|r| r.title.trim()));
    edition.publisher = most_common(members.iter().map(|r| r.publisher.join(", ")));
    edition.place = most_common(members.iter().filter_map(|r| r.spatial.as_deref().map(str::trim)));
    edition.edition_statement = most_common(members.iter().filter_map(|r| extract_edition(r)));

    edition.identifiers = merge_identifiers(members.iter().flat_map(|r| r.normalized_identifiers()));
    edition.agents = merge_agents(members.iter().flat_map(|r| parse_agents(r)));

    let mut seen_rights = HashSet::new();
    for record in members {
        for rights in parse_rights(record) {
            if seen_rights.insert(rights.clone()) {
                edition.rights.push(rights);
            }
        }
        edition.items.extend(build_items(record));
    }

    edition.record_ids = group.record_ids.clone();
    edition
}

fn parse_agents(record: &Record) -> Vec<Agent> {
    record
        .authors
        .iter()
        .filter_map(|raw| {
            let agent = Agent::parse(raw);
            if agent.is_none() {
                warn!(record_id = %record.id, raw = %raw, "malformed author entry skipped");
            }
            agent
        })
        .collect()
}

fn parse_rights(record: &Record) -> Vec<Rights> {
    record
        .rights
        .iter()
        .filter_map(|raw| {
            let rights = Rights::parse(raw);
            if rights.is_none() {
                warn!(record_id = %record.id, raw = %raw, "malformed rights entry skipped");
            }
            rights
        })
        .collect()
}

/// One Item per distinct item number among the record's `has_part` links.
fn build_items(record: &Record) -> Vec<Item> {
    let mut parts: BTreeMap<String, Vec<PartLink>> = BTreeMap::new();
    for raw in &record.has_part {
        match PartLink::parse(raw) {
            Some(part) => parts.entry(part.item_no.clone()).or_default().push(part),
            None => warn!(record_id = %record.id, raw = %raw, "malformed has_part entry skipped"),
        }
    }

    let rights = parse_rights(record);
    parts
        .into_values()
        .map(|links| Item {
            id: Uuid::now_v7(),
            source: links
                .first()
                .map(|l| l.source.clone())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| record.source.clone()),
            record_id: record.id,
            links: links
                .into_iter()
                .map(|part| Link {
                    flags: parse_flags(&part.flags, record),
                    url: part.uri,
                    media_type: part.media_type,
                })
                .collect(),
            rights: rights.clone(),
        })
        .collect()
}

fn parse_flags(raw: &str, record: &Record) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => {
            warn!(record_id = %record.id, flags = %raw, "invalid link flags replaced with {{}}");
            serde_json::Value::Object(serde_json::Map::new())
        }
    }
}

/// Deduplicates by `(lowercased name, authority_id)`, merging roles.
fn merge_agents(agents: impl Iterator<Item = Agent>) -> Vec<Agent> {
    let mut merged: Vec<Agent> = Vec::new();
    let mut index: HashMap<(String, Option<String>), usize> = HashMap::new();
    for agent in agents {
        match index.get(&agent.dedup_key()) {
            Some(&i) => {
                for role in agent.roles {
                    if !merged[i].roles.contains(&role) {
                        merged[i].roles.push(role);
                    }
                }
            }
            None => {
                index.insert(agent.dedup_key(), merged.len());
                merged.push(agent);
            }
        }
    }
    merged
}

fn merge_identifiers(identifiers: impl Iterator<Item = TaggedIdentifier>) -> Vec<TaggedIdentifier> {
    let mut out: Vec<TaggedIdentifier> = identifiers.collect();
    out.sort();
    out.dedup();
    out
}

/// Most frequent non-empty value; ties go to the value seen first.
fn most_common<S: AsRef<str>>(values: impl Iterator<Item = S>) -> Option<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for value in values {
        let value = value.as_ref().trim();
        if value.is_empty() {
            continue;
        }
        match counts.iter_mut().find(|(v, _)| v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value.to_string(), 1)),
        }
    }
    let best = counts.iter().map(|(_, n)| *n).max()?;
    counts.into_iter().find(|(_, n)| *n == best).map(|(v, _)| v)
}

fn unique_case_insensitive<'s>(values: impl Iterator<Item = &'s str>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.to_lowercase()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source_id: &str, title: &str, identifiers: &[&str]) -> Record {
        let mut r = Record::new("test", source_id, title);
        r.identifiers = identifiers.iter().map(|s| s.to_string()).collect();
        r
    }

    fn single_group(records: &[&Record], year: i32) -> EditionGroup {
        let mut record_ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        record_ids.sort();
        EditionGroup { year, record_ids }
    }

    #[test]
    fn test_build_work_aggregates_members() {
        let mut a = record("a", "Moby Dick", &["1|oclc", "0306406152|isbn"]);
        a.authors = vec!["Melville, Herman|n79006936|author".to_string()];
        a.publisher = vec!["Harper".to_string()];
        a.subjects = vec!["Whaling".to_string()];
        a.rights = vec!["hathitrust|public_domain|pd|Public Domain|2020".to_string()];
        a.has_part = vec![
            "1|https://a.org/1.pdf|hathitrust|application/pdf|{\"download\": true}".to_string(),
            "1|https://a.org/1.epub|hathitrust|application/epub+zip|not json".to_string(),
            "2|https://a.org/2.pdf|hathitrust|application/pdf|{}".to_string(),
        ];

        let mut b = record("b", "Moby-Dick", &["9780306406157|isbn"]);
        b.authors = vec![
            "MELVILLE, HERMAN|n79006936|editor".to_string(),
            "Kent, Rockwell||illustrator".to_string(),
        ];
        b.publisher = vec!["Harper".to_string()];
        b.subjects = vec!["whaling".to_string(), "Sea stories".to_string()];
        b.rights = a.rights.clone();

        let mut c = record("c", "Moby Dick", &[]);
        c.dates = vec!["1930|publication_date".to_string()];

        let groups = vec![single_group(&[&a, &b], 1851), single_group(&[&c], 0)];
        let work = build_work(&[a.clone(), b.clone(), c.clone()], &groups).unwrap();

        assert_eq!(work.title, "Moby Dick");
        assert_eq!(work.alt_titles, vec!["Moby-Dick".to_string()]);
        assert_eq!(work.subjects, vec!["Whaling".to_string(), "Sea stories".to_string()]);
        assert_eq!(
            work.identifiers,
            vec![
                TaggedIdentifier::new("1", "oclc"),
                TaggedIdentifier::new("9780306406157", "isbn"),
            ]
        );
        assert_eq!(work.agents.len(), 2);
        assert_eq!(work.agents[0].roles, vec!["author".to_string(), "editor".to_string()]);

        let first = &work.editions[0];
        assert_eq!(first.publication_year, Some(1851));
        assert_eq!(first.publisher.as_deref(), Some("Harper"));
        assert_eq!(first.rights.len(), 1);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].links.len(), 2);
        assert_eq!(first.items[0].links[1].flags, serde_json::json!({}));
        assert_eq!(first.items[0].links[0].flags, serde_json::json!({"download": true}));

        let unknown = &work.editions[1];
        assert_eq!(unknown.publication_year, None);
        assert!(unknown.items.is_empty());
        assert_eq!(unknown.record_ids, vec![c.id]);
    }

    #[test]
    fn test_build_work_rejects_foreign_member_and_missing_title() {
        let a = record("a", "Title", &[]);
        let stranger = EditionGroup { year: 0, record_ids: vec![Uuid::from_u128(42)] };
        assert!(matches!(
            build_work(&[a.clone()], &[stranger]),
            Err(ClusterError::Assembly(_))
        ));

        let untitled = record("b", "  ", &[]);
        let group = single_group(&[&untitled], 0);
        assert!(matches!(build_work(&[untitled], &[group]), Err(ClusterError::Assembly(_))));
    }

    #[test]
    fn test_persist_marks_members_and_replaces_claiming_works() {
        let db = Database::open_in_memory().unwrap();
        let a = record("a", "Moby Dick", &["1|oclc"]);
        let b = record("b", "Moby Dick", &["2|oclc"]);
        let outsider = record("x", "Moby Dick", &["3|oclc"]);
        for r in [&a, &b, &outsider] {
            db.upsert_record(r).unwrap();
        }
        let assembler = Assembler::new(&db);

        let first = assembler
            .assemble_and_persist(&[a.clone(), outsider.clone()], &[single_group(&[&a, &outsider], 0)])
            .unwrap();
        let second = assembler
            .assemble_and_persist(&[b.clone()], &[single_group(&[&b], 0)])
            .unwrap();
        assert!(first.created && second.created);
        assert_eq!(db.count_works().unwrap(), 2);

        let mut pool = vec![a.clone(), b.clone()];
        pool.sort_by_key(|r| r.id);
        let merged = assembler
            .assemble_and_persist(&pool, &[single_group(&[&a, &b], 0)])
            .unwrap();

        assert!(!merged.created);
        assert_eq!(merged.work.id, first.work.id);
        assert_eq!(merged.stale_work_ids, vec![second.work.id]);
        assert_eq!(merged.released_record_ids, vec![outsider.id]);
        assert_eq!(db.count_works().unwrap(), 1);

        let stored = db.get_work(&first.work.id).unwrap();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(stored.record_ids(), expected);

        assert!(db.get_record(&a.id).unwrap().cluster_status);
        assert!(!db.get_record(&outsider.id).unwrap().cluster_status);
    }

    #[test]
    fn test_identifier_match_does_not_take_foreign_work() {
        let db = Database::open_in_memory().unwrap();
        let a = record("a", "Moby Dick", &["1|oclc"]);
        let c = record("c", "Cookery for Beginners", &["1|oclc"]);
        db.upsert_record(&a).unwrap();
        db.upsert_record(&c).unwrap();
        let assembler = Assembler::new(&db);

        let first = assembler
            .assemble_and_persist(&[a.clone()], &[single_group(&[&a], 0)])
            .unwrap();
        let second = assembler
            .assemble_and_persist(&[c.clone()], &[single_group(&[&c], 0)])
            .unwrap();

        assert!(second.created);
        assert_ne!(second.work.id, first.work.id);
        assert!(second.stale_work_ids.is_empty());
        assert!(second.released_record_ids.is_empty());
        assert_eq!(db.get_work(&first.work.id).unwrap().record_ids(), vec![a.id]);
        assert!(db.get_record(&a.id).unwrap().cluster_status);

        let again = assembler
            .assemble_and_persist(&[a.clone()], &[single_group(&[&a], 0)])
            .unwrap();
        assert_eq!(again.work.id, first.work.id);
        assert_eq!(db.count_works().unwrap(), 2);
    }

    #[test]
    fn test_failed_assembly_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let a = record("a", "Title", &["1|oclc"]);
        db.upsert_record(&a).unwrap();

        let bad = EditionGroup { year: 0, record_ids: vec![a.id, Uuid::from_u128(9)] };
        let err = Assembler::new(&db).assemble_and_persist(&[a.clone()], &[bad]).unwrap_err();
        assert!(matches!(err, ClusterError::Assembly(_)));
        assert_eq!(db.count_works().unwrap(), 0);
        assert!(!db.get_record(&a.id).unwrap().cluster_status);
    }

    #[test]
    fn test_most_common_prefers_first_on_tie() {
        assert_eq!(most_common(["b", "a", "a", "b"].into_iter()), Some("b".to_string()));
        assert_eq!(most_common(["", " "].into_iter()), None);
    }
}
