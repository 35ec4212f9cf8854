use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Agent, Edition, Item, Link, Rights, TaggedIdentifier, Work};

use super::{placeholders, Repository, SQL_CHUNK};

/// How strongly an existing Work is tied to a matched pool.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkClaim {
    pub work_id: Uuid,
    /// Matched identifiers the Work carries.
    pub identifier_claims: usize,
    /// Pool records the Work already owns.
    pub record_claims: usize,
    pub created_at: DateTime<Utc>,
}

impl WorkClaim {
    pub fn total(&self) -> usize {
        self.identifier_claims + self.record_claims
    }
}

pub trait WorkRepository: Repository<Entity = Work, Id = Uuid> {
    /// Existing Works that carry any of `identifiers` (tagged, normalized)
    /// or own any of `record_ids`.
    fn find_claims(&self, identifiers: &[String], record_ids: &[Uuid]) -> Result<Vec<WorkClaim>>;
    /// Record uuids owned by the given Works, through their editions.
    fn record_ids_of(&self, work_ids: &[Uuid]) -> Result<Vec<Uuid>>;
    fn list_ids(&self, limit: usize) -> Result<Vec<Uuid>>;
    fn count(&self) -> Result<usize>;
}

pub struct SqliteWorkRepository<'a> {
    conn: &'a Connection,
}

fn parse_uuid(raw: &str) -> Uuid {
    Uuid::parse_str(raw).unwrap_or_default()
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn json_list(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

impl<'a> SqliteWorkRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn identifier_id(&self, identifier: &TaggedIdentifier) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO identifiers (value, scheme) VALUES (?1, ?2)",
            params![identifier.value, identifier.scheme],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM identifiers WHERE value = ?1 AND scheme = ?2",
            params![identifier.value, identifier.scheme],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn insert_agents(&self, owner_column: &str, owner: &Uuid, agents: &[Agent]) -> Result<()> {
        let sql = format!(
            "INSERT INTO agents ({owner_column}, name, authority_id, roles) VALUES (?1, ?2, ?3, ?4)"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        for agent in agents {
            stmt.execute(params![
                owner.to_string(),
                agent.name,
                agent.authority_id,
                serde_json::to_string(&agent.roles)?,
            ])?;
        }
        Ok(())
    }

    fn insert_rights(&self, owner_column: &str, owner: &Uuid, rights: &[Rights]) -> Result<()> {
        let sql = format!(
            "INSERT INTO rights ({owner_column}, source, license, reason, statement, date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        for r in rights {
            stmt.execute(params![
                owner.to_string(),
                r.source,
                r.license,
                r.reason,
                r.statement,
                r.date,
            ])?;
        }
        Ok(())
    }

    fn insert_edition(&self, work_id: &Uuid, edition: &Edition, sort_order: usize) -> Result<()> {
        let edition_id = edition.id.to_string();
        self.conn.execute(
            "INSERT INTO editions
                (id, work_id, publication_year, title, publisher, place, edition_statement, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                edition_id,
                work_id.to_string(),
                edition.publication_year,
                edition.title,
                edition.publisher,
                edition.place,
                edition.edition_statement,
                sort_order as i64,
            ],
        )?;

        for identifier in &edition.identifiers {
            let identifier_id = self.identifier_id(identifier)?;
            self.conn.execute(
                "INSERT OR IGNORE INTO edition_identifiers (edition_id, identifier_id) VALUES (?1, ?2)",
                params![edition_id, identifier_id],
            )?;
        }

        for record_id in &edition.record_ids {
            self.conn.execute(
                "INSERT OR IGNORE INTO edition_records (edition_id, record_id) VALUES (?1, ?2)",
                params![edition_id, record_id.to_string()],
            )?;
        }

        self.insert_agents("edition_id", &edition.id, &edition.agents)?;
        self.insert_rights("edition_id", &edition.id, &edition.rights)?;

        for (item_order, item) in edition.items.iter().enumerate() {
            self.conn.execute(
                "INSERT INTO items (id, edition_id, record_id, source, sort_order)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    item.id.to_string(),
                    edition_id,
                    item.record_id.to_string(),
                    item.source,
                    item_order as i64,
                ],
            )?;
            for link in &item.links {
                self.conn.execute(
                    "INSERT INTO links (item_id, url, media_type, flags) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        item.id.to_string(),
                        link.url,
                        link.media_type,
                        serde_json::to_string(&link.flags)?,
                    ],
                )?;
            }
            self.insert_rights("item_id", &item.id, &item.rights)?;
        }

        Ok(())
    }

    fn load_identifiers(&self, sql: &str, owner: &str) -> Result<Vec<TaggedIdentifier>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![owner], |row| {
                Ok(TaggedIdentifier::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_agents(&self, owner_column: &str, owner: &str) -> Result<Vec<Agent>> {
        let sql = format!(
            "SELECT name, authority_id, roles FROM agents WHERE {owner_column} = ?1 ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![owner], |row| {
                Ok(Agent {
                    name: row.get(0)?,
                    authority_id: row.get(1)?,
                    roles: json_list(row.get(2)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_rights(&self, owner_column: &str, owner: &str) -> Result<Vec<Rights>> {
        let sql = format!(
            "SELECT source, license, reason, statement, date FROM rights
             WHERE {owner_column} = ?1 ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![owner], |row| {
                Ok(Rights {
                    source: row.get(0)?,
                    license: row.get(1)?,
                    reason: row.get(2)?,
                    statement: row.get(3)?,
                    date: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_items(&self, edition_id: &str) -> Result<Vec<Item>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, record_id, source FROM items WHERE edition_id = ?1 ORDER BY sort_order",
        )?;
        let rows = stmt
            .query_map(params![edition_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut link_stmt = self
            .conn
            .prepare("SELECT url, media_type, flags FROM links WHERE item_id = ?1 ORDER BY id")?;

        let mut items = Vec::with_capacity(rows.len());
        for (id, record_id, source) in rows {
            let links = link_stmt
                .query_map(params![id], |row| {
                    let flags: String = row.get(2)?;
                    Ok(Link {
                        url: row.get(0)?,
                        media_type: row.get(1)?,
                        flags: serde_json::from_str(&flags)
                            .unwrap_or_else(|_| serde_json::Value::Object(Default::default())),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let rights = self.load_rights("item_id", &id)?;
            items.push(Item {
                id: parse_uuid(&id),
                source,
                record_id: parse_uuid(&record_id),
                links,
                rights,
            });
        }
        Ok(items)
    }

    fn load_editions(&self, work_id: &str) -> Result<Vec<Edition>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, publication_year, title, publisher, place, edition_statement
             FROM editions WHERE work_id = ?1 ORDER BY sort_order",
        )?;
        let rows = stmt
            .query_map(params![work_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i32>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut editions = Vec::with_capacity(rows.len());
        for (id, publication_year, title, publisher, place, edition_statement) in rows {
            let identifiers = self.load_identifiers(
                "SELECT i.value, i.scheme FROM edition_identifiers ei
                 JOIN identifiers i ON i.id = ei.identifier_id
                 WHERE ei.edition_id = ?1 ORDER BY i.scheme, i.value",
                &id,
            )?;

            let mut record_stmt = self.conn.prepare(
                "SELECT record_id FROM edition_records WHERE edition_id = ?1 ORDER BY record_id",
            )?;
            let record_ids = record_stmt
                .query_map(params![id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?
                .iter()
                .map(|s| parse_uuid(s))
                .collect();

            editions.push(Edition {
                id: parse_uuid(&id),
                publication_year,
                title,
                publisher,
                place,
                edition_statement,
                identifiers,
                agents: self.load_agents("edition_id", &id)?,
                rights: self.load_rights("edition_id", &id)?,
                items: self.load_items(&id)?,
                record_ids,
            });
        }
        Ok(editions)
    }

    fn uuid_column(&self, sql: &str, values: Vec<String>) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl<'a> Repository for SqliteWorkRepository<'a> {
    type Entity = Work;
    type Id = Uuid;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let key = id.to_string();
        let row = self
            .conn
            .query_row(
                "SELECT title, alt_titles, subjects, languages, created_at, updated_at
                 FROM works WHERE id = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((title, alt_titles, subjects, languages, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let identifiers = self.load_identifiers(
            "SELECT i.value, i.scheme FROM work_identifiers wi
             JOIN identifiers i ON i.id = wi.identifier_id
             WHERE wi.work_id = ?1 ORDER BY i.scheme, i.value",
            &key,
        )?;

        Ok(Some(Work {
            id: *id,
            title,
            alt_titles: json_list(alt_titles),
            agents: self.load_agents("work_id", &key)?,
            identifiers,
            subjects: json_list(subjects),
            languages: json_list(languages),
            editions: self.load_editions(&key)?,
            created_at: parse_time(&created_at),
            updated_at: parse_time(&updated_at),
        }))
    }

    /// Replaces the whole graph under the Work id; `created_at` of an
    /// existing row is kept.
    fn save(&self, work: &Self::Entity) -> Result<()> {
        let key = work.id.to_string();

        self.conn.execute("DELETE FROM editions WHERE work_id = ?1", params![key])?;
        self.conn.execute("DELETE FROM agents WHERE work_id = ?1", params![key])?;
        self.conn.execute("DELETE FROM work_identifiers WHERE work_id = ?1", params![key])?;

        self.conn.execute(
            "INSERT INTO works (id, title, alt_titles, subjects, languages, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                alt_titles = excluded.alt_titles,
                subjects = excluded.subjects,
                languages = excluded.languages,
                updated_at = excluded.updated_at",
            params![
                key,
                work.title,
                serde_json::to_string(&work.alt_titles)?,
                serde_json::to_string(&work.subjects)?,
                serde_json::to_string(&work.languages)?,
                work.created_at.to_rfc3339(),
                work.updated_at.to_rfc3339(),
            ],
        )?;

        for identifier in &work.identifiers {
            let identifier_id = self.identifier_id(identifier)?;
            self.conn.execute(
                "INSERT OR IGNORE INTO work_identifiers (work_id, identifier_id) VALUES (?1, ?2)",
                params![key, identifier_id],
            )?;
        }

        self.insert_agents("work_id", &work.id, &work.agents)?;

        for (order, edition) in work.editions.iter().enumerate() {
            self.insert_edition(&work.id, edition, order)?;
        }

        Ok(())
    }

    fn delete(&self, id: &Self::Id) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM works WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }
}

impl<'a> WorkRepository for SqliteWorkRepository<'a> {
    fn find_claims(&self, identifiers: &[String], record_ids: &[Uuid]) -> Result<Vec<WorkClaim>> {
        let mut claims: HashMap<String, (usize, usize)> = HashMap::new();

        for chunk in identifiers.chunks(SQL_CHUNK) {
            let sql = format!(
                "SELECT wi.work_id FROM work_identifiers wi
                 JOIN identifiers i ON i.id = wi.identifier_id
                 WHERE i.value || '|' || i.scheme IN ({})",
                placeholders(chunk.len())
            );
            for work_id in self.uuid_column(&sql, chunk.to_vec())? {
                claims.entry(work_id).or_default().0 += 1;
            }
        }

        for chunk in record_ids.chunks(SQL_CHUNK) {
            let sql = format!(
                "SELECT e.work_id FROM edition_records er
                 JOIN editions e ON e.id = er.edition_id
                 WHERE er.record_id IN ({})",
                placeholders(chunk.len())
            );
            let values = chunk.iter().map(|id| id.to_string()).collect();
            for work_id in self.uuid_column(&sql, values)? {
                claims.entry(work_id).or_default().1 += 1;
            }
        }

        let mut result = Vec::with_capacity(claims.len());
        for (work_id, (identifier_claims, record_claims)) in claims {
            let created_at: Option<String> = self
                .conn
                .query_row(
                    "SELECT created_at FROM works WHERE id = ?1",
                    params![work_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(created_at) = created_at else {
                warn!(work_id = %work_id, "claim references a missing work");
                continue;
            };
            result.push(WorkClaim {
                work_id: parse_uuid(&work_id),
                identifier_claims,
                record_claims,
                created_at: parse_time(&created_at),
            });
        }

        result.sort_by(|a, b| {
            b.total()
                .cmp(&a.total())
                .then(a.created_at.cmp(&b.created_at))
                .then(a.work_id.cmp(&b.work_id))
        });
        Ok(result)
    }

    fn record_ids_of(&self, work_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        for chunk in work_ids.chunks(SQL_CHUNK) {
            let sql = format!(
                "SELECT DISTINCT er.record_id FROM edition_records er
                 JOIN editions e ON e.id = er.edition_id
                 WHERE e.work_id IN ({})",
                placeholders(chunk.len())
            );
            let values = chunk.iter().map(|id| id.to_string()).collect();
            ids.extend(self.uuid_column(&sql, values)?.iter().map(|s| parse_uuid(s)));
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn list_ids(&self, limit: usize) -> Result<Vec<Uuid>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM works ORDER BY created_at, id LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.iter().map(|s| parse_uuid(s)).collect())
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM works", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::run_migrations;
    use chrono::Duration;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn sample_work(records: &[Uuid]) -> Work {
        let mut work = Work::new("Moby Dick");
        work.alt_titles = vec!["The Whale".to_string()];
        work.identifiers = vec![TaggedIdentifier::new("1", "oclc")];
        work.agents = vec![Agent::parse("Melville, Herman|n79006936|author").unwrap()];
        work.subjects = vec!["Whaling".to_string()];

        let mut edition = Edition::new(Some(1851));
        edition.publisher = Some("harper".to_string());
        edition.identifiers = vec![TaggedIdentifier::new("9780306406157", "isbn")];
        edition.rights = vec![Rights::parse("hathitrust|public_domain").unwrap()];
        edition.record_ids = records.to_vec();
        edition.items = vec![Item {
            id: Uuid::now_v7(),
            source: "hathitrust".to_string(),
            record_id: records[0],
            links: vec![Link {
                url: "https://example.org/1.pdf".to_string(),
                media_type: "application/pdf".to_string(),
                flags: serde_json::json!({"download": true}),
            }],
            rights: vec![Rights::parse("hathitrust|cc-by").unwrap()],
        }];

        work.editions = vec![edition, Edition::new(None)];
        work
    }

    #[test]
    fn test_save_and_load_full_graph() {
        let conn = conn();
        let repo = SqliteWorkRepository::new(&conn);
        let records = [Uuid::from_u128(1), Uuid::from_u128(2)];
        let work = sample_work(&records);

        repo.save(&work).unwrap();
        let loaded = repo.find_by_id(&work.id).unwrap().unwrap();

        assert_eq!(loaded.title, "Moby Dick");
        assert_eq!(loaded.alt_titles, work.alt_titles);
        assert_eq!(loaded.identifiers, work.identifiers);
        assert_eq!(loaded.agents, work.agents);
        assert_eq!(loaded.editions.len(), 2);
        assert_eq!(loaded.editions[0], work.editions[0]);
        assert_eq!(loaded.editions[1].publication_year, None);
        assert_eq!(loaded.record_ids(), records.to_vec());
    }

    #[test]
    fn test_save_replaces_editions_and_keeps_created_at() {
        let conn = conn();
        let repo = SqliteWorkRepository::new(&conn);
        let mut work = sample_work(&[Uuid::from_u128(1)]);
        repo.save(&work).unwrap();
        let created = repo.find_by_id(&work.id).unwrap().unwrap().created_at;

        work.editions = vec![Edition::new(Some(1900))];
        work.created_at = Utc::now() + Duration::days(1);
        repo.save(&work).unwrap();

        let loaded = repo.find_by_id(&work.id).unwrap().unwrap();
        assert_eq!(loaded.editions.len(), 1);
        assert_eq!(loaded.editions[0].publication_year, Some(1900));
        assert_eq!(loaded.created_at.timestamp(), created.timestamp());

        let items: i64 = conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(items, 0);
    }

    #[test]
    fn test_claims_rank_by_count_then_age() {
        let conn = conn();
        let repo = SqliteWorkRepository::new(&conn);

        let mut older = Work::new("A");
        older.identifiers = vec![TaggedIdentifier::new("1", "oclc")];
        older.created_at = Utc::now() - Duration::days(10);
        let mut edition = Edition::new(Some(1900));
        edition.record_ids = vec![Uuid::from_u128(7)];
        older.editions = vec![edition];

        let mut newer = Work::new("B");
        newer.identifiers = vec![
            TaggedIdentifier::new("1", "oclc"),
            TaggedIdentifier::new("2", "oclc"),
        ];

        repo.save(&older).unwrap();
        repo.save(&newer).unwrap();

        let ids = vec!["1|oclc".to_string(), "2|oclc".to_string()];
        let claims = repo.find_claims(&ids, &[]).unwrap();
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].work_id, newer.id);
        assert_eq!(claims[0].identifier_claims, 2);

        let claims = repo.find_claims(&ids, &[Uuid::from_u128(7)]).unwrap();
        assert_eq!(claims[0].work_id, older.id);
        assert_eq!(claims[0].total(), 2);
        assert_eq!(claims[0].record_claims, 1);

        assert_eq!(repo.record_ids_of(&[older.id, newer.id]).unwrap(), vec![Uuid::from_u128(7)]);
    }

    #[test]
    fn test_delete_cascades() {
        let conn = conn();
        let repo = SqliteWorkRepository::new(&conn);
        let work = sample_work(&[Uuid::from_u128(1)]);
        repo.save(&work).unwrap();
        assert_eq!(repo.count().unwrap(), 1);

        assert!(repo.delete(&work.id).unwrap());
        assert!(!repo.delete(&work.id).unwrap());
        assert!(repo.find_by_id(&work.id).unwrap().is_none());

        let links: i64 = conn
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))
            .unwrap();
        assert_eq!(links, 0);
        assert!(repo.list_ids(10).unwrap().is_empty());
    }
}
