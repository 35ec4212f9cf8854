use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{FrbrStatus, Record};

use super::{placeholders, placeholders_from, Repository, SQL_CHUNK};

pub trait RecordRepository: Repository<Entity = Record, Id = Uuid> {
    /// Insert or update by `(source, source_id)`, keeping the stored uuid
    /// when the record already exists. A new record whose uuid is taken by
    /// another source record gets a fresh one. Returns the persisted uuid.
    fn upsert(&self, record: &Record) -> Result<Uuid>;
    fn find_by_source(&self, source: &str, source_id: &str) -> Result<Option<Record>>;
    fn find_many(&self, ids: &[Uuid]) -> Result<Vec<Record>>;
    /// Records whose normalized identifiers overlap `identifiers`
    /// (tagged `value|scheme` strings).
    fn find_ids_by_identifiers(&self, identifiers: &[String]) -> Result<Vec<Uuid>>;
    fn list_ids(&self, pending_only: bool, limit: usize) -> Result<Vec<Uuid>>;
    fn set_cluster_status(&self, ids: &[Uuid], clustered: bool) -> Result<usize>;
    /// `frbr_status = complete` and `cluster_status = true`.
    fn mark_clustered(&self, ids: &[Uuid]) -> Result<usize>;
    fn count(&self) -> Result<usize>;
    fn count_pending(&self) -> Result<usize>;
}

pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

const RECORD_COLUMNS: &str = "id, source, source_id, title, authors, dates, identifiers, publisher,
     spatial, has_version, rights, subjects, has_part, languages, frbr_status,
     cluster_status, date_modified";

fn json_list(value: String) -> Vec<String> {
    serde_json::from_str(&value).unwrap_or_default()
}

impl<'a> SqliteRecordRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Record> {
        let status: String = row.get(14)?;
        let modified: String = row.get(16)?;

        Ok(Record {
            id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
            source: row.get(1)?,
            source_id: row.get(2)?,
            title: row.get(3)?,
            authors: json_list(row.get(4)?),
            dates: json_list(row.get(5)?),
            identifiers: json_list(row.get(6)?),
            publisher: json_list(row.get(7)?),
            spatial: row.get(8)?,
            has_version: json_list(row.get(9)?),
            rights: json_list(row.get(10)?),
            subjects: json_list(row.get(11)?),
            has_part: json_list(row.get(12)?),
            languages: json_list(row.get(13)?),
            frbr_status: FrbrStatus::from_str(&status).unwrap_or_default(),
            cluster_status: row.get(15)?,
            date_modified: DateTime::parse_from_rfc3339(&modified)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    fn write_identifier_index(&self, record: &Record, id: &Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM record_identifiers WHERE record_id = ?1",
            params![id.to_string()],
        )?;

        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO record_identifiers (record_id, identifier) VALUES (?1, ?2)",
        )?;
        for identifier in record.normalized_identifiers() {
            stmt.execute(params![id.to_string(), identifier.tagged()])?;
        }
        Ok(())
    }
}

impl<'a> Repository for SqliteRecordRepository<'a> {
    type Entity = Record;
    type Id = Uuid;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1");
        let record = self
            .conn
            .query_row(&sql, params![id.to_string()], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    fn save(&self, record: &Self::Entity) -> Result<()> {
        self.upsert(record).map(|_| ())
    }

    fn delete(&self, id: &Self::Id) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM records WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }
}

impl<'a> RecordRepository for SqliteRecordRepository<'a> {
    fn upsert(&self, record: &Record) -> Result<Uuid> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM records WHERE source = ?1 AND source_id = ?2",
                params![record.source, record.source_id],
                |row| row.get(0),
            )
            .optional()?;
        let id = match existing.and_then(|s| Uuid::parse_str(&s).ok()) {
            Some(id) => id,
            None if self.find_by_id(&record.id)?.is_some() => {
                let fresh = Uuid::now_v7();
                warn!(
                    requested = %record.id,
                    assigned = %fresh,
                    source = %record.source,
                    source_id = %record.source_id,
                    "record id belongs to another source record; new id assigned"
                );
                fresh
            }
            None => record.id,
        };

        self.conn.execute(
            "INSERT INTO records
                (id, source, source_id, title, authors, dates, identifiers, publisher,
                 spatial, has_version, rights, subjects, has_part, languages,
                 frbr_status, cluster_status, date_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                source_id = excluded.source_id,
                title = excluded.title,
                authors = excluded.authors,
                dates = excluded.dates,
                identifiers = excluded.identifiers,
                publisher = excluded.publisher,
                spatial = excluded.spatial,
                has_version = excluded.has_version,
                rights = excluded.rights,
                subjects = excluded.subjects,
                has_part = excluded.has_part,
                languages = excluded.languages,
                frbr_status = excluded.frbr_status,
                cluster_status = excluded.cluster_status,
                date_modified = excluded.date_modified",
            params![
                id.to_string(),
                record.source,
                record.source_id,
                record.title,
                serde_json::to_string(&record.authors)?,
                serde_json::to_string(&record.dates)?,
                serde_json::to_string(&record.identifiers)?,
                serde_json::to_string(&record.publisher)?,
                record.spatial,
                serde_json::to_string(&record.has_version)?,
                serde_json::to_string(&record.rights)?,
                serde_json::to_string(&record.subjects)?,
                serde_json::to_string(&record.has_part)?,
                serde_json::to_string(&record.languages)?,
                record.frbr_status.to_string(),
                record.cluster_status,
                record.date_modified.to_rfc3339(),
            ],
        )?;

        self.write_identifier_index(record, &id)?;
        Ok(id)
    }

    fn find_by_source(&self, source: &str, source_id: &str) -> Result<Option<Record>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE source = ?1 AND source_id = ?2");
        let record = self
            .conn
            .query_row(&sql, params![source, source_id], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    fn find_many(&self, ids: &[Uuid]) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(SQL_CHUNK) {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM records WHERE id IN ({}) ORDER BY id",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params_from_iter(chunk.iter().map(|id| id.to_string())),
                    Self::row_to_record,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            records.extend(rows);
        }
        Ok(records)
    }

    fn find_ids_by_identifiers(&self, identifiers: &[String]) -> Result<Vec<Uuid>> {
        if identifiers.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DISTINCT record_id FROM record_identifiers WHERE identifier IN ({})",
            placeholders(identifiers.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(identifiers.iter()), |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut ids: Vec<Uuid> = rows
            .iter()
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn list_ids(&self, pending_only: bool, limit: usize) -> Result<Vec<Uuid>> {
        let sql = if pending_only {
            "SELECT id FROM records WHERE cluster_status = 0 ORDER BY date_modified, id LIMIT ?1"
        } else {
            "SELECT id FROM records ORDER BY date_modified, id LIMIT ?1"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.iter().filter_map(|s| Uuid::parse_str(s).ok()).collect())
    }

    fn set_cluster_status(&self, ids: &[Uuid], clustered: bool) -> Result<usize> {
        let mut updated = 0;
        for chunk in ids.chunks(SQL_CHUNK) {
            let sql = format!(
                "UPDATE records SET cluster_status = ?1 WHERE id IN ({})",
                placeholders_from(2, chunk.len())
            );
            let mut values = vec![Value::Integer(clustered as i64)];
            values.extend(chunk.iter().map(|id| Value::Text(id.to_string())));
            updated += self.conn.execute(&sql, params_from_iter(values))?;
        }
        Ok(updated)
    }

    fn mark_clustered(&self, ids: &[Uuid]) -> Result<usize> {
        let mut updated = 0;
        for chunk in ids.chunks(SQL_CHUNK) {
            let sql = format!(
                "UPDATE records SET cluster_status = 1, frbr_status = ?1 WHERE id IN ({})",
                placeholders_from(2, chunk.len())
            );
            let mut values = vec![Value::Text(FrbrStatus::Complete.to_string())];
            values.extend(chunk.iter().map(|id| Value::Text(id.to_string())));
            updated += self.conn.execute(&sql, params_from_iter(values))?;
        }
        Ok(updated)
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn count_pending(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE cluster_status = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
