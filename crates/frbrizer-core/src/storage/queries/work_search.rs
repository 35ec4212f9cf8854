use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Work, WorkSummary};

/// Full-text documents over `works_fts`, one row per Work.
pub struct WorkSearchQuery<'a> {
    conn: &'a Connection,
}

/// Quotes every term so user input never reaches the FTS5 query grammar.
fn fts_terms(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| term.replace('"', ""))
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

impl<'a> WorkSearchQuery<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Replaces the document for `work`.
    pub fn index(&self, work: &Work) -> Result<()> {
        let key = work.id.to_string();
        self.conn
            .execute("DELETE FROM works_fts WHERE work_id = ?1", params![key])?;

        let authors: Vec<&str> = work.agents.iter().map(|a| a.name.as_str()).collect();
        let mut publishers: Vec<&str> = work
            .editions
            .iter()
            .filter_map(|e| e.publisher.as_deref())
            .collect();
        publishers.sort_unstable();
        publishers.dedup();

        self.conn.execute(
            "INSERT INTO works_fts (work_id, title, alt_titles, authors, subjects, publishers)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key,
                work.title,
                work.alt_titles.join(" ; "),
                authors.join(" ; "),
                work.subjects.join(" ; "),
                publishers.join(" ; "),
            ],
        )?;
        Ok(())
    }

    pub fn remove(&self, work_ids: &[Uuid]) -> Result<usize> {
        let mut stmt = self.conn.prepare("DELETE FROM works_fts WHERE work_id = ?1")?;
        let mut removed = 0;
        for id in work_ids {
            removed += stmt.execute(params![id.to_string()])?;
        }
        Ok(removed)
    }

    pub fn fts(&self, query: &str, limit: usize) -> Result<Vec<WorkSummary>> {
        let terms = fts_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT f.work_id, w.title, f.authors,
                    (SELECT COUNT(*) FROM editions e WHERE e.work_id = f.work_id)
             FROM works_fts f
             JOIN works w ON w.id = f.work_id
             WHERE works_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![terms, limit as i64], |row| {
                let authors: String = row.get(2)?;
                Ok(WorkSummary {
                    id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
                    title: row.get(1)?,
                    authors: authors
                        .split(" ; ")
                        .filter(|a| !a.is_empty())
                        .map(str::to_string)
                        .collect(),
                    edition_count: row.get::<_, i64>(3)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn document_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM works_fts", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Agent, Edition};
    use crate::storage::database::run_migrations;
    use crate::storage::repositories::{Repository, SqliteWorkRepository};

    fn indexed_work(conn: &Connection, title: &str, author: &str) -> Work {
        let mut work = Work::new(title);
        work.agents = vec![Agent::parse(author).unwrap()];
        let mut edition = Edition::new(Some(1851));
        edition.publisher = Some("harper and brothers".to_string());
        work.editions = vec![edition];
        SqliteWorkRepository::new(conn).save(&work).unwrap();
        WorkSearchQuery::new(conn).index(&work).unwrap();
        work
    }

    #[test]
    fn test_fts_finds_by_title_author_and_publisher() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let moby = indexed_work(&conn, "Moby Dick", "Melville, Herman");
        indexed_work(&conn, "Walden", "Thoreau, Henry David");

        let search = WorkSearchQuery::new(&conn);
        let hits = search.fts("moby", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, moby.id);
        assert_eq!(hits[0].edition_count, 1);
        assert_eq!(hits[0].authors, vec!["Melville, Herman".to_string()]);

        assert_eq!(search.fts("thoreau", 10).unwrap().len(), 1);
        assert_eq!(search.fts("harper", 10).unwrap().len(), 2);
        assert!(search.fts("\"  ", 10).unwrap().is_empty());
    }

    #[test]
    fn test_reindex_replaces_and_remove_deletes() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let mut work = indexed_work(&conn, "Moby Dick", "Melville, Herman");

        let search = WorkSearchQuery::new(&conn);
        work.title = "The Whale".to_string();
        search.index(&work).unwrap();
        assert_eq!(search.document_count().unwrap(), 1);

        assert_eq!(search.remove(&[work.id]).unwrap(), 1);
        assert_eq!(search.document_count().unwrap(), 0);
    }

    #[test]
    fn test_fts_terms_quotes_input() {
        assert_eq!(fts_terms("moby  dick"), "\"moby\" \"dick\"");
        assert_eq!(fts_terms("a\"b OR"), "\"ab\" \"OR\"");
    }
}
