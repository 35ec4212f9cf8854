use rusqlite::Connection;

use crate::error::Result;
use super::WorkSearchQuery;
use crate::models::CatalogStats;

pub struct CatalogStatsQuery<'a> {
    conn: &'a Connection,
}

impl<'a> CatalogStatsQuery<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn get_stats(&self) -> Result<CatalogStats> {
        Ok(CatalogStats {
            records: self.count("SELECT COUNT(*) FROM records")?,
            pending_records: self.count("SELECT COUNT(*) FROM records WHERE cluster_status = 0")?,
            works: self.count("SELECT COUNT(*) FROM works")?,
            editions: self.count("SELECT COUNT(*) FROM editions")?,
            items: self.count("SELECT COUNT(*) FROM items")?,
            links: self.count("SELECT COUNT(*) FROM links")?,
            undated_editions: self
                .count("SELECT COUNT(*) FROM editions WHERE publication_year IS NULL")?,
            indexed_works: WorkSearchQuery::new(self.conn).document_count()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use crate::storage::database::run_migrations;
    use crate::storage::repositories::{RecordRepository, SqliteRecordRepository};

    #[test]
    fn test_stats_on_records() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let repo = SqliteRecordRepository::new(&conn);
        let a = Record::new("loc", "1", "A");
        repo.upsert(&a).unwrap();
        repo.upsert(&Record::new("loc", "2", "B")).unwrap();
        repo.mark_clustered(&[a.id]).unwrap();

        let stats = CatalogStatsQuery::new(&conn).get_stats().unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.pending_records, 1);
        assert_eq!(stats.works, 0);
        assert_eq!(stats.indexed_works, 0);
    }
}
