use chrono::Utc;
use rusqlite::Connection;
use tracing::debug;

use super::schema;
use crate::error::Result;

pub trait Migration {
    fn version(&self) -> u32;
    fn description(&self) -> &'static str;
    fn up(&self, conn: &Connection) -> Result<()>;
}

/// One versioned schema step backed by a `schema::create_*` function.
struct SchemaStep {
    version: u32,
    description: &'static str,
    apply: fn(&Connection) -> Result<()>,
}

impl Migration for SchemaStep {
    fn version(&self) -> u32 {
        self.version
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        (self.apply)(conn)
    }
}

const STEPS: [SchemaStep; 3] = [
    SchemaStep {
        version: 1,
        description: "Source records and the record identifier index",
        apply: schema::create_record_tables,
    },
    SchemaStep {
        version: 2,
        description: "Works, editions, items, links, identifiers, agents and rights",
        apply: schema::create_work_tables,
    },
    SchemaStep {
        version: 3,
        description: "works_fts search documents and the identifier cache",
        apply: schema::create_search_and_cache_tables,
    },
];

fn has_migrations_table(conn: &Connection) -> Result<bool> {
    Ok(conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name='schema_migrations'")?
        .exists([])?)
}

fn record_migration(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![version, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn is_migration_applied(conn: &Connection, version: u32) -> Result<bool> {
    if !has_migrations_table(conn)? {
        return Ok(false);
    }

    let applied: bool = conn
        .prepare("SELECT 1 FROM schema_migrations WHERE version = ?1")?
        .exists(rusqlite::params![version])?;
    Ok(applied)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    for migration in &STEPS {
        if !is_migration_applied(conn, migration.version())? {
            debug!(
                version = migration.version(),
                description = migration.description(),
                "applying migration"
            );
            migration.up(conn)?;
            record_migration(conn, migration.version())?;
        }
    }

    Ok(())
}

pub fn get_applied_versions(conn: &Connection) -> Result<Vec<u32>> {
    if !has_migrations_table(conn)? {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row?);
    }
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::SCHEMA_VERSION;

    #[test]
    fn test_migrations_apply_in_order_and_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let versions = get_applied_versions(&conn).unwrap();
        assert_eq!(versions, (1..=SCHEMA_VERSION).collect::<Vec<_>>());
    }

    #[test]
    fn test_steps_end_at_schema_version() {
        assert_eq!(STEPS.last().map(|s| s.version), Some(SCHEMA_VERSION));
        assert!(STEPS.windows(2).all(|w| w[0].version < w[1].version));
    }

    #[test]
    fn test_fresh_connection_has_no_versions() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(get_applied_versions(&conn).unwrap().is_empty());
    }
}
