use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 3;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;
    Ok(())
}

/// Source records and their identifier index. `record_identifiers` holds the
/// normalized `value|scheme` strings and backs the identifier-overlap query.
pub fn create_record_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS records (
            id             TEXT PRIMARY KEY,
            source         TEXT NOT NULL,
            source_id      TEXT NOT NULL,
            title          TEXT NOT NULL,
            authors        TEXT NOT NULL DEFAULT '[]',
            dates          TEXT NOT NULL DEFAULT '[]',
            identifiers    TEXT NOT NULL DEFAULT '[]',
            publisher      TEXT NOT NULL DEFAULT '[]',
            spatial        TEXT,
            has_version    TEXT NOT NULL DEFAULT '[]',
            rights         TEXT NOT NULL DEFAULT '[]',
            subjects       TEXT NOT NULL DEFAULT '[]',
            has_part       TEXT NOT NULL DEFAULT '[]',
            languages      TEXT NOT NULL DEFAULT '[]',
            frbr_status    TEXT NOT NULL DEFAULT 'to_do',
            cluster_status INTEGER NOT NULL DEFAULT 0,
            date_modified  TEXT NOT NULL,
            UNIQUE (source, source_id)
        );

        CREATE TABLE IF NOT EXISTS record_identifiers (
            record_id  TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
            identifier TEXT NOT NULL,
            PRIMARY KEY (record_id, identifier)
        );

        CREATE INDEX IF NOT EXISTS idx_record_identifiers_identifier ON record_identifiers(identifier);
        CREATE INDEX IF NOT EXISTS idx_records_cluster_status        ON records(cluster_status);
        ",
    )?;
    Ok(())
}

/// The clustered Work graph: works own editions own items own links.
pub fn create_work_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS works (
            id         TEXT PRIMARY KEY,
            title      TEXT NOT NULL,
            alt_titles TEXT NOT NULL DEFAULT '[]',
            subjects   TEXT NOT NULL DEFAULT '[]',
            languages  TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS identifiers (
            id     INTEGER PRIMARY KEY,
            value  TEXT NOT NULL,
            scheme TEXT NOT NULL,
            UNIQUE (value, scheme)
        );

        CREATE TABLE IF NOT EXISTS work_identifiers (
            work_id       TEXT NOT NULL REFERENCES works(id) ON DELETE CASCADE,
            identifier_id INTEGER NOT NULL REFERENCES identifiers(id),
            PRIMARY KEY (work_id, identifier_id)
        );

        CREATE TABLE IF NOT EXISTS editions (
            id                TEXT PRIMARY KEY,
            work_id           TEXT NOT NULL REFERENCES works(id) ON DELETE CASCADE,
            publication_year  INTEGER,
            title             TEXT,
            publisher         TEXT,
            place             TEXT,
            edition_statement TEXT,
            sort_order        INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS edition_identifiers (
            edition_id    TEXT NOT NULL REFERENCES editions(id) ON DELETE CASCADE,
            identifier_id INTEGER NOT NULL REFERENCES identifiers(id),
            PRIMARY KEY (edition_id, identifier_id)
        );

        CREATE TABLE IF NOT EXISTS edition_records (
            edition_id TEXT NOT NULL REFERENCES editions(id) ON DELETE CASCADE,
            record_id  TEXT NOT NULL,
            PRIMARY KEY (edition_id, record_id)
        );

        CREATE TABLE IF NOT EXISTS items (
            id         TEXT PRIMARY KEY,
            edition_id TEXT NOT NULL REFERENCES editions(id) ON DELETE CASCADE,
            record_id  TEXT NOT NULL,
            source     TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS links (
            id         INTEGER PRIMARY KEY,
            item_id    TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
            url        TEXT NOT NULL,
            media_type TEXT NOT NULL,
            flags      TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS agents (
            id           INTEGER PRIMARY KEY,
            work_id      TEXT REFERENCES works(id) ON DELETE CASCADE,
            edition_id   TEXT REFERENCES editions(id) ON DELETE CASCADE,
            name         TEXT NOT NULL,
            authority_id TEXT,
            roles        TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS rights (
            id         INTEGER PRIMARY KEY,
            edition_id TEXT REFERENCES editions(id) ON DELETE CASCADE,
            item_id    TEXT REFERENCES items(id) ON DELETE CASCADE,
            source     TEXT NOT NULL,
            license    TEXT NOT NULL,
            reason     TEXT,
            statement  TEXT,
            date       TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_editions_work               ON editions(work_id);
        CREATE INDEX IF NOT EXISTS idx_edition_records_record      ON edition_records(record_id);
        CREATE INDEX IF NOT EXISTS idx_work_identifiers_identifier ON work_identifiers(identifier_id);
        CREATE INDEX IF NOT EXISTS idx_items_edition               ON items(edition_id);
        CREATE INDEX IF NOT EXISTS idx_links_item                  ON links(item_id);
        CREATE INDEX IF NOT EXISTS idx_agents_work                 ON agents(work_id);
        CREATE INDEX IF NOT EXISTS idx_agents_edition              ON agents(edition_id);
        CREATE INDEX IF NOT EXISTS idx_rights_edition              ON rights(edition_id);
        CREATE INDEX IF NOT EXISTS idx_rights_item                 ON rights(item_id);
        ",
    )?;
    Ok(())
}

/// Search documents for works and the shared identifier cache.
pub fn create_search_and_cache_tables(conn: &Connection) -> Result<()> {
    let has_fts: bool = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name='works_fts'")?
        .exists([])?;

    if !has_fts {
        conn.execute_batch(
            "
            CREATE VIRTUAL TABLE works_fts USING fts5(
                work_id UNINDEXED, title, alt_titles, authors, subjects, publishers
            );
            ",
        )?;
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cache_entries (
            namespace  TEXT NOT NULL,
            key        TEXT NOT NULL,
            scope      TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, key, scope)
        );

        CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);
        ",
    )?;
    Ok(())
}
