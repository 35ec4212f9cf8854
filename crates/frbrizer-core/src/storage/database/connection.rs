use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::debug;

use super::migrations::run_migrations;
use super::schema::apply_pragmas;
use crate::error::Result;

/// The single SQLite connection behind a [`super::Database`], already
/// configured and migrated to the current schema.
pub struct CatalogConnection {
    file: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl CatalogConnection {
    /// Opens (creating if needed) the catalog file, including missing
    /// parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::prepare(Connection::open(path)?, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?, None)
    }

    fn prepare(conn: Connection, file: Option<PathBuf>) -> Result<Self> {
        apply_pragmas(&conn)?;
        run_migrations(&conn)?;
        debug!(path = ?file, "catalog opened");
        Ok(Self {
            file,
            conn: Mutex::new(conn),
        })
    }

    /// A poisoned lock is recovered: a panicking holder's open transaction
    /// has already rolled back on drop.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}
