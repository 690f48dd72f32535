//! The migration job store.
//!
//! Jobs are the only state shared between the sweeps, the workers and the
//! upload and report surfaces. Every one of them goes through
//! [`MigrationRepo`]; this module only owns the connection and the schema.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod error;
pub mod migration_repo;
pub mod migrations;

pub use error::DatabaseError;
pub use migration_repo::{JobFilter, MigrationRepo, SortOrder};

/// One SQLite connection behind a mutex.
///
/// A sweep's read-then-save and a worker's save never interleave on the
/// connection, so a job row is always read whole. Clones share the
/// connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the job store at `path`, creating the file and its parent
    /// directories on first use, and brings the schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A private in-memory store with the current schema.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` while holding the connection. Keep `f` short: every worker
    /// and sweep waits on the same lock.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// `~/.course-migration/data/migrations.db`, used when the configuration
/// names no database file.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| {
        h.join(".course-migration")
            .join("data")
            .join("migrations.db")
    })
}
