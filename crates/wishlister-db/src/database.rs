use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::info;
use wishlister_common::{Error, Result};

use crate::migrations::{MigrationReport, MigrationSource, Migrator, VersionTracker};

/// The application's SQLite handle.
///
/// Open it, run [`Database::migrate`] once at start-up, then hand out the
/// connection to the rest of the application.
pub struct Database {
    conn: Mutex<Connection>,
    tracker: VersionTracker,
}

impl Database {
    /// Open `db_path`, tracking schema versions in `table`. A bad table name
    /// is rejected before the file is touched.
    pub fn open(db_path: &Path, busy_timeout: Duration, table: &str) -> Result<Self> {
        let tracker = VersionTracker::new(table)?;

        info!("opening database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
        Self::with_connection(conn, tracker)
    }

    /// In-memory database using the default `schema_migrations` table.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::with_connection(conn, VersionTracker::default())
    }

    fn with_connection(conn: Connection, tracker: VersionTracker) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
            tracker,
        })
    }

    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("database lock poisoned".into()))
    }

    pub fn tracker(&self) -> &VersionTracker {
        &self.tracker
    }

    /// Bring the schema up to the newest migration of `source`. The
    /// connection is held for the whole run.
    pub fn migrate(&self, source: &dyn MigrationSource) -> Result<MigrationReport> {
        let mut conn = self.connection()?;
        let mut migrator = Migrator::new(&mut conn, source, self.tracker.clone())?;
        Ok(migrator.migrate()?)
    }

    /// Current schema version recorded in the tracking table.
    pub fn version(&self) -> Result<u32> {
        let conn = self.connection()?;
        Ok(self.tracker.current_version(&conn)?.version)
    }
}
