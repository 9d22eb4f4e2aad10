use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{debug, info};

use super::error::MigrationError;

const DEFAULT_TABLE: &str = "schema_migrations";

/// The schema version found in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedVersion {
    pub version: u32,
    /// The tracking table did not exist and was created by this call.
    pub bootstrapped: bool,
}

/// A row of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: u32,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Reads and writes the schema version marker kept in a tracking table.
///
/// The table holds one row per applied migration; the current version is
/// the highest recorded one, or 0 when the table is empty or missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTracker {
    table: String,
}

impl Default for VersionTracker {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl VersionTracker {
    /// Track versions in `table`, which must be a plain SQL identifier.
    pub fn new(table: impl Into<String>) -> Result<Self, MigrationError> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(MigrationError::InvalidTableName { table });
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether the tracking table exists, checked through `sqlite_master`.
    pub fn exists(&self, conn: &Connection) -> Result<bool, MigrationError> {
        conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![self.table],
            |row| row.get(0),
        )
        .map_err(|source| self.query_err(source))
    }

    /// Read the current version, creating the tracking table first if the
    /// database has never been migrated.
    pub fn current_version(&self, conn: &Connection) -> Result<TrackedVersion, MigrationError> {
        if !self.exists(conn)? {
            info!("{} table not found, creating it", self.table);
            self.bootstrap(conn)?;
            return Ok(TrackedVersion {
                version: 0,
                bootstrapped: true,
            });
        }

        let version: Option<u32> = conn
            .query_row(&format!("SELECT MAX(version) FROM {}", self.table), [], |row| {
                row.get(0)
            })
            .map_err(|source| self.query_err(source))?;

        let version = version.unwrap_or(0);
        debug!("schema version read from {}: {version}", self.table);
        Ok(TrackedVersion {
            version,
            bootstrapped: false,
        })
    }

    /// Insert the marker row for `version`. Call it on the transaction that
    /// applied the migration so both commit together.
    pub fn record(&self, conn: &Connection, version: u32) -> Result<(), MigrationError> {
        conn.execute(
            &format!("INSERT INTO {} (version) VALUES (?1)", self.table),
            params![version],
        )
        .map_err(|source| MigrationError::Record { version, source })?;
        Ok(())
    }

    /// Every recorded migration, oldest version first. Empty when the table
    /// does not exist yet.
    pub fn applied(&self, conn: &Connection) -> Result<Vec<AppliedMigration>, MigrationError> {
        if !self.exists(conn)? {
            return Ok(Vec::new());
        }

        let mut stmt = conn
            .prepare(&format!(
                "SELECT version, applied_at FROM {} ORDER BY version ASC",
                self.table
            ))
            .map_err(|source| self.query_err(source))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(AppliedMigration {
                    version: row.get(0)?,
                    applied_at: row
                        .get::<_, Option<String>>(1)?
                        .as_deref()
                        .and_then(parse_timestamp),
                })
            })
            .map_err(|source| self.query_err(source))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|source| self.query_err(source))
    }

    fn bootstrap(&self, conn: &Connection) -> Result<(), MigrationError> {
        conn.execute_batch(&format!(
            "CREATE TABLE {} (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            self.table
        ))
        .map_err(|source| MigrationError::Bootstrap {
            table: self.table.clone(),
            source,
        })
    }

    fn query_err(&self, source: rusqlite::Error) -> MigrationError {
        MigrationError::VersionQuery {
            table: self.table.clone(),
            source,
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    // CURRENT_TIMESTAMP produces "YYYY-MM-DD HH:MM:SS"
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)))
        .ok()
}
