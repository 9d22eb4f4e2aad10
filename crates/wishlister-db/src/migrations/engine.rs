use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{info, warn};

use super::error::MigrationError;
use super::source::{MigrationSource, load_migrations};
use super::tracker::VersionTracker;
use super::validate::validate_migrations;
use super::{Migration, MigrationSet};

/// Where a [`Migrator`] stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigratorState {
    /// Migrations loaded and validated, some still pending.
    Idle,
    /// Inside the transaction of this version.
    Applying(u32),
    UpToDate,
    /// This version was rolled back; earlier ones are committed.
    Failed(u32),
}

/// Outcome of a successful [`Migrator::migrate`] run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub applied: Vec<u32>,
    /// The tracking table was created while constructing the migrator.
    pub bootstrapped: bool,
}

/// Applies a validated migration set to one SQLite connection.
///
/// Construction loads and validates every migration and reads the current
/// version, so a malformed set fails before anything is written.
pub struct Migrator<'c> {
    conn: &'c mut Connection,
    tracker: VersionTracker,
    migrations: MigrationSet,
    current_version: u32,
    bootstrapped: bool,
    state: MigratorState,
}

impl<'c> Migrator<'c> {
    pub fn new(
        conn: &'c mut Connection,
        source: &dyn MigrationSource,
        tracker: VersionTracker,
    ) -> Result<Self, MigrationError> {
        let migrations = validate_migrations(load_migrations(source)?)?;
        let tracked = tracker.current_version(conn)?;

        info!(
            "schema at version {}, {} migrations known (target {})",
            tracked.version,
            migrations.len(),
            migrations.max_version()
        );

        let state = if tracked.version >= migrations.max_version() {
            MigratorState::UpToDate
        } else {
            MigratorState::Idle
        };

        Ok(Self {
            conn,
            tracker,
            migrations,
            current_version: tracked.version,
            bootstrapped: tracked.bootstrapped,
            state,
        })
    }

    pub fn state(&self) -> MigratorState {
        self.state
    }

    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    /// Last version this migrator knows to be committed.
    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    pub fn target_version(&self) -> u32 {
        self.migrations.max_version()
    }

    pub fn pending(&self) -> &[Migration] {
        self.migrations.pending(self.current_version)
    }

    /// Query the persisted schema version.
    pub fn version(&self) -> Result<u32, MigrationError> {
        Ok(self.tracker.current_version(&*self.conn)?.version)
    }

    /// Apply every pending migration in version order.
    ///
    /// Stops at the first failure. That migration is rolled back and the
    /// returned error names its version; the ones before it stay applied.
    /// Running again resumes from the last committed version.
    pub fn migrate(&mut self) -> Result<MigrationReport, MigrationError> {
        let mut report = MigrationReport {
            from_version: self.current_version,
            to_version: self.current_version,
            applied: Vec::new(),
            bootstrapped: self.bootstrapped,
        };

        let target = self.migrations.max_version();
        if self.migrations.is_empty() {
            info!("no migrations to apply");
            self.state = MigratorState::UpToDate;
            return Ok(report);
        }
        if self.current_version >= target {
            if self.current_version > target {
                warn!(
                    "database is at version {} but the newest known migration is {target}",
                    self.current_version
                );
            } else {
                info!("database is already up to date at version {target}");
            }
            self.state = MigratorState::UpToDate;
            return Ok(report);
        }

        for version in self.current_version + 1..=target {
            self.state = MigratorState::Applying(version);
            if let Err(e) = self.apply(version) {
                self.state = MigratorState::Failed(version);
                return Err(e);
            }
            self.current_version = version;
            report.applied.push(version);
        }

        report.to_version = self.current_version;
        self.state = MigratorState::UpToDate;
        info!(
            "all migrations applied, schema at version {}",
            self.current_version
        );
        Ok(report)
    }

    fn apply(&mut self, version: u32) -> Result<(), MigrationError> {
        let migration = self
            .migrations
            .get(version)
            .ok_or(MigrationError::MissingVersion { version })?;
        info!("applying migration {version}: {}", migration.name());

        // IMMEDIATE takes the write lock up front so a concurrent migrator
        // waits instead of failing halfway through.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| MigrationError::Begin { version, source })?;

        for statement in migration.statements() {
            tx.execute_batch(statement)
                .map_err(|source| MigrationError::Apply {
                    version,
                    name: migration.name().to_string(),
                    source,
                })?;
        }

        self.tracker.record(&tx, version)?;

        tx.commit()
            .map_err(|source| MigrationError::Commit { version, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::EmbeddedSource;

    static THREE: &[(&str, &str)] = &[
        (
            "1_create_wishlists.sql",
            "-- +migrate Up\nCREATE TABLE wishlists (id TEXT PRIMARY KEY, name TEXT NOT NULL);\n",
        ),
        (
            "3_add_owner.sql",
            "-- +migrate Up\nALTER TABLE wishlists ADD COLUMN owner TEXT;\n",
        ),
        (
            "2_create_elements.sql",
            "-- +migrate Up\nCREATE TABLE elements (\n    id TEXT PRIMARY KEY,\n    wishlist_id TEXT NOT NULL\n);\nCREATE INDEX idx_elements_wishlist ON elements(wishlist_id);\n",
        ),
    ];

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn applies_everything_on_fresh_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut migrator =
            Migrator::new(&mut conn, &EmbeddedSource::new(THREE), VersionTracker::default())
                .unwrap();
        assert_eq!(migrator.state(), MigratorState::Idle);
        assert_eq!(migrator.pending().len(), 3);

        let report = migrator.migrate().unwrap();
        assert_eq!(
            report,
            MigrationReport {
                from_version: 0,
                to_version: 3,
                applied: vec![1, 2, 3],
                bootstrapped: true,
            }
        );
        assert_eq!(migrator.state(), MigratorState::UpToDate);
        assert_eq!(migrator.version().unwrap(), 3);
        assert!(migrator.pending().is_empty());
        drop(migrator);

        assert!(table_exists(&conn, "wishlists"));
        assert!(table_exists(&conn, "elements"));
        assert!(table_exists(&conn, "idx_elements_wishlist"));
    }

    #[test]
    fn second_run_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        let source = EmbeddedSource::new(THREE);
        Migrator::new(&mut conn, &source, VersionTracker::default())
            .unwrap()
            .migrate()
            .unwrap();

        let mut migrator = Migrator::new(&mut conn, &source, VersionTracker::default()).unwrap();
        let report = migrator.migrate().unwrap();
        assert!(report.applied.is_empty());
        assert!(!report.bootstrapped);
        assert_eq!(report.to_version, 3);
        assert_eq!(migrator.state(), MigratorState::UpToDate);
    }

    #[test]
    fn up_to_date_right_after_construction() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migrator =
            Migrator::new(&mut conn, &EmbeddedSource::new(&[]), VersionTracker::default())
                .unwrap();
        assert_eq!(migrator.state(), MigratorState::UpToDate);
        assert!(migrator.pending().is_empty());
        drop(migrator);

        let source = EmbeddedSource::new(THREE);
        Migrator::new(&mut conn, &source, VersionTracker::default())
            .unwrap()
            .migrate()
            .unwrap();

        let migrator = Migrator::new(&mut conn, &source, VersionTracker::default()).unwrap();
        assert_eq!(migrator.state(), MigratorState::UpToDate);
        assert_eq!(migrator.current_version(), 3);
    }

    #[test]
    fn empty_source_is_up_to_date() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut migrator =
            Migrator::new(&mut conn, &EmbeddedSource::new(&[]), VersionTracker::default())
                .unwrap();
        let report = migrator.migrate().unwrap();
        assert_eq!(report.to_version, 0);
        assert!(report.applied.is_empty());
        assert_eq!(migrator.state(), MigratorState::UpToDate);
    }

    #[test]
    fn failing_statement_rolls_back_its_migration_only() {
        static BROKEN: &[(&str, &str)] = &[
            (
                "1_a.sql",
                "-- +migrate Up\nCREATE TABLE a (x int);\n",
            ),
            (
                "2_b.sql",
                "-- +migrate Up\nCREATE TABLE b (y int);\nINSERT INTO nowhere VALUES (1);\n",
            ),
            (
                "3_c.sql",
                "-- +migrate Up\nCREATE TABLE c (z int);\n",
            ),
        ];

        let mut conn = Connection::open_in_memory().unwrap();
        let mut migrator =
            Migrator::new(&mut conn, &EmbeddedSource::new(BROKEN), VersionTracker::default())
                .unwrap();

        let err = migrator.migrate().unwrap_err();
        assert!(matches!(err, MigrationError::Apply { version: 2, .. }), "{err}");
        assert_eq!(err.version(), Some(2));
        assert_eq!(migrator.state(), MigratorState::Failed(2));
        assert_eq!(migrator.current_version(), 1);
        assert_eq!(migrator.version().unwrap(), 1);
        drop(migrator);

        assert!(table_exists(&conn, "a"));
        assert!(!table_exists(&conn, "b"));
        assert!(!table_exists(&conn, "c"));
    }

    #[test]
    fn invalid_set_fails_before_touching_the_database() {
        static GAP: &[(&str, &str)] = &[
            ("1_a.sql", "-- +migrate Up\nCREATE TABLE a (x int);\n"),
            ("3_c.sql", "-- +migrate Up\nCREATE TABLE c (z int);\n"),
        ];

        let mut conn = Connection::open_in_memory().unwrap();
        let err = Migrator::new(&mut conn, &EmbeddedSource::new(GAP), VersionTracker::default())
            .err()
            .unwrap();
        assert!(matches!(err, MigrationError::MissingVersion { version: 2 }));
        assert!(!table_exists(&conn, "schema_migrations"));
    }

    #[test]
    fn database_ahead_of_migrations_is_left_alone() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tracker = VersionTracker::default();
        tracker.current_version(&conn).unwrap();
        for version in 1..=5 {
            tracker.record(&conn, version).unwrap();
        }

        let mut migrator = Migrator::new(&mut conn, &EmbeddedSource::new(THREE), tracker).unwrap();
        let report = migrator.migrate().unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.to_version, 5);
        assert_eq!(migrator.state(), MigratorState::UpToDate);
        drop(migrator);

        assert!(!table_exists(&conn, "wishlists"));
    }
}
