//! Versioned SQL schema migrations.
//!
//! Migration files are named `<version>_<name>.sql` and start with the line
//! `-- +migrate Up`. Versions must form the gap-free range `1..=max`. Each
//! pending migration is applied in its own transaction together with the
//! row that records it in the tracking table, so a failed migration leaves
//! the database at the last committed version.

mod engine;
mod error;
mod source;
mod tracker;
mod validate;

pub use engine::{MigrationReport, Migrator, MigratorState};
pub use error::MigrationError;
pub use source::{
    DirSource, EmbeddedSource, MigrationSource, SourceFile, UP_MARKER, load_migrations,
    parse_filename, parse_migration, parse_statements,
};
pub use tracker::{AppliedMigration, TrackedVersion, VersionTracker};
pub use validate::validate_migrations;

/// One numbered schema step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    version: u32,
    name: String,
    statements: Vec<String>,
}

impl Migration {
    pub fn new(version: u32, name: impl Into<String>, statements: Vec<String>) -> Self {
        Self {
            version,
            name: name.into(),
            statements,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

/// A validated migration set: sorted by version, versions exactly `1..=max_version`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
    max_version: u32,
}

impl MigrationSet {
    /// The schema version reached once every migration is applied.
    pub fn max_version(&self) -> u32 {
        self.max_version
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn get(&self, version: u32) -> Option<&Migration> {
        let index = version.checked_sub(1)?;
        self.migrations.get(index as usize)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Migration> {
        self.migrations.iter()
    }

    /// Migrations with a version greater than `current`, in apply order.
    pub fn pending(&self, current: u32) -> &[Migration] {
        let start = (current as usize).min(self.migrations.len());
        &self.migrations[start..]
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a Migration;
    type IntoIter = std::slice::Iter<'a, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
