use std::path::PathBuf;

use thiserror::Error;

use super::source::UP_MARKER;

/// Everything that can stop a migration run.
///
/// Load and validation errors happen before the database is touched.
/// Application errors carry the version that failed; everything before
/// it stays committed.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("invalid migration filename: {filename}")]
    InvalidFilename { filename: String },

    #[error("empty migration file: {filename}")]
    Empty { filename: String },

    #[error("invalid migration file: {filename}, first line must be {:?}", UP_MARKER)]
    InvalidFile { filename: String },

    #[error("failed to read migrations from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("duplicate migration version: {version}")]
    DuplicateVersion { version: u32 },

    #[error("missing migration version: {version}")]
    MissingVersion { version: u32 },

    #[error("invalid migrations table name: {table:?}")]
    InvalidTableName { table: String },

    #[error("failed to create {table} table: {source}")]
    Bootstrap {
        table: String,
        source: rusqlite::Error,
    },

    #[error("failed to read schema version from {table}: {source}")]
    VersionQuery {
        table: String,
        source: rusqlite::Error,
    },

    #[error("failed to begin transaction for migration {version}: {source}")]
    Begin {
        version: u32,
        source: rusqlite::Error,
    },

    #[error("failed to apply migration {version} ({name}): {source}")]
    Apply {
        version: u32,
        name: String,
        source: rusqlite::Error,
    },

    #[error("failed to record migration {version}: {source}")]
    Record {
        version: u32,
        source: rusqlite::Error,
    },

    #[error("failed to commit migration {version}: {source}")]
    Commit {
        version: u32,
        source: rusqlite::Error,
    },
}

impl MigrationError {
    /// The migration version this error is about, if any.
    pub fn version(&self) -> Option<u32> {
        match self {
            Self::DuplicateVersion { version }
            | Self::MissingVersion { version }
            | Self::Begin { version, .. }
            | Self::Apply { version, .. }
            | Self::Record { version, .. }
            | Self::Commit { version, .. } => Some(*version),
            _ => None,
        }
    }
}

impl From<MigrationError> for wishlister_common::Error {
    fn from(e: MigrationError) -> Self {
        wishlister_common::Error::Migration(e.to_string())
    }
}
