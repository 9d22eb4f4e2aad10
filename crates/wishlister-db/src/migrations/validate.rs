use std::collections::HashSet;

use super::error::MigrationError;
use super::{Migration, MigrationSet};

/// Check that `migrations` covers every version in `1..=max` exactly once
/// and return them sorted.
///
/// An empty input is valid and yields a set with `max_version() == 0`.
pub fn validate_migrations(mut migrations: Vec<Migration>) -> Result<MigrationSet, MigrationError> {
    let mut seen = HashSet::with_capacity(migrations.len());
    let mut max_version = 0;
    for migration in &migrations {
        if !seen.insert(migration.version()) {
            return Err(MigrationError::DuplicateVersion {
                version: migration.version(),
            });
        }
        max_version = max_version.max(migration.version());
    }

    if let Some(version) = (1..=max_version).find(|v| !seen.contains(v)) {
        return Err(MigrationError::MissingVersion { version });
    }

    migrations.sort_by_key(Migration::version);

    Ok(MigrationSet {
        migrations,
        max_version,
    })
}
