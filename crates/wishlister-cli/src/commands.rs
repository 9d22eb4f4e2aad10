use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use wishlister_config::AppConfig;
use wishlister_db::migrations::{
    MigrationSet, MigrationSource, UP_MARKER, load_migrations, parse_filename,
    validate_migrations,
};
use wishlister_db::{Database, DirSource};

/// Apply pending migrations. This is the start-up path: any error aborts.
pub fn migrate(config: &AppConfig) -> Result<()> {
    let db = open_database(config)?;
    let source = migration_source(config);

    let report = db
        .migrate(source.as_ref())
        .context("error while applying migrations")?;

    if report.applied.is_empty() {
        println!("Schema already at version {}.", report.to_version);
    } else {
        println!(
            "Schema migrated from version {} to {} ({} applied).",
            report.from_version,
            report.to_version,
            report.applied.len()
        );
    }
    Ok(())
}

pub fn version(config: &AppConfig) -> Result<()> {
    let db = open_database(config)?;
    let version = db.version().context("failed to read schema version")?;
    println!("{version}");
    Ok(())
}

pub fn check(config: &AppConfig) -> Result<()> {
    let set = load_set(migration_source(config).as_ref())?;
    println!(
        "{} migrations OK, target version {}.",
        set.len(),
        set.max_version()
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum EntryState {
    Applied,
    Pending,
    /// Recorded in the database but absent from the migration set.
    Unknown,
}

#[derive(Debug, Serialize)]
struct StatusEntry {
    version: u32,
    name: Option<String>,
    state: EntryState,
    applied_at: Option<DateTime<Utc>>,
}

pub fn status(config: &AppConfig, json: bool) -> Result<()> {
    let set = load_set(migration_source(config).as_ref())?;
    let db = open_database(config)?;

    let applied = {
        let conn = db.connection()?;
        db.tracker()
            .applied(&conn)
            .context("failed to read migration history")?
    };

    let entries = status_entries(&set, applied.into_iter().map(|a| (a.version, a.applied_at)));

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        let state = match entry.state {
            EntryState::Applied => "applied",
            EntryState::Pending => "pending",
            EntryState::Unknown => "unknown",
        };
        let applied_at = entry
            .applied_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "{state:<8} {:>5}  {:<40} {applied_at}",
            entry.version,
            entry.name.as_deref().unwrap_or("?")
        );
    }
    Ok(())
}

fn status_entries(
    set: &MigrationSet,
    applied: impl IntoIterator<Item = (u32, Option<DateTime<Utc>>)>,
) -> Vec<StatusEntry> {
    let mut applied: BTreeMap<u32, Option<DateTime<Utc>>> = applied.into_iter().collect();

    let mut entries: Vec<StatusEntry> = set
        .iter()
        .map(|m| match applied.remove(&m.version()) {
            Some(applied_at) => StatusEntry {
                version: m.version(),
                name: Some(m.name().to_string()),
                state: EntryState::Applied,
                applied_at,
            },
            None => StatusEntry {
                version: m.version(),
                name: Some(m.name().to_string()),
                state: EntryState::Pending,
                applied_at: None,
            },
        })
        .collect();

    entries.extend(applied.into_iter().map(|(version, applied_at)| StatusEntry {
        version,
        name: None,
        state: EntryState::Unknown,
        applied_at,
    }));
    entries
}

/// Create `<max + 1>_<name>.sql` holding only the `-- +migrate Up` header.
/// Loading fails on it until statements are added.
pub fn new_migration(config: &AppConfig, name: &str) -> Result<()> {
    let Some(dir) = config.migrations.dir.as_deref() else {
        bail!("no migrations directory configured; pass --migrations <dir>");
    };
    let path = create_migration_file(dir, name)?;
    println!("Created {}", path.display());
    Ok(())
}

fn create_migration_file(dir: &Path, name: &str) -> Result<std::path::PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let slug = name.trim().replace(char::is_whitespace, "_").to_lowercase();
    if slug.is_empty() {
        bail!("migration name cannot be empty");
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        bail!("migration name {name:?} may only contain letters, digits, spaces and underscores");
    }

    let set = load_set(&DirSource::new(dir))?;
    let filename = format!("{}_{slug}.sql", set.max_version() + 1);
    parse_filename(&filename).with_context(|| format!("cannot use {name:?} as a migration name"))?;

    let path = dir.join(&filename);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writeln!(file, "{UP_MARKER}")?;

    info!("created migration {}", path.display());
    Ok(path)
}

fn load_set(source: &dyn MigrationSource) -> Result<MigrationSet> {
    let migrations = load_migrations(source).context("failed to load migrations")?;
    validate_migrations(migrations).context("invalid migration set")
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let path = &config.database.path;
    Database::open(
        path,
        config.database.busy_timeout(),
        &config.migrations.table,
    )
        .with_context(|| format!("error while opening database {}", path.display()))
}

fn migration_source(config: &AppConfig) -> Box<dyn MigrationSource> {
    match &config.migrations.dir {
        Some(dir) => Box::new(DirSource::new(dir)),
        None => Box::new(wishlister_db::embedded()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn new_migration_takes_next_version() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1_a.sql", "-- +migrate Up\nCREATE TABLE a (x int);\n");
        write(dir.path(), "2_b.sql", "-- +migrate Up\nCREATE TABLE b (x int);\n");

        let path = create_migration_file(dir.path(), "Add wishlist owner").unwrap();
        assert_eq!(path.file_name().unwrap(), "3_add_wishlist_owner.sql");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "-- +migrate Up\n");
    }

    #[test]
    fn new_migration_in_empty_dir_starts_at_one() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("migrations");
        let path = create_migration_file(&dir, "init").unwrap();
        assert_eq!(path.file_name().unwrap(), "1_init.sql");
    }

    #[test]
    fn new_migration_refuses_broken_set() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "2_b.sql", "-- +migrate Up\nCREATE TABLE b (x int);\n");
        assert!(create_migration_file(dir.path(), "c").is_err());
    }

    #[test]
    fn new_migration_requires_a_name() {
        let dir = tempfile::tempdir().unwrap();
        assert!(create_migration_file(dir.path(), "   ").is_err());
    }

    #[test]
    fn new_migration_rejects_path_characters() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a/b", "../escape", "drop; table", "café"] {
            let err = create_migration_file(dir.path(), name).unwrap_err();
            assert!(
                err.to_string().contains("may only contain letters, digits"),
                "{name}: {err}"
            );
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn new_migration_requires_a_directory() {
        let err = new_migration(&AppConfig::default(), "x").unwrap_err();
        assert!(err.to_string().contains("no migrations directory"));
    }

    #[test]
    fn status_marks_applied_pending_and_unknown() {
        let set = load_set(&wishlister_db::embedded()).unwrap();
        let entries = status_entries(&set, [(1, None), (2, None), (9, None)]);

        let states: Vec<(u32, EntryState)> = entries.iter().map(|e| (e.version, e.state)).collect();
        assert_eq!(
            states,
            vec![
                (1, EntryState::Applied),
                (2, EntryState::Applied),
                (3, EntryState::Pending),
                (9, EntryState::Unknown),
            ]
        );
        assert_eq!(entries[0].name.as_deref(), Some("create_wishlists"));
        assert!(entries[3].name.is_none());
    }

    #[test]
    fn migrate_then_version_on_disk() {
        let data = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.database.path = data.path().join("db.sqlite");

        migrate(&config).unwrap();
        let db = open_database(&config).unwrap();
        assert_eq!(db.version().unwrap(), 3);
    }
}
