use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::Migration;
use super::error::MigrationError;

/// Required first line of every migration file.
pub const UP_MARKER: &str = "-- +migrate Up";

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)_(.*)\.sql$").expect("migration filename regex is valid")
});

/// A raw file handed over by a [`MigrationSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub contents: String,
}

/// An addressable collection of migration files.
///
/// Implementations only list and read files. Parsing and ordering happen
/// in [`load_migrations`] and [`super::validate_migrations`].
pub trait MigrationSource {
    fn files(&self) -> Result<Vec<SourceFile>, MigrationError>;
}

/// Migration files living in a directory on disk. Subdirectories are not
/// traversed.
#[derive(Debug, Clone)]
pub struct DirSource {
    dir: PathBuf,
}

impl DirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl MigrationSource for DirSource {
    fn files(&self) -> Result<Vec<SourceFile>, MigrationError> {
        let read_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| MigrationError::Read { path, source }
        };

        let entries = std::fs::read_dir(&self.dir).map_err(read_err(&self.dir))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(read_err(&self.dir))?;
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "sql") {
                continue;
            }

            let name = entry.file_name().into_string().map_err(|raw| {
                MigrationError::InvalidFilename {
                    filename: raw.to_string_lossy().into_owned(),
                }
            })?;
            let contents = std::fs::read_to_string(&path).map_err(read_err(&path))?;
            files.push(SourceFile { name, contents });
        }

        debug!("found {} sql files in {}", files.len(), self.dir.display());
        Ok(files)
    }
}

/// Migration files compiled into the binary, as `(filename, contents)` pairs.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedSource {
    files: &'static [(&'static str, &'static str)],
}

impl EmbeddedSource {
    pub const fn new(files: &'static [(&'static str, &'static str)]) -> Self {
        Self { files }
    }
}

impl MigrationSource for EmbeddedSource {
    fn files(&self) -> Result<Vec<SourceFile>, MigrationError> {
        Ok(self
            .files
            .iter()
            .map(|(name, contents)| SourceFile {
                name: (*name).to_string(),
                contents: (*contents).to_string(),
            })
            .collect())
    }
}

/// Parse every `*.sql` file of `source` into a [`Migration`].
///
/// Files without the `.sql` suffix are not migrations and are skipped.
/// The result is in source order; see [`super::validate_migrations`].
pub fn load_migrations(source: &dyn MigrationSource) -> Result<Vec<Migration>, MigrationError> {
    source
        .files()?
        .into_iter()
        .filter(|file| file.name.ends_with(".sql"))
        .map(|file| parse_migration(&file.name, &file.contents))
        .collect()
}

/// Parse one migration file from its name and body.
pub fn parse_migration(filename: &str, contents: &str) -> Result<Migration, MigrationError> {
    let (version, name) = parse_filename(filename)?;
    let statements = parse_statements(filename, contents)?;
    Ok(Migration::new(version, name, statements))
}

/// Split `<version>_<name>.sql` into its parts. Version 0 is reserved for
/// "nothing applied" and is rejected.
pub fn parse_filename(filename: &str) -> Result<(u32, String), MigrationError> {
    let invalid = || MigrationError::InvalidFilename {
        filename: filename.to_string(),
    };

    let caps = FILENAME_RE.captures(filename).ok_or_else(invalid)?;
    let version: u32 = caps[1].parse().map_err(|_| invalid())?;
    if version == 0 {
        return Err(invalid());
    }

    Ok((version, caps[2].to_string()))
}

/// Split a migration body into statements.
///
/// A statement ends on a line whose last character is `;`. A `;` in the
/// middle of a line is not a boundary, so two statements on one line stay
/// together. Leftover text after the last terminated line becomes a final
/// statement unless it is only whitespace.
pub fn parse_statements(filename: &str, contents: &str) -> Result<Vec<String>, MigrationError> {
    let mut lines = contents.lines();

    let Some(first) = lines.next() else {
        return Err(MigrationError::Empty {
            filename: filename.to_string(),
        });
    };
    if first != UP_MARKER {
        return Err(MigrationError::InvalidFile {
            filename: filename.to_string(),
        });
    }

    let mut statements = Vec::new();
    let mut buffer = String::new();
    for line in lines {
        buffer.push_str(line);
        if line.ends_with(';') {
            statements.push(std::mem::take(&mut buffer));
        } else {
            buffer.push('\n');
        }
    }

    if !buffer.trim().is_empty() {
        statements.push(buffer);
    }

    if statements.is_empty() {
        return Err(MigrationError::Empty {
            filename: filename.to_string(),
        });
    }

    Ok(statements)
}
