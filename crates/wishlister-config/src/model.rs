use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the table recording applied schema migrations.
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("db.sqlite"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Where migration files come from and where progress is tracked.
///
/// When `dir` is `None` the migrations compiled into the binary are used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub dir: Option<PathBuf>,
    pub table: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            table: DEFAULT_MIGRATIONS_TABLE.to_string(),
        }
    }
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}
