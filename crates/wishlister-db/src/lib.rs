pub mod database;
pub mod migrations;
pub mod schema;

pub use database::Database;
pub use migrations::{
    DirSource, EmbeddedSource, Migration, MigrationError, MigrationReport, MigrationSet,
    MigrationSource, Migrator, MigratorState, VersionTracker,
};
pub use schema::embedded;
