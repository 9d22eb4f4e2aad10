mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wishlister_config::{AppConfig, ConfigLoader};

#[derive(Parser)]
#[command(name = "wishlister", version, about = "Wishlister database schema migrations")]
struct Cli {
    /// Path to config.yml / config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "WISHLISTER_DATABASE", global = true)]
    database: Option<PathBuf>,

    /// Directory of `<version>_<name>.sql` files (defaults to the built-in schema)
    #[arg(long, env = "WISHLISTER_MIGRATIONS_DIR", global = true)]
    migrations: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply all pending migrations
    Migrate,
    /// Print the current schema version
    Version,
    /// List applied and pending migrations
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Load and validate migrations without opening the database
    Check,
    /// Create the next numbered migration file
    New {
        /// Descriptive name, e.g. "add wishlist owner"
        name: String,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config =
        ConfigLoader::load(cli.config.as_deref()).context("failed to load configuration")?;
    apply_overrides(&mut config, cli.database, cli.migrations);
    init_tracing(config.log_level(), cli.log_json);

    match cli.command {
        Command::Migrate => commands::migrate(&config),
        Command::Version => commands::version(&config),
        Command::Status { json } => commands::status(&config, json),
        Command::Check => commands::check(&config),
        Command::New { name } => commands::new_migration(&config, &name),
    }
}

fn apply_overrides(config: &mut AppConfig, database: Option<PathBuf>, migrations: Option<PathBuf>) {
    if let Some(path) = database {
        config.database.path = path;
    }
    if let Some(dir) = migrations {
        config.migrations.dir = Some(dir);
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
