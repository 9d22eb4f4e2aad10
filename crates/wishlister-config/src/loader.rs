use std::path::{Path, PathBuf};

use tracing::{debug, info};
use wishlister_common::{Error, Result};

use crate::model::AppConfig;

const DEFAULT_CONFIG_FILE: &str = "config.yml";

/// Reads `AppConfig` from a YAML or TOML file.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Default config directory: `~/.config/wishlister` on Linux.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wishlister")
    }

    /// Load from `path`, or from the default location when `path` is `None`.
    ///
    /// An explicit path must exist. A missing default file yields the
    /// default configuration.
    pub fn load(path: Option<&Path>) -> Result<AppConfig> {
        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::NotFound(format!(
                        "config file {}",
                        path.display()
                    )));
                }
                Self::from_file(path)
            }
            None => {
                let path = Self::default_config_dir().join(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(&path)
                } else {
                    debug!("no config file at {}, using defaults", path.display());
                    Ok(AppConfig::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::parse(&contents, path)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<AppConfig> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }
}
