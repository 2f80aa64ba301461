use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::resolve::PlaceholderValues;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Only needed by `load`.
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            log_level: default_log_level(),
            max_log_files: default_max_log_files(),
        }
    }
}

/// Values substituted for `$ENTIDAD` / `$SUBENTORNO` when matching
/// override tables.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_entidades")]
    pub entidades: Vec<String>,
    #[serde(default = "default_subentornos")]
    pub subentornos: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entidades: default_entidades(),
            subentornos: default_subentornos(),
        }
    }
}

impl EngineConfig {
    pub fn placeholders(&self) -> PlaceholderValues {
        PlaceholderValues {
            entidades: self.entidades.iter().map(|v| v.to_lowercase()).collect(),
            subentornos: self.subentornos.iter().map(|v| v.to_lowercase()).collect(),
        }
    }
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    7
}

fn default_pool_size() -> usize {
    4
}

fn default_entidades() -> Vec<String> {
    PlaceholderValues::default().entidades
}

fn default_subentornos() -> Vec<String> {
    PlaceholderValues::default().subentornos
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// `--config` wins, then `CONFIG_PATH`, then `./config.toml`. Only the
    /// implicit default may be absent, in which case defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }
        if let Ok(path) = std::env::var("CONFIG_PATH") {
            return Ok((Self::from_file(&path)?, Some(PathBuf::from(path))));
        }
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Ok((Self::from_file(path)?, Some(path.to_path_buf())))
        } else {
            Ok((Self::default(), None))
        }
    }

    pub fn database(&self) -> Result<&DatabaseConfig> {
        self.database
            .as_ref()
            .ok_or_else(|| anyhow!("No [database] section in configuration"))
    }

    pub fn database_url(&self) -> Result<String> {
        let db = self.database()?;
        Ok(format!(
            "host={} port={} dbname={} user={} password={}",
            db.host, db.port, db.dbname, db.user, db.password
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_file() -> Result<()> {
        let config: AppConfig = toml::from_str("")?;
        assert_eq!(config.logging.log_dir, "./logs");
        assert_eq!(config.logging.max_log_files, 7);
        assert_eq!(config.engine.entidades, vec!["bsc", "bsj", "ber", "bsf"]);
        assert!(config.database.is_none());
        assert!(config.database_url().is_err());
        Ok(())
    }

    #[test]
    fn test_full_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"
[logging]
log_level = "debug"

[engine]
entidades = ["BSC", "xyz"]

[database]
host = "localhost"
port = 5432
dbname = "lineage"
user = "etl"
password = "secret"
"#
        )?;
        let (config, path) = AppConfig::load(Some(file.path()))?;
        assert_eq!(path.as_deref(), Some(file.path()));
        assert_eq!(config.logging.log_level, "debug");
        assert_eq!(config.engine.placeholders().entidades, vec!["bsc", "xyz"]);
        assert_eq!(config.engine.subentornos, vec!["pr", "de"]);
        assert_eq!(
            config.database_url()?,
            "host=localhost port=5432 dbname=lineage user=etl password=secret"
        );
        assert_eq!(config.database()?.pool_size, 4);
        Ok(())
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        assert!(AppConfig::load(Some(Path::new("/nonexistent/lake.toml"))).is_err());
    }
}
