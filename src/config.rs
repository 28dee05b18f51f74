//! Configuration loading and management.

use crate::types::WorkItemStatus;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project-local configuration file, relative to the working directory.
pub const PROJECT_CONFIG_PATH: &str = ".catalog-materializer/config.yaml";

/// Materializer configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub materialize: MaterializeConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// How long a writer waits for a competing transaction, in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".catalog-materializer/materializer.db")
}

fn default_busy_timeout() -> u64 {
    5000
}

/// Behaviour of the materialization pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializeConfig {
    /// Create catalog subtasks the caller did not list, when their parent was
    /// selected. A request's `explicitSelectionOnly` overrides this.
    #[serde(default = "default_backfill")]
    pub backfill_subtasks: bool,

    /// Status assigned to freshly created work items.
    #[serde(default)]
    pub initial_status: WorkItemStatus,
}

impl Default for MaterializeConfig {
    fn default() -> Self {
        Self {
            backfill_subtasks: default_backfill(),
            initial_status: WorkItemStatus::default(),
        }
    }
}

fn default_backfill() -> bool {
    true
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from default locations or return defaults.
    ///
    /// Project config wins over user config; environment variables are
    /// applied on top of whichever was found.
    pub fn load_or_default() -> Self {
        let mut config = Self::load(PROJECT_CONFIG_PATH)
            .ok()
            .or_else(|| user_config_path().and_then(|p| Self::load(p).ok()))
            .unwrap_or_default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply environment overrides through a lookup function.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = lookup("CATALOG_MATERIALIZER_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }

        if let Some(timeout) = lookup("CATALOG_MATERIALIZER_BUSY_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse() {
                self.server.busy_timeout_ms = timeout;
            }
        }

        if let Some(backfill) = lookup("CATALOG_MATERIALIZER_BACKFILL_SUBTASKS") {
            match backfill.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.materialize.backfill_subtasks = true,
                "0" | "false" | "no" | "off" => self.materialize.backfill_subtasks = false,
                _ => {}
            }
        }
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.server.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".catalog-materializer").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_enable_backfill() {
        let config = Config::default();
        assert!(config.materialize.backfill_subtasks);
        assert_eq!(config.materialize.initial_status, WorkItemStatus::Open);
        assert_eq!(config.server.busy_timeout_ms, 5000);
    }

    #[test]
    fn load_partial_yaml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "materialize:\n  backfill_subtasks: false\n  initial_status: in_progress\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert!(!config.materialize.backfill_subtasks);
        assert_eq!(config.materialize.initial_status, WorkItemStatus::InProgress);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CATALOG_MATERIALIZER_DB_PATH", "/tmp/other.db"),
            ("CATALOG_MATERIALIZER_BUSY_TIMEOUT_MS", "250"),
            ("CATALOG_MATERIALIZER_BACKFILL_SUBTASKS", "off"),
        ]);
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.server.busy_timeout_ms, 250);
        assert!(!config.materialize.backfill_subtasks);
    }

    #[test]
    fn env_ignores_unparseable_values() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "CATALOG_MATERIALIZER_BUSY_TIMEOUT_MS" => Some("soon".to_string()),
            "CATALOG_MATERIALIZER_BACKFILL_SUBTASKS" => Some("maybe".to_string()),
            _ => None,
        });
        assert_eq!(config, Config::default());
    }
}
