//! Configuration management for mimosa-matrix

pub mod schema;

pub use schema::Config;

use crate::error::{MatrixError, MatrixResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Environment variable overriding the tool binary path
pub const TOOL_BINARY_ENV: &str = "MIMOSA_BINARY";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mimosa-matrix")
            .join("config.toml")
    }

    /// Load configuration, falling back to defaults if the file is missing.
    ///
    /// `MIMOSA_BINARY` overrides `tool.binary` after the file is read.
    pub async fn load(&self) -> MatrixResult<Config> {
        let mut config = if self.config_path.exists() {
            self.load_from_file(&self.config_path).await?
        } else {
            debug!("Config file not found, using defaults");
            Config::default()
        };

        if let Some(binary) = std::env::var_os(TOOL_BINARY_ENV).filter(|v| !v.is_empty()) {
            debug!("Tool binary overridden by {}", TOOL_BINARY_ENV);
            config.tool.binary = PathBuf::from(binary);
        }

        Ok(config)
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> MatrixResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| MatrixError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| MatrixError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[tokio::test]
    #[serial]
    async fn load_default_when_missing() {
        std::env::remove_var(TOOL_BINARY_ENV);
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("nonexistent.toml"));

        let config = manager.load().await.unwrap();
        assert_eq!(config.tool.name, "mimosa");
    }

    #[tokio::test]
    #[serial]
    async fn binary_env_override() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[tool]\nbinary = \"/opt/mimosa\"\n").unwrap();

        std::env::set_var(TOOL_BINARY_ENV, "/tmp/mimosa-dev");
        let config = ConfigManager::with_path(path).load().await.unwrap();
        std::env::remove_var(TOOL_BINARY_ENV);

        assert_eq!(config.tool.binary, PathBuf::from("/tmp/mimosa-dev"));
    }

    #[tokio::test]
    async fn invalid_file_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[run]\nmax_workers = \"many\"\n").unwrap();

        let err = ConfigManager::with_path(path.clone())
            .load_from_file(&path)
            .await
            .unwrap_err();
        assert!(matches!(err, MatrixError::ConfigInvalid { .. }));
    }
}
