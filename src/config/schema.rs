//! Configuration schema for mimosa-matrix
//!
//! Configuration is stored at `~/.config/mimosa-matrix/config.toml`

use crate::matrix::Domains;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// The wrapped tool under test
    pub tool: ToolConfig,

    /// Image registry the builds push to
    pub registry: RegistryConfig,

    /// Build engine settings
    pub build: BuildConfig,

    /// Scheduler settings
    pub run: RunConfig,

    /// Domain overrides for the configuration space
    pub matrix: Domains,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Tool under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Path to the tool binary
    pub binary: PathBuf,

    /// Tool name, used as the cache-hit sentinel prefix
    pub name: String,

    /// Arguments that print the disk cache as an in-memory env value
    pub export_args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/local/bin/mimosa"),
            name: "mimosa".to_string(),
            export_args: vec!["cache".to_string(), "--to-env-value".to_string()],
        }
    }
}

impl ToolConfig {
    /// Environment variable naming the cache directory
    pub fn cache_dir_var(&self) -> String {
        format!("{}_CACHE_DIR", self.env_prefix())
    }

    /// Environment variable carrying the in-memory cache
    pub fn memory_cache_var(&self) -> String {
        format!("{}_CACHE", self.env_prefix())
    }

    fn env_prefix(&self) -> String {
        self.name.to_uppercase().replace('-', "_")
    }
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry host, always including a port
    pub host: String,

    /// URL scheme for the HTTP API
    pub scheme: String,

    /// Timeout for every registry request, in seconds
    pub timeout_secs: u64,

    /// Image used by `setup` to start a local registry
    pub image: String,

    /// Container name used by `setup`
    pub container_name: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "localhost:5000".to_string(),
            scheme: "http".to_string(),
            timeout_secs: 30,
            image: "registry:3".to_string(),
            container_name: "registry".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Base URL of the HTTP API (e.g. `http://localhost:5000`)
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Port the registry listens on, taken from `host`
    pub fn port(&self) -> Option<u16> {
        self.host.rsplit_once(':')?.1.parse().ok()
    }
}

/// Build engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Platforms every image is built for
    pub platforms: Vec<String>,

    /// buildx builder created by `setup`
    pub builder_name: String,

    /// Base image of every scaffolded build stage
    pub base_image: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            platforms: vec!["linux/amd64".to_string(), "linux/arm64".to_string()],
            builder_name: "host-network-builder".to_string(),
            base_image: "alpine:3.20".to_string(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum number of concurrent worker processes
    pub max_workers: usize,

    /// Where the aggregate summary is written
    pub summary_path: PathBuf,

    /// Directory holding per-case working directories (system temp if unset)
    pub work_root: Option<PathBuf>,

    /// Keep working directories of passing cases
    pub keep_workdirs: bool,

    /// Worker completion poll interval, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            summary_path: PathBuf::from("integration_tests_summary.json"),
            work_root: None,
            keep_workdirs: false,
            poll_interval_ms: 100,
        }
    }
}

impl RunConfig {
    pub fn work_root(&self) -> PathBuf {
        self.work_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
