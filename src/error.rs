//! Error types for mimosa-matrix
//!
//! All modules use `MatrixResult<T>` as their return type. Every variant
//! is fatal for the test case that raised it; nothing is retried.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mimosa-matrix operations
pub type MatrixResult<T> = Result<T, MatrixError>;

/// All errors that can occur while running the matrix
#[derive(Error, Debug)]
pub enum MatrixError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration is pruned from the matrix: {0}")]
    InvalidConfiguration(String),

    // Scaffold errors
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Failed to scaffold {path}: {source}")]
    Scaffold {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Command synthesis errors
    #[error("Cannot build multiple build files without a bake definition")]
    MultipleBuildFilesWithoutBake,

    #[error("No build file was scaffolded")]
    NoBuildFile,

    // Build errors
    #[error("Build command failed with exit code {code}: {command}\n{output}")]
    BuildFailed {
        command: String,
        code: i32,
        output: String,
    },

    // Verification errors
    #[error("Assertion failed: {0}")]
    Assertion(String),

    // Registry errors
    #[error("Manifest not found for {image}:{tag}")]
    ManifestNotFound { image: String, tag: String },

    #[error("Registry API error: {0}")]
    Registry(String),

    #[error("Unable to reach registry at {url}: {reason}")]
    RegistryConnection { url: String, reason: String },

    #[error("Invalid image tag '{0}'. Expected host:port/path:tag")]
    InvalidTag(String),

    // Scheduler errors
    #[error("Test #{number} failed. Log: {}", log_path.display())]
    WorkerFailed { number: usize, log_path: PathBuf },

    #[error("Interrupted; running workers were terminated")]
    Interrupted,

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MatrixError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a scaffold error for a path
    pub fn scaffold(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Scaffold {
            path: path.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create an assertion failure
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Whether the error originated from talking to the registry
    pub fn is_registry(&self) -> bool {
        matches!(
            self,
            Self::ManifestNotFound { .. } | Self::Registry(_) | Self::RegistryConnection { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::RegistryConnection { .. } => Some("Run: mimosa-matrix setup"),
            Self::MultipleBuildFilesWithoutBake => {
                Some("Configurations without a bake file are pruned to a single build file")
            }
            Self::WorkerFailed { .. } => Some("Narrow the matrix with the per-field flags to rerun only that case"),
            _ => None,
        }
    }
}
