//! Build engine abstraction
//!
//! Everything a test case does outside the registry's HTTP API goes
//! through this trait: the wrapped build, cache export, and the image
//! content check.

use crate::command::BuildCommand;
use crate::config::schema::ToolConfig;
use crate::error::MatrixResult;
use async_trait::async_trait;
use std::path::Path;

/// Captured result of a build invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 if the process was killed by a signal
    pub code: i32,
    /// Interleaved stdout and stderr lines
    pub lines: Vec<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// All output as one text
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Abstract build engine interface
///
/// `DockerCli` drives the real `docker` binary; tests substitute scripted
/// engines to walk the verify protocol without Docker.
#[async_trait]
pub trait BuildEngine: Send + Sync {
    /// Run a synthesized command through `sh -c`. A non-zero exit is
    /// reported in the output, not as an error.
    async fn run_build(&self, command: &BuildCommand) -> MatrixResult<CommandOutput>;

    /// Export the tool's disk cache as the value of its memory-cache variable
    async fn export_cache(&self, tool: &ToolConfig, cache_dir: &Path) -> MatrixResult<String>;

    /// Drop a local image copy (best effort)
    async fn remove_image(&self, tag: &str) -> MatrixResult<()>;

    /// List a directory inside an image by running it
    async fn list_image_dir(&self, tag: &str, dir: &str) -> MatrixResult<String>;
}
