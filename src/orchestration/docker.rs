//! Docker CLI build engine
//!
//! Implements `BuildEngine` by shelling out to `docker`, and owns the
//! one-time environment setup: the host-network buildx builder and the
//! local registry container.

use crate::command::BuildCommand;
use crate::config::schema::{BuildConfig, RegistryConfig, ToolConfig};
use crate::error::{MatrixError, MatrixResult};
use crate::orchestration::engine::{BuildEngine, CommandOutput};
use crate::orchestration::stream_child_output;
use crate::registry::RegistryClient;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Attempts at reaching a freshly started registry
const REGISTRY_READY_ATTEMPTS: u32 = 10;

/// Pause between registry readiness probes
const REGISTRY_READY_INTERVAL: Duration = Duration::from_secs(1);

/// Build engine backed by the `docker` binary on PATH
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    /// Execute a docker command and return the output
    async fn exec(&self, args: &[&str]) -> MatrixResult<std::process::Output> {
        debug!("Executing: {} {}", self.program, args.join(" "));

        Command::new(&self.program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| MatrixError::command_failed(format!("{} {}", self.program, args.join(" ")), e))
    }

    /// Execute a docker command that must succeed
    async fn exec_ok(&self, args: &[&str]) -> MatrixResult<String> {
        let output = self.exec(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(MatrixError::command_exec(
                format!("{} {}", self.program, args.join(" ")),
                String::from_utf8_lossy(&output.stderr).trim(),
            ))
        }
    }

    /// Make sure a `docker-container` builder with host networking exists
    /// and is selected, so builds can push to a registry on localhost.
    pub async fn ensure_builder(&self, build: &BuildConfig) -> MatrixResult<()> {
        let name = build.builder_name.as_str();
        if self.exec(&["buildx", "inspect", name]).await?.status.success() {
            info!("Using existing builder {}", name);
            self.exec_ok(&["buildx", "use", name]).await?;
            return Ok(());
        }

        info!("Creating builder {}", name);
        self.exec_ok(&[
            "buildx",
            "create",
            "--use",
            "--name",
            name,
            "--driver",
            "docker-container",
            "--driver-opt",
            "network=host",
        ])
        .await?;
        Ok(())
    }

    /// Make sure a registry answers at `registry.host`, starting the
    /// registry container when nothing does.
    pub async fn ensure_registry(&self, registry: &RegistryConfig) -> MatrixResult<()> {
        let client = RegistryClient::new(registry.scheme.clone(), registry.timeout());
        let url = registry.base_url();

        if ping(&client, &url).await {
            info!("Registry already reachable at {}", url);
            return Ok(());
        }

        let filter = format!("name=^{}$", registry.container_name);
        let running = self
            .exec_ok(&["ps", "--filter", &filter, "--format", "{{.Names}}"])
            .await?;
        if running.trim().is_empty() {
            let port = registry.port().ok_or_else(|| MatrixError::RegistryConnection {
                url: url.clone(),
                reason: format!("registry host '{}' has no port", registry.host),
            })?;
            let mapping = format!("{}:5000", port);
            info!("Starting registry container {}", registry.container_name);
            self.exec_ok(&[
                "run",
                "-d",
                "--rm",
                "-p",
                &mapping,
                "--name",
                &registry.container_name,
                &registry.image,
            ])
            .await?;
        }

        for attempt in 1..=REGISTRY_READY_ATTEMPTS {
            if ping(&client, &url).await {
                info!("Registry ready after {} attempt(s)", attempt);
                return Ok(());
            }
            debug!("Registry not ready (attempt {}/{})", attempt, REGISTRY_READY_ATTEMPTS);
            tokio::time::sleep(REGISTRY_READY_INTERVAL).await;
        }

        Err(MatrixError::RegistryConnection {
            url,
            reason: format!("no answer after {} attempts", REGISTRY_READY_ATTEMPTS),
        })
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

async fn ping(client: &RegistryClient, url: &str) -> bool {
    let client = client.clone();
    let url = url.to_string();
    tokio::task::spawn_blocking(move || client.ping(&url))
        .await
        .unwrap_or(false)
}

#[async_trait]
impl BuildEngine for DockerCli {
    async fn run_build(&self, command: &BuildCommand) -> MatrixResult<CommandOutput> {
        debug!("Running build in {}", command.working_dir.display());

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command.command_line)
            .current_dir(&command.working_dir)
            .env_clear()
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MatrixError::command_failed(command.command_line.clone(), e))?;

        // Echo into the case log as the build progresses
        let lines = stream_child_output(&mut child, &|line| println!("{}", line)).await;

        let status = child
            .wait()
            .await
            .map_err(|e| MatrixError::command_failed(command.command_line.clone(), e))?;

        Ok(CommandOutput {
            code: status.code().unwrap_or(-1),
            lines,
        })
    }

    async fn export_cache(&self, tool: &ToolConfig, cache_dir: &Path) -> MatrixResult<String> {
        let command_display = format!("{} {}", tool.binary.display(), tool.export_args.join(" "));
        debug!("Executing: {}", command_display);

        let output = Command::new(&tool.binary)
            .args(&tool.export_args)
            .env(tool.cache_dir_var(), cache_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| MatrixError::command_failed(command_display.clone(), e))?;

        if !output.status.success() {
            return Err(MatrixError::command_exec(
                command_display,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    async fn remove_image(&self, tag: &str) -> MatrixResult<()> {
        let output = self.exec(&["rmi", "--force", tag]).await?;
        if !output.status.success() {
            warn!(
                "Could not remove local image {}: {}",
                tag,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn list_image_dir(&self, tag: &str, dir: &str) -> MatrixResult<String> {
        self.exec_ok(&["run", "--rm", tag, "ls", dir]).await
    }
}
