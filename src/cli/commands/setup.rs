//! Setup command - prepare the buildx builder and local registry

use crate::config::Config;
use crate::error::MatrixResult;
use crate::orchestration::DockerCli;
use crate::ui::{self, TaskSpinner, UiContext};

/// Execute the setup command
pub async fn execute(config: &Config) -> MatrixResult<()> {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "mimosa-matrix setup");

    let docker = DockerCli::new();

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Preparing builder '{}'...", config.build.builder_name));
    if let Err(e) = docker.ensure_builder(&config.build).await {
        spinner.stop_error("Builder setup failed");
        return Err(e);
    }
    spinner.stop(&format!("Builder '{}' active", config.build.builder_name));

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Checking registry at {}...", config.registry.host));
    if let Err(e) = docker.ensure_registry(&config.registry).await {
        spinner.stop_error("Registry unreachable");
        return Err(e);
    }
    spinner.stop(&format!("Registry reachable at {}", config.registry.base_url()));

    ui::key_value(&ctx, "Platforms", &config.build.platforms.join(","));
    ui::key_value(&ctx, "Tool", &config.tool.binary.display().to_string());
    ui::outro_success(&ctx, "Ready to run the matrix");
    Ok(())
}
