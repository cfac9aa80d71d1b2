//! Worker command - verify one configuration
//!
//! Spawned by `run`. Output goes to the case log, so everything here is
//! printed in plain form.

use crate::cache::scratch_dir;
use crate::cli::args::WorkerArgs;
use crate::config::Config;
use crate::error::MatrixResult;
use crate::orchestration::DockerCli;
use crate::registry::RegistryClient;
use crate::scaffold::BuiltinTemplates;
use crate::scheduler::{CaseSpec, TestCaseResult};
use crate::ui::{self, UiContext};
use crate::verify::{Collaborators, VerifyProtocol, VerifySettings};
use std::path::Path;
use tracing::{debug, info, warn};

/// Execute the worker command
pub async fn execute(args: WorkerArgs, config: &Config) -> MatrixResult<()> {
    let mut case: CaseSpec = serde_json::from_str(&args.case)?;
    case.output_dir = args.output_dir;

    let ctx = UiContext::non_interactive();
    ui::intro(&ctx, &format!("Case #{}", case.number));
    ui::key_value(&ctx, "Configuration", &case.configuration.to_string());
    ui::key_value(&ctx, "Output dir", &case.output_dir.display().to_string());
    ui::key_value(&ctx, "Cache dir", &case.cache_dir().display().to_string());
    println!();

    let settings = VerifySettings::from_config(config);
    let engine = DockerCli::new();
    let registry = RegistryClient::new(config.registry.scheme.clone(), config.registry.timeout());
    let renderer = BuiltinTemplates;
    let deps = Collaborators {
        engine: &engine,
        registry: &registry,
        renderer: &renderer,
    };

    let cache_dir = case.cache_dir();
    let mut protocol =
        VerifyProtocol::new(case.configuration, &case.output_dir, &cache_dir, &settings, deps);
    debug!("Case namespace {}", protocol.case_id());

    match protocol.run().await {
        Ok(records) => {
            TestCaseResult::passed(&case).save(&case)?;
            info!("Case #{} passed after {} builds", case.number, records.len());
            if !args.keep_workdir {
                cleanup(&case).await;
            }
            ui::outro_success(&ctx, &format!("Case #{} passed", case.number));
            Ok(())
        }
        Err(e) => {
            println!();
            println!("=== FAILURE ===");
            println!("{}", e);
            TestCaseResult::failed(&case, e.to_string()).save(&case)?;
            ui::outro_error(&ctx, &format!("Case #{} failed", case.number));
            Err(e)
        }
    }
}

/// Remove the scaffolded tree and its cache directories
async fn cleanup(case: &CaseSpec) {
    let cache_dir = case.cache_dir();
    let scratch = scratch_dir(&cache_dir);
    for dir in [case.output_dir.as_path(), cache_dir.as_path(), scratch.as_path()] {
        remove_dir(dir).await;
    }
}

async fn remove_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
    }
}
