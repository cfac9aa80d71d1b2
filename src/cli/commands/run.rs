//! Run command - execute the test matrix

use crate::cli::args::RunArgs;
use crate::config::Config;
use crate::error::{MatrixError, MatrixResult};
use crate::matrix::enumerate;
use crate::orchestration::build_error_output;
use crate::scheduler::{CaseSpec, Scheduler, SelfLauncher};
use crate::ui::{self, MatrixProgress, UiContext};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Options that are forwarded to every worker
pub struct WorkerOptions {
    pub verbose: u8,
    pub config_path: Option<PathBuf>,
}

/// Execute the run command
pub async fn execute(args: RunArgs, config: &Config, forward: WorkerOptions) -> MatrixResult<()> {
    let ctx = UiContext::detect();

    let domains = config.matrix.clone().overridden_by(&args.matrix.domains());
    let configurations = enumerate(&domains);
    if configurations.is_empty() {
        return Err(MatrixError::InvalidConfiguration(
            "no valid configuration matches the requested field values".to_string(),
        ));
    }

    let max_workers = args.max_workers.unwrap_or(config.run.max_workers).max(1);
    let keep_workdirs = args.keep_workdirs || config.run.keep_workdirs;
    let summary_path = args
        .summary
        .clone()
        .unwrap_or_else(|| config.run.summary_path.clone());
    let work_root = args.work_root.clone().unwrap_or_else(|| config.run.work_root());
    let run_dir = work_root.join(format!("mimosa-matrix-{}", Uuid::new_v4()));

    let cases = plan_cases(configurations, &run_dir);

    ui::intro(&ctx, "mimosa-matrix");
    ui::key_value(&ctx, "Cases", &cases.len().to_string());
    ui::key_value(&ctx, "Workers", &max_workers.to_string());
    ui::key_value(&ctx, "Tool", &config.tool.binary.display().to_string());
    ui::key_value(&ctx, "Registry", &config.registry.host);
    ui::key_value(&ctx, "Work dir", &run_dir.display().to_string());
    println!();

    let launcher = SelfLauncher::new(forward.verbose, forward.config_path, keep_workdirs)?;
    let progress = MatrixProgress::new(&ctx, cases.len());
    let outcome = Scheduler::new(&launcher, max_workers)
        .with_observer(&progress)
        .with_poll_interval(config.run.poll_interval())
        .with_summary_path(summary_path.clone())
        .run(cases.clone())
        .await;
    progress.finish();
    let summary = outcome?;

    println!();
    ui::key_value(&ctx, "Passed", &summary.passed.to_string());
    ui::key_value(&ctx, "Failed", &summary.failed.to_string());
    ui::key_value(&ctx, "Skipped", &summary.skipped.to_string());
    ui::key_value(&ctx, "Summary", &summary_path.display().to_string());

    let Some(failure) = summary.failures.first() else {
        if !keep_workdirs {
            remove_run_dir(&run_dir).await;
        }
        ui::outro_success(
            &ctx,
            &format!("All {} case(s) passed", summary.total_tests_run),
        );
        return Ok(());
    };

    let log_path_of = |number: usize| {
        cases
            .iter()
            .find(|c| c.number == number)
            .map(CaseSpec::log_path)
            .unwrap_or_else(|| run_dir.clone())
    };

    for result in &summary.failures {
        ui::step_error_detail(
            &ctx,
            &format!("Case #{} {}", result.number, result.configuration),
            &build_error_output(result.failure_reason.as_deref().unwrap_or("unknown failure")),
        );
        let log_path = log_path_of(result.number);
        ui::case_log(result.number, &log_path.display().to_string(), &result.log);
    }
    ui::outro_error(&ctx, &format!("Case #{} failed", failure.number));

    Err(MatrixError::WorkerFailed {
        number: failure.number,
        log_path: log_path_of(failure.number),
    })
}

/// Number cases from 1 and give each its own directory under `run_dir`
fn plan_cases(
    configurations: Vec<crate::matrix::Configuration>,
    run_dir: &Path,
) -> Vec<CaseSpec> {
    configurations
        .into_iter()
        .enumerate()
        .map(|(i, configuration)| CaseSpec {
            number: i + 1,
            configuration,
            output_dir: run_dir.join(format!("case-{}", i + 1)),
        })
        .collect()
}

async fn remove_run_dir(run_dir: &Path) {
    match tokio::fs::remove_dir_all(run_dir).await {
        Ok(()) => debug!("Removed {}", run_dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", run_dir.display(), e),
    }
}
