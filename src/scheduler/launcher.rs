//! Worker process launching

use crate::error::{MatrixError, MatrixResult};
use crate::scheduler::CaseSpec;
use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// Starts the process that runs one case
///
/// The child's stdout and stderr both go to `log`.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, case: &CaseSpec, log: File) -> MatrixResult<Child>;
}

/// Re-invokes the current executable as `worker`
pub struct SelfLauncher {
    exe: PathBuf,
    verbose: u8,
    config_path: Option<PathBuf>,
    keep_workdirs: bool,
}

impl SelfLauncher {
    pub fn new(verbose: u8, config_path: Option<PathBuf>, keep_workdirs: bool) -> MatrixResult<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| MatrixError::io("locating current executable", e))?;
        Ok(Self {
            exe,
            verbose,
            config_path,
            keep_workdirs,
        })
    }
}

impl WorkerLauncher for SelfLauncher {
    fn launch(&self, case: &CaseSpec, log: File) -> MatrixResult<Child> {
        let case_json = serde_json::to_string(case)?;
        let stderr = log
            .try_clone()
            .map_err(|e| MatrixError::io("duplicating log handle", e))?;

        let mut command = Command::new(&self.exe);
        if self.verbose > 0 {
            command.arg(format!("-{}", "v".repeat(self.verbose as usize)));
        }
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }
        command
            .arg("worker")
            .arg("--case")
            .arg(&case_json)
            .arg("--output-dir")
            .arg(&case.output_dir);
        if self.keep_workdirs {
            command.arg("--keep-workdir");
        }

        debug!("Launching worker for case #{}", case.number);
        own_process_group(&mut command);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MatrixError::command_failed(format!("{} worker", self.exe.display()), e))
    }
}

/// Start the child as the leader of a new process group, so the whole
/// group (builds included) can be signalled at once.
pub(crate) fn own_process_group(command: &mut Command) {
    #[cfg(unix)]
    command.process_group(0);
    #[cfg(not(unix))]
    let _ = command;
}
