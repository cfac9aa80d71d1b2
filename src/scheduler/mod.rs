//! Bounded-concurrency case scheduling with fail-fast
//!
//! Each case runs in its own worker process whose stdout and stderr go to a
//! case-private log. The master loop polls workers; the first failure stops
//! scheduling and ends the run. Workers lead their own process group and
//! are killed group-wide on fail-fast or Ctrl-C.

mod case;
mod launcher;

pub use case::{CaseSpec, RunSummary, TestCaseResult};
pub use launcher::{SelfLauncher, WorkerLauncher};

use crate::error::{MatrixError, MatrixResult};
use chrono::Utc;
use std::collections::VecDeque;
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// Notified as cases start and finish
pub trait RunObserver: Send + Sync {
    fn case_started(&self, _case: &CaseSpec) {}
    fn case_finished(&self, _result: &TestCaseResult) {}
}

impl RunObserver for () {}

struct Running {
    case: CaseSpec,
    child: Child,
}

#[derive(Default)]
struct Tally {
    completed: Vec<TestCaseResult>,
}

/// Runs cases in worker processes
pub struct Scheduler<'a> {
    launcher: &'a dyn WorkerLauncher,
    observer: &'a dyn RunObserver,
    max_workers: usize,
    poll_interval: Duration,
    summary_path: Option<PathBuf>,
}

impl<'a> Scheduler<'a> {
    pub fn new(launcher: &'a dyn WorkerLauncher, max_workers: usize) -> Self {
        Self {
            launcher,
            observer: &(),
            max_workers: max_workers.max(1),
            poll_interval: Duration::from_millis(100),
            summary_path: None,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn RunObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Write the summary here when the run ends, whatever the outcome
    pub fn with_summary_path(mut self, path: PathBuf) -> Self {
        self.summary_path = Some(path);
        self
    }

    /// Run every case, at most `max_workers` at a time
    pub async fn run(&self, cases: Vec<CaseSpec>) -> MatrixResult<RunSummary> {
        let total = cases.len();
        let mut tally = Tally::default();
        let outcome = self.schedule(cases, &mut tally).await;

        let failures: Vec<TestCaseResult> =
            tally.completed.iter().filter(|r| !r.passed).cloned().collect();
        let passed = tally.completed.len() - failures.len();
        let summary = RunSummary {
            total_tests_run: tally.completed.len(),
            passed,
            failed: failures.len(),
            skipped: total - tally.completed.len(),
            finished_at: Utc::now(),
            failures,
        };

        if let Some(path) = &self.summary_path {
            summary.write(path)?;
            debug!("Summary written to {}", path.display());
        }

        outcome.map(|_| summary)
    }

    async fn schedule(&self, cases: Vec<CaseSpec>, tally: &mut Tally) -> MatrixResult<()> {
        let mut pending: VecDeque<CaseSpec> = cases.into();
        let mut running: Vec<Running> = Vec::new();
        let mut failed = false;
        let mut interrupt = std::pin::pin!(tokio::signal::ctrl_c());
        let mut listening = true;

        loop {
            while !failed && running.len() < self.max_workers {
                let Some(case) = pending.pop_front() else {
                    break;
                };
                match self.start(&case) {
                    Ok(child) => {
                        self.observer.case_started(&case);
                        running.push(Running { case, child });
                    }
                    Err(e) => {
                        kill_all(&mut running).await;
                        return Err(e);
                    }
                }
            }

            if running.is_empty() {
                break;
            }

            let mut i = 0;
            while i < running.len() {
                match running[i].child.try_wait() {
                    Ok(Some(status)) => {
                        let done = running.swap_remove(i);
                        let result = collect_result(&done.case, status);
                        info!(
                            "Case #{} {}",
                            result.number,
                            if result.passed { "passed" } else { "failed" }
                        );
                        failed |= !result.passed;
                        self.observer.case_finished(&result);
                        tally.completed.push(result);
                    }
                    Ok(None) => i += 1,
                    Err(e) => {
                        let done = running.swap_remove(i);
                        let mut result = TestCaseResult::failed(
                            &done.case,
                            format!("could not poll worker: {}", e),
                        );
                        result.log = read_log(&done.case);
                        failed = true;
                        self.observer.case_finished(&result);
                        tally.completed.push(result);
                    }
                }
            }

            if failed {
                if !running.is_empty() {
                    warn!("Fail-fast: terminating {} running worker(s)", running.len());
                }
                kill_all(&mut running).await;
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                signal = &mut interrupt, if listening => match signal {
                    Ok(()) => {
                        warn!("Interrupted: terminating {} running worker(s)", running.len());
                        kill_all(&mut running).await;
                        return Err(MatrixError::Interrupted);
                    }
                    Err(e) => {
                        warn!("Cannot listen for Ctrl-C: {}", e);
                        listening = false;
                    }
                },
            }
        }

        Ok(())
    }

    fn start(&self, case: &CaseSpec) -> MatrixResult<Child> {
        let log_path = case.log_path();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MatrixError::io(format!("creating {}", parent.display()), e))?;
        }
        let log = File::create(&log_path)
            .map_err(|e| MatrixError::io(format!("creating log {}", log_path.display()), e))?;
        debug!("Case #{} logs to {}", case.number, log_path.display());
        self.launcher.launch(case, log)
    }
}

async fn kill_all(running: &mut Vec<Running>) {
    for worker in running.drain(..) {
        if let Err(e) = worker_kill(worker).await {
            warn!("Could not terminate worker: {}", e);
        }
    }
}

async fn worker_kill(mut worker: Running) -> std::io::Result<()> {
    debug!("Killing worker for case #{}", worker.case.number);
    if let Some(pid) = worker.child.id() {
        kill_group(pid);
    }
    worker.child.kill().await
}

/// SIGKILL the process group led by `pid`
#[cfg(unix)]
fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; a stale group yields ESRCH
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        debug!("killpg({}) failed: {}", pgid, std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

fn collect_result(case: &CaseSpec, status: ExitStatus) -> TestCaseResult {
    let mut result = match (status.success(), TestCaseResult::load(case)) {
        (true, Some(saved)) => saved,
        (true, None) => TestCaseResult::passed(case),
        (false, Some(saved)) if !saved.passed => saved,
        (false, _) => TestCaseResult::failed(case, format!("worker exited with {}", status)),
    };
    if !result.passed {
        result.log = read_log(case);
    }
    result
}

fn read_log(case: &CaseSpec) -> String {
    std::fs::read_to_string(case.log_path()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::shell_quote;
    use crate::matrix::tests::simple_fields;
    use crate::matrix::Configuration;
    use std::path::Path;
    use std::process::Stdio;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::TempDir;
    use tokio::process::Command;

    /// Runs a shell script chosen per case
    struct ShellLauncher<F> {
        script: F,
    }

    impl<F> WorkerLauncher for ShellLauncher<F>
    where
        F: Fn(&CaseSpec) -> String + Send + Sync,
    {
        fn launch(&self, case: &CaseSpec, log: File) -> MatrixResult<Child> {
            let stderr = log.try_clone().unwrap();
            let mut command = Command::new("sh");
            launcher::own_process_group(&mut command);
            command
                .arg("-c")
                .arg((self.script)(case))
                .stdout(Stdio::from(log))
                .stderr(Stdio::from(stderr))
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| MatrixError::command_failed("sh", e))
        }
    }

    #[derive(Default)]
    struct Recorder {
        started: Mutex<Vec<usize>>,
        finished: Mutex<Vec<(usize, bool)>>,
    }

    impl RunObserver for Recorder {
        fn case_started(&self, case: &CaseSpec) {
            self.started.lock().unwrap().push(case.number);
        }

        fn case_finished(&self, result: &TestCaseResult) {
            self.finished.lock().unwrap().push((result.number, result.passed));
        }
    }

    fn cases(root: &Path, count: usize) -> Vec<CaseSpec> {
        (1..=count)
            .map(|number| CaseSpec {
                number,
                configuration: Configuration::new(simple_fields()).unwrap(),
                output_dir: root.join(format!("case-{}", number)),
            })
            .collect()
    }

    #[tokio::test]
    async fn all_cases_pass() {
        let temp = TempDir::new().unwrap();
        let launcher = ShellLauncher {
            script: |case: &CaseSpec| format!("echo running {}", case.number),
        };
        let recorder = Recorder::default();
        let summary_path = temp.path().join("summary.json");

        let summary = Scheduler::new(&launcher, 2)
            .with_observer(&recorder)
            .with_poll_interval(Duration::from_millis(10))
            .with_summary_path(summary_path.clone())
            .run(cases(temp.path(), 4))
            .await
            .unwrap();

        assert!(summary.success());
        assert_eq!(summary.total_tests_run, 4);
        assert_eq!(summary.passed, 4);
        assert_eq!(recorder.started.lock().unwrap().len(), 4);

        let log = std::fs::read_to_string(temp.path().join("case-3-test.log")).unwrap();
        assert_eq!(log.trim(), "running 3");

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
        assert_eq!(written["total_tests_run"], 4);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let temp = TempDir::new().unwrap();
        let slots = temp.path().join("slots");
        std::fs::create_dir(&slots).unwrap();
        let record = temp.path().join("record");

        let slots_dir = shell_quote(&slots.to_string_lossy());
        let record_file = shell_quote(&record.to_string_lossy());
        let launcher = ShellLauncher {
            script: move |case: &CaseSpec| {
                format!(
                    "touch {s}/{n}; ls {s} | wc -l >> {r}; sleep 0.2; rm {s}/{n}",
                    s = slots_dir,
                    n = case.number,
                    r = record_file
                )
            },
        };

        let summary = Scheduler::new(&launcher, 3)
            .with_poll_interval(Duration::from_millis(10))
            .run(cases(temp.path(), 8))
            .await
            .unwrap();
        assert_eq!(summary.passed, 8);

        let peak = std::fs::read_to_string(&record)
            .unwrap()
            .lines()
            .filter_map(|l| l.trim().parse::<usize>().ok())
            .max()
            .unwrap();
        assert!((1..=3).contains(&peak), "peak concurrency {}", peak);
    }

    #[tokio::test]
    async fn first_failure_stops_the_run() {
        let temp = TempDir::new().unwrap();
        let launcher = ShellLauncher {
            script: |case: &CaseSpec| {
                if case.number == 1 {
                    "echo boom; exit 3".to_string()
                } else {
                    "sleep 30".to_string()
                }
            },
        };
        let summary_path = temp.path().join("summary.json");

        let started = Instant::now();
        let summary = Scheduler::new(&launcher, 2)
            .with_poll_interval(Duration::from_millis(10))
            .with_summary_path(summary_path.clone())
            .run(cases(temp.path(), 5))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!summary.success());
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_tests_run, 1);
        assert_eq!(summary.skipped, 4);

        let failure = &summary.failures[0];
        assert_eq!(failure.number, 1);
        assert!(failure.log.contains("boom"));
        assert!(failure.failure_reason.as_deref().unwrap().contains("exit"));
        assert!(summary_path.exists());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn fail_fast_kills_worker_subprocesses() {
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("grandchild.pid");
        let pid_path = shell_quote(&pid_file.to_string_lossy());
        let launcher = ShellLauncher {
            script: move |case: &CaseSpec| {
                if case.number == 1 {
                    "sleep 0.5; exit 1".to_string()
                } else {
                    format!("sleep 30 & echo $! > {}; wait", pid_path)
                }
            },
        };

        let summary = Scheduler::new(&launcher, 2)
            .with_poll_interval(Duration::from_millis(10))
            .run(cases(temp.path(), 2))
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid.trim()));
        // Gone, or a zombie nobody has reaped yet
        let alive = match stat {
            Ok(stat) => {
                let state = stat.rsplit(") ").next().and_then(|s| s.chars().next());
                !matches!(state, Some('Z' | 'X'))
            }
            Err(_) => false,
        };
        assert!(!alive, "sleep {} survived fail-fast", pid.trim());
    }

    #[tokio::test]
    async fn worker_result_file_supplies_reason() {
        let temp = TempDir::new().unwrap();
        let launcher = ShellLauncher {
            script: |case: &CaseSpec| {
                let json = serde_json::to_string(&TestCaseResult::failed(
                    case,
                    "modified-excluded: expected cache hit but got cache miss",
                ))
                .unwrap();
                format!(
                    "printf '%s' {} > {}; exit 1",
                    shell_quote(&json),
                    shell_quote(&case.result_path().to_string_lossy())
                )
            },
        };

        let summary = Scheduler::new(&launcher, 1)
            .with_poll_interval(Duration::from_millis(10))
            .run(cases(temp.path(), 1))
            .await
            .unwrap();

        assert_eq!(
            summary.failures[0].failure_reason.as_deref(),
            Some("modified-excluded: expected cache hit but got cache miss")
        );
    }

    struct BrokenLauncher;

    impl WorkerLauncher for BrokenLauncher {
        fn launch(&self, _case: &CaseSpec, _log: File) -> MatrixResult<Child> {
            Err(MatrixError::command_failed(
                "worker",
                std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            ))
        }
    }

    #[tokio::test]
    async fn launch_failure_still_writes_summary() {
        let temp = TempDir::new().unwrap();
        let summary_path = temp.path().join("summary.json");

        let err = Scheduler::new(&BrokenLauncher, 2)
            .with_summary_path(summary_path.clone())
            .run(cases(temp.path(), 3))
            .await
            .unwrap_err();

        assert!(matches!(err, MatrixError::CommandFailed { .. }));
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
        assert_eq!(written["total_tests_run"], 0);
        assert_eq!(written["skipped"], 3);
    }
}
