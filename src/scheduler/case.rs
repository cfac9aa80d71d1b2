//! Test case descriptions and their outcomes

use crate::error::{MatrixError, MatrixResult};
use crate::matrix::Configuration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One scheduled case, as handed to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSpec {
    /// 1-based position in the enumeration
    pub number: usize,
    pub configuration: Configuration,
    pub output_dir: PathBuf,
}

impl CaseSpec {
    /// `<output_dir>-test.log`
    pub fn log_path(&self) -> PathBuf {
        sibling(&self.output_dir, "-test.log")
    }

    /// `<output_dir>-result.json`
    pub fn result_path(&self) -> PathBuf {
        sibling(&self.output_dir, "-result.json")
    }

    /// `<output_dir>-cache`, outside the build context
    pub fn cache_dir(&self) -> PathBuf {
        sibling(&self.output_dir, "-cache")
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Outcome of one case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub number: usize,
    pub configuration: Configuration,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Full worker log, filled in by the scheduler
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log: String,
}

impl TestCaseResult {
    pub fn passed(case: &CaseSpec) -> Self {
        Self {
            number: case.number,
            configuration: case.configuration,
            passed: true,
            failure_reason: None,
            log: String::new(),
        }
    }

    pub fn failed(case: &CaseSpec, reason: impl Into<String>) -> Self {
        Self {
            number: case.number,
            configuration: case.configuration,
            passed: false,
            failure_reason: Some(reason.into()),
            log: String::new(),
        }
    }

    /// Write the result next to the case's working directory
    pub fn save(&self, case: &CaseSpec) -> MatrixResult<()> {
        let path = case.result_path();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)
            .map_err(|e| MatrixError::io(format!("writing {}", path.display()), e))
    }

    /// Read a result a worker left behind, if any
    pub fn load(case: &CaseSpec) -> Option<Self> {
        let content = std::fs::read_to_string(case.result_path()).ok()?;
        serde_json::from_str(&content).ok()
    }
}

/// Aggregate counts, written as JSON at the end of every run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Cases that ran to completion, pass or fail.
    ///
    /// Workers killed by fail-fast are not counted here even though they
    /// started; they are part of `skipped`.
    pub total_tests_run: usize,
    pub passed: usize,
    pub failed: usize,
    /// Cases never started or killed by fail-fast
    pub skipped: usize,
    pub finished_at: DateTime<Utc>,
    #[serde(skip)]
    pub failures: Vec<TestCaseResult>,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    pub fn write(&self, path: &Path) -> MatrixResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| MatrixError::io(format!("writing summary {}", path.display()), e))
    }
}
