//! UI context for detecting interactive vs CI environments

use std::io::IsTerminal;

/// Environment variables set by common CI systems
const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "BUILDKITE",
    "JENKINS_URL",
    "TF_BUILD",
];

/// UI context that determines output behavior
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    /// Spinners and progress bars allowed
    interactive: bool,
}

impl UiContext {
    /// Detect the current environment
    pub fn detect() -> Self {
        Self {
            interactive: std::io::stdout().is_terminal() && !in_ci(),
        }
    }

    /// Plain line output only (for tests, workers and CI)
    pub fn non_interactive() -> Self {
        Self { interactive: false }
    }

    /// Check if we should use fancy output (spinners, bars)
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }
}

fn in_ci() -> bool {
    CI_VARS.iter().any(|var| std::env::var_os(var).is_some())
}
