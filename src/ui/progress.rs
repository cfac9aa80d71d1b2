//! Progress indicators with CI fallback

use super::context::UiContext;
use crate::scheduler::{CaseSpec, RunObserver, TestCaseResult};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else {
            println!("{} {}", style("[FAIL]").red(), message);
        }
    }
}

/// Progress over the whole matrix.
///
/// An indicatif bar in interactive mode, one line per finished case in CI.
pub struct MatrixProgress {
    bar: Option<ProgressBar>,
    total: usize,
}

impl MatrixProgress {
    pub fn new(ctx: &UiContext, total: usize) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(total as u64);
            let template = ProgressStyle::default_bar()
                .template("  {spinner:.cyan} Cases {bar:30.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(
                template
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                    .progress_chars("━╸─"),
            );
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(bar)
        } else {
            None
        };
        Self { bar, total }
    }

    /// Finish and clear the progress bar.
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

impl RunObserver for MatrixProgress {
    fn case_started(&self, case: &CaseSpec) {
        if let Some(ref bar) = self.bar {
            bar.set_message(format!("#{} {}", case.number, case.configuration));
        }
    }

    fn case_finished(&self, result: &TestCaseResult) {
        let label = format!("#{}/{} {}", result.number, self.total, result.configuration);
        match &self.bar {
            Some(bar) => {
                bar.inc(1);
                if !result.passed {
                    bar.println(format!("  {} {}", style("✗").red(), label));
                }
            }
            None if result.passed => println!("  {} {}", style("[OK]").green(), label),
            None => println!("  {} {}", style("[FAIL]").red(), label),
        }
    }
}
