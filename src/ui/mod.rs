//! Operator-facing output
//!
//! Uses `cliclack` and `indicatif` in a terminal, with automatic fallback
//! to plain `[OK]`/`[FAIL]` lines in CI or when output is redirected.
//! Worker processes always use the plain form since their output is a log
//! file.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    case_log, intro, key_value, outro_error, outro_success, step_error_detail, step_info,
};
pub use progress::{MatrixProgress, TaskSpinner};
