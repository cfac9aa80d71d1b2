//! CLI command implementations

pub mod completions;
pub mod list;
pub mod run;
pub mod setup;
pub mod worker;

pub use completions::execute as completions;
pub use list::execute as list;
pub use run::execute as run;
pub use setup::execute as setup;
pub use worker::execute as worker;
