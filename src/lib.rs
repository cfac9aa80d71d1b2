//! mimosa-matrix - differential cache tests for mimosa
//!
//! Enumerates build layouts, scaffolds each one, builds it through the
//! caching wrapper against a local registry and checks that cache hits
//! and misses line up with the inputs that changed.

pub mod cache;
pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod matrix;
pub mod orchestration;
pub mod registry;
pub mod scaffold;
pub mod scheduler;
pub mod ui;
pub mod verify;

pub use error::{MatrixError, MatrixResult};
