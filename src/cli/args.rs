//! CLI argument definitions using clap derive

use crate::matrix::{
    BakeDefinition, CacheSource, ContextLocation, Domains, IgnoreVariant, Location, Multiplicity,
};
use clap::{ArgAction, Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// mimosa-matrix - differential cache tests for mimosa
///
/// Scaffolds every supported build layout, builds it through mimosa
/// against a local registry and checks that cache hits and misses happen
/// exactly when they should.
#[derive(Parser, Debug)]
#[command(name = "mimosa-matrix")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "MIMOSA_MATRIX_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the test matrix
    Run(RunArgs),

    /// Print the configurations a run would test
    List(ListArgs),

    /// Create the buildx builder and start the local registry
    Setup,

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },

    /// Run a single case (spawned by `run`)
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Per-field narrowing of the configuration space.
///
/// Every flag takes a comma-separated list. Unset flags fall back to the
/// `[matrix]` config table, then to the full domain.
#[derive(Args, Debug, Default, Clone)]
pub struct MatrixArgs {
    /// Bake definition values (single, multiple, none)
    #[arg(long, value_delimiter = ',', env = "MIMOSA_MATRIX_BAKE_DEFINITION")]
    pub bake_definition: Vec<BakeDefinition>,

    /// Bake file locations (root, subdir)
    #[arg(long, value_delimiter = ',', env = "MIMOSA_MATRIX_BAKE_LOCATION")]
    pub bake_location: Vec<Location>,

    /// Dockerfile counts (single, multiple)
    #[arg(long, value_delimiter = ',', env = "MIMOSA_MATRIX_BUILD_FILE_COUNT")]
    pub build_file_count: Vec<Multiplicity>,

    /// Dockerfile locations (root, subdir)
    #[arg(long, value_delimiter = ',', env = "MIMOSA_MATRIX_BUILD_FILE_LOCATION")]
    pub build_file_location: Vec<Location>,

    /// Target counts (single, multiple)
    #[arg(long = "targets", value_delimiter = ',', env = "MIMOSA_MATRIX_TARGETS")]
    pub target_count: Vec<Multiplicity>,

    /// Ignore file layouts (single, multiple, none)
    #[arg(long = "ignore", value_delimiter = ',', env = "MIMOSA_MATRIX_IGNORE")]
    pub ignore_variant: Vec<IgnoreVariant>,

    /// Build context locations (cwd, subdir)
    #[arg(long = "context", value_delimiter = ',', env = "MIMOSA_MATRIX_CONTEXT")]
    pub context_location: Vec<ContextLocation>,

    /// Cache sources (disk, memory)
    #[arg(long, value_delimiter = ',', env = "MIMOSA_MATRIX_CACHE_SOURCE")]
    pub cache_source: Vec<CacheSource>,
}

impl MatrixArgs {
    pub fn domains(&self) -> Domains {
        Domains {
            bake_definition: self.bake_definition.clone(),
            bake_location: self.bake_location.clone(),
            build_file_count: self.build_file_count.clone(),
            build_file_location: self.build_file_location.clone(),
            target_count: self.target_count.clone(),
            ignore_variant: self.ignore_variant.clone(),
            context_location: self.context_location.clone(),
            cache_source: self.cache_source.clone(),
        }
    }
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub matrix: MatrixArgs,

    /// Maximum concurrent cases (default: from config)
    #[arg(short = 'j', long, env = "MIMOSA_MATRIX_MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Where to write the JSON run summary
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// Parent directory for per-case working directories
    #[arg(long)]
    pub work_root: Option<PathBuf>,

    /// Keep working directories of passing cases
    #[arg(long)]
    pub keep_workdirs: bool,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub matrix: MatrixArgs,

    /// Print configurations as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the hidden worker command
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Serialized case description
    #[arg(long)]
    pub case: String,

    /// Directory the case scaffolds into
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Leave the working directory in place after a pass
    #[arg(long)]
    pub keep_workdir: bool,
}
