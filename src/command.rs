//! Build command synthesis
//!
//! Turns a configuration plus its scaffolded files into the exact shell
//! command, working directory and environment for one build invocation.
//! Every command runs through `<tool> remember --` so the tool decides hit
//! or miss.

use crate::cache::CacheSeed;
use crate::error::{MatrixError, MatrixResult};
use crate::matrix::{Configuration, ContextLocation, SUBDIR, TARGET1};
use crate::scaffold::{ScaffoldResult, ScaffoldedFile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Verbosity passed to the tool on every invocation
const TOOL_LOG_LEVEL: (&str, &str) = ("LOG_LEVEL", "DEBUG");

/// Tags per image copy; two tags per target prove multi-tag retagging
const TAG_COPIES: [&str; 2] = ["1st", "2nd"];

/// Tags for one build invocation, grouped by target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    by_target: BTreeMap<String, Vec<String>>,
}

impl TagSet {
    /// Tags `<host>/<case_id>/<target>_<copy>:<suffix>` for each target.
    ///
    /// The case id namespaces the repository and the suffix keeps every
    /// invocation's tags distinct within the case.
    pub fn generate(host: &str, case_id: &Uuid, suffix: &str, targets: &[&str]) -> Self {
        let by_target = targets
            .iter()
            .map(|target| {
                let tags = TAG_COPIES
                    .iter()
                    .map(|copy| format!("{}/{}/{}_{}:{}", host, case_id, target, copy, suffix))
                    .collect();
                (target.to_string(), tags)
            })
            .collect();
        Self { by_target }
    }

    /// Tags of one target, empty if the target is not built
    pub fn for_target(&self, target: &str) -> &[String] {
        self.by_target.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_target(&self) -> &BTreeMap<String, Vec<String>> {
        &self.by_target
    }

    /// Every tag, targets in name order
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.by_target.values().flatten()
    }

    fn csv(&self, target: &str) -> String {
        self.for_target(target).join(",")
    }
}

/// A fully synthesized build invocation
#[derive(Debug, Clone)]
pub struct BuildCommand {
    /// Shell command line, run with `sh -c`
    pub command_line: String,
    pub working_dir: PathBuf,
    /// Complete environment: the parent's, extended by `overrides`
    pub env: BTreeMap<String, String>,
    /// Variables this command adds or replaces
    pub overrides: BTreeMap<String, String>,
    pub tags_by_target: BTreeMap<String, Vec<String>>,
}

impl BuildCommand {
    /// Lines that reproduce the invocation by hand
    pub fn reproduction(&self, hide: &[&str]) -> String {
        let mut out = String::new();
        for (key, value) in &self.overrides {
            if hide.contains(&key.as_str()) {
                out.push_str(&format!("export {}=<{} bytes>\n", key, value.len()));
            } else {
                out.push_str(&format!("export {}={}\n", key, shell_quote(value)));
            }
        }
        out.push_str(&format!(
            "cd {} && {}",
            shell_quote(&self.working_dir.to_string_lossy()),
            self.command_line
        ));
        out
    }
}

/// Inputs that do not come from the configuration
pub struct CommandOptions<'a> {
    pub tool_binary: &'a Path,
    pub platforms: &'a [String],
}

/// Synthesize the command for one build of `config`
pub fn synthesize(
    config: &Configuration,
    scaffold: &ScaffoldResult,
    output_dir: &Path,
    tags: &TagSet,
    cache: &CacheSeed,
    options: &CommandOptions<'_>,
) -> MatrixResult<BuildCommand> {
    let mut overrides = BTreeMap::new();
    overrides.insert(TOOL_LOG_LEVEL.0.to_string(), TOOL_LOG_LEVEL.1.to_string());
    overrides.extend(cache.env().clone());

    let engine_args = if config.uses_bake() {
        for target in config.targets() {
            overrides.insert(format!("{}_TAGS", target.to_uppercase()), tags.csv(target));
        }
        bake_args(config, scaffold, output_dir)
    } else {
        build_args(config, scaffold, output_dir, tags, options.platforms)?
    };

    let command_line = format!(
        "{} remember -- docker buildx {}",
        shell_quote(&options.tool_binary.to_string_lossy()),
        engine_args.join(" ")
    );

    let mut env: BTreeMap<String, String> = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect();
    env.extend(overrides.clone());

    let tags_by_target = config
        .targets()
        .into_iter()
        .map(|t| (t.to_string(), tags.for_target(t).to_vec()))
        .collect();

    Ok(BuildCommand {
        command_line,
        working_dir: output_dir.to_path_buf(),
        env,
        overrides,
        tags_by_target,
    })
}

fn build_args(
    config: &Configuration,
    scaffold: &ScaffoldResult,
    output_dir: &Path,
    tags: &TagSet,
    platforms: &[String],
) -> MatrixResult<Vec<String>> {
    let dockerfile = match scaffold.dockerfiles.as_slice() {
        [] => return Err(MatrixError::NoBuildFile),
        [single] => single,
        _ => return Err(MatrixError::MultipleBuildFilesWithoutBake),
    };

    let context = match config.context_location() {
        ContextLocation::Cwd => ".",
        ContextLocation::Subdir => SUBDIR,
    };

    let mut args = vec![
        "build".to_string(),
        "--push".to_string(),
        "--platform".to_string(),
        platforms.join(","),
    ];

    let relative = relative_path(output_dir, dockerfile);
    if relative != default_dockerfile(context) {
        args.push("-f".to_string());
        args.push(shell_quote(&relative));
    }

    for tag in tags.for_target(TARGET1) {
        args.push("-t".to_string());
        args.push(shell_quote(tag));
    }
    args.push(context.to_string());
    Ok(args)
}

fn bake_args(config: &Configuration, scaffold: &ScaffoldResult, output_dir: &Path) -> Vec<String> {
    let mut args = vec!["bake".to_string(), "--push".to_string()];

    // Root-level bake files are picked up by their default names
    if config.bake_location() == crate::matrix::Location::Subdir {
        for bakefile in &scaffold.bakefiles {
            args.push("-f".to_string());
            args.push(shell_quote(&relative_path(output_dir, bakefile)));
        }
    }
    args
}

/// Where the engine looks for a build file when `-f` is absent
fn default_dockerfile(context: &str) -> String {
    if context == "." {
        "Dockerfile".to_string()
    } else {
        format!("{}/Dockerfile", context)
    }
}

fn relative_path(root: &Path, file: &ScaffoldedFile) -> String {
    file.path
        .strip_prefix(root)
        .unwrap_or(&file.path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Quote a word for `sh` unless it is made of safe characters only
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:,=@%+".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
