//! Scripted build, mutate and verify sequence for one test case
//!
//! ```text
//! Pending -> Scaffolded -> InitialBuilt -> Mutating(1..) -> Done
//!                 \______________\_______________\_________> Failed
//! ```
//!
//! Mutations run in a fixed order: the excluded marker (hit), the included
//! marker (miss), then every bake file and every build file (miss). The
//! manifest baseline starts as the initial build's tags and is replaced by
//! each cache hit's tags, so the order is load-bearing.

use crate::cache::CacheSeed;
use crate::command::{synthesize, BuildCommand, CommandOptions, TagSet};
use crate::config::schema::ToolConfig;
use crate::config::Config;
use crate::error::{MatrixError, MatrixResult};
use crate::matrix::Configuration;
use crate::orchestration::BuildEngine;
use crate::registry::{introduces_new_digests, ImageRef, ManifestSource};
use crate::scaffold::templates::{EXCLUDED_MARKER, INCLUDED_MARKER};
use crate::scaffold::{self, ScaffoldOptions, ScaffoldResult, TemplateRenderer};
use crate::verify::sentinel::{parse_cache_verdict, CacheVerdict};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Where a case is in its sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Scaffolded,
    InitialBuilt,
    /// Running the k-th mutation pass, counting from 1
    Mutating(usize),
    Done,
    Failed,
}

/// Settings shared by every case of a run
#[derive(Debug, Clone)]
pub struct VerifySettings {
    pub tool: ToolConfig,
    /// `host:port` new tags are pushed to
    pub registry_host: String,
    pub platforms: Vec<String>,
    pub base_image: String,
}

impl VerifySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tool: config.tool.clone(),
            registry_host: config.registry.host.clone(),
            platforms: config.build.platforms.clone(),
            base_image: config.build.base_image.clone(),
        }
    }
}

/// One build the protocol ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub suffix: String,
    /// Whether the tool was expected to hit
    pub expected_hit: bool,
    pub tags: TagSet,
}

/// Collaborators a case talks to
pub struct Collaborators<'a> {
    pub engine: &'a dyn BuildEngine,
    pub registry: &'a dyn ManifestSource,
    pub renderer: &'a dyn TemplateRenderer,
}

/// Runs the full sequence for one configuration
pub struct VerifyProtocol<'a> {
    configuration: Configuration,
    output_dir: PathBuf,
    cache_dir: PathBuf,
    case_id: Uuid,
    settings: &'a VerifySettings,
    deps: Collaborators<'a>,
    phase: Phase,
}

impl<'a> VerifyProtocol<'a> {
    /// `cache_dir` should live outside `output_dir` so cache entries never
    /// land in the build context.
    pub fn new(
        configuration: Configuration,
        output_dir: &Path,
        cache_dir: &Path,
        settings: &'a VerifySettings,
        deps: Collaborators<'a>,
    ) -> Self {
        Self {
            configuration,
            output_dir: output_dir.to_path_buf(),
            cache_dir: cache_dir.to_path_buf(),
            case_id: Uuid::new_v4(),
            settings,
            deps,
            phase: Phase::Pending,
        }
    }

    /// Use a fixed namespace instead of a random one
    pub fn with_case_id(mut self, case_id: Uuid) -> Self {
        self.case_id = case_id;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn case_id(&self) -> Uuid {
        self.case_id
    }

    /// Run every step; the first failed expectation ends the case
    pub async fn run(&mut self) -> MatrixResult<Vec<BuildRecord>> {
        match self.execute().await {
            Ok(records) => {
                self.phase = Phase::Done;
                Ok(records)
            }
            Err(e) => {
                info!("Case failed during {:?}: {}", self.phase, e);
                self.phase = Phase::Failed;
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> MatrixResult<Vec<BuildRecord>> {
        let options = ScaffoldOptions {
            renderer: self.deps.renderer,
            base_image: &self.settings.base_image,
            platforms: &self.settings.platforms,
        };
        let scaffold = scaffold::materialize(&self.configuration, &self.output_dir, &options)?;
        self.phase = Phase::Scaffolded;
        info!("Scaffolded {} as case {}", self.configuration, self.case_id);

        let mut records = Vec::new();

        let initial = self.build(&scaffold, "original", false).await?;
        self.check_contents(&initial).await?;
        let mut baseline = initial.clone();
        records.push(record("original", false, initial));
        self.phase = Phase::InitialBuilt;

        let mut pass = 0;

        // Excluded marker: content outside the image must not invalidate
        let excluded = scaffold
            .excluded_marker()
            .ok_or_else(|| MatrixError::assertion("excluded marker was not scaffolded"))?;
        pass += 1;
        self.phase = Phase::Mutating(pass);
        scaffold::append(&excluded.path, &marker_change())?;
        let tags = self.build(&scaffold, "modified-excluded", true).await?;
        self.compare_hit(&tags, &baseline).await?;
        self.check_contents(&tags).await?;
        baseline = tags.clone();
        records.push(record("modified-excluded", true, tags));

        // Included marker: content inside the image must invalidate
        let included = scaffold
            .included_marker()
            .ok_or_else(|| MatrixError::assertion("included marker was not scaffolded"))?;
        pass += 1;
        self.phase = Phase::Mutating(pass);
        scaffold::append(&included.path, &marker_change())?;
        let tags = self.build(&scaffold, "modified-included", false).await?;
        self.compare_miss(&tags, &baseline).await?;
        self.check_contents(&tags).await?;
        records.push(record("modified-included", false, tags));

        // Build recipe changes always invalidate
        let definitions = scaffold
            .bakefiles
            .iter()
            .enumerate()
            .map(|(i, f)| (format!("modified-cache-miss-bakefile-{}", i + 1), f))
            .chain(
                scaffold
                    .dockerfiles
                    .iter()
                    .enumerate()
                    .map(|(i, f)| (format!("modified-cache-miss-dockerfile-{}", i + 1), f)),
            );

        let mut definition_changes = 0;
        for (suffix, file) in definitions {
            pass += 1;
            self.phase = Phase::Mutating(pass);
            info!("Modifying {} to force a cache miss", scaffold.relative(file).display());
            scaffold::append(&file.path, &definition_change())?;
            let tags = self.build(&scaffold, &suffix, false).await?;
            self.check_contents(&tags).await?;
            records.push(record(&suffix, false, tags));
            definition_changes += 1;
        }

        if definition_changes == 0 {
            return Err(MatrixError::assertion(
                "no build or bake file was modified; recipe changes went untested",
            ));
        }

        Ok(records)
    }

    /// Synthesize and run one build, then check its verdict. Misses also
    /// check that every requested platform was pushed.
    async fn build(
        &self,
        scaffold: &ScaffoldResult,
        suffix: &str,
        expect_hit: bool,
    ) -> MatrixResult<TagSet> {
        let tags = TagSet::generate(
            &self.settings.registry_host,
            &self.case_id,
            suffix,
            &self.configuration.targets(),
        );
        let cache = CacheSeed::prepare(
            self.deps.engine,
            &self.settings.tool,
            self.configuration.cache_source(),
            &self.cache_dir,
        )
        .await?;
        let options = CommandOptions {
            tool_binary: &self.settings.tool.binary,
            platforms: &self.settings.platforms,
        };
        let command = synthesize(
            &self.configuration,
            scaffold,
            &self.output_dir,
            &tags,
            &cache,
            &options,
        )?;

        self.print_reproduction(&command);

        let output = self.deps.engine.run_build(&command).await?;
        if !output.success() {
            return Err(MatrixError::BuildFailed {
                command: command.command_line,
                code: output.code,
                output: output.text(),
            });
        }
        cache.absorb().await?;

        let expected = if expect_hit {
            CacheVerdict::Hit
        } else {
            CacheVerdict::Miss
        };
        let verdict = parse_cache_verdict(&output.text(), &self.settings.tool.name);
        if verdict != expected {
            return Err(MatrixError::assertion(format!(
                "{}: expected {} but got {}",
                suffix, expected, verdict
            )));
        }
        println!("Cache expectation met for {}: {}", suffix, verdict);

        if !expect_hit {
            self.check_platforms(&tags).await?;
        }
        Ok(tags)
    }

    fn print_reproduction(&self, command: &BuildCommand) {
        match scaffold::tree_listing(&self.output_dir) {
            Ok(tree) => println!("> tree {}\n{}", self.output_dir.display(), tree),
            Err(e) => debug!("Could not list working tree: {}", e),
        }
        let memory_var = self.settings.tool.memory_cache_var();
        println!("{}", command.reproduction(&[memory_var.as_str()]));
    }

    async fn check_platforms(&self, tags: &TagSet) -> MatrixResult<()> {
        let mut checked = 0;
        for (target, target_tags) in tags.by_target() {
            for tag in target_tags {
                let manifests = self.deps.registry.manifest_list(&ImageRef::parse(tag)?).await?;
                if manifests.manifests.len() < 2 {
                    return Err(MatrixError::assertion(format!(
                        "expected at least 2 platform manifests for {} ({}), found {}",
                        tag,
                        target,
                        manifests.manifests.len()
                    )));
                }
                let missing = manifests.missing_platforms(&self.settings.platforms);
                if !missing.is_empty() {
                    return Err(MatrixError::assertion(format!(
                        "{} ({}) lacks platforms {}",
                        tag,
                        target,
                        missing.join(", ")
                    )));
                }
                checked += 1;
            }
        }
        if checked == 0 {
            return Err(MatrixError::assertion("no tag was checked for platforms"));
        }
        Ok(())
    }

    /// A hit must retag: same digests as the baseline, tag by tag
    async fn compare_hit(&self, tags: &TagSet, baseline: &TagSet) -> MatrixResult<()> {
        for target in self.configuration.targets() {
            let current = tags.for_target(target);
            let expected = baseline.for_target(target);
            if current.len() != expected.len() {
                return Err(MatrixError::assertion(format!(
                    "{}: {} tags against {} baseline tags",
                    target,
                    current.len(),
                    expected.len()
                )));
            }

            for (tag, base) in current.iter().zip(expected) {
                let now = self.deps.registry.digest_ids(&ImageRef::parse(tag)?).await?;
                let before = self.deps.registry.digest_ids(&ImageRef::parse(base)?).await?;
                if now.is_empty() {
                    return Err(MatrixError::assertion(format!("no manifests for {}", tag)));
                }
                if now != before {
                    return Err(MatrixError::assertion(format!(
                        "manifests of {} differ from {}: {:?} vs {:?}",
                        tag, base, now, before
                    )));
                }
            }
        }
        Ok(())
    }

    /// A semantic miss must publish a fresh digest set, or add to the
    /// baseline without dropping any of it
    async fn compare_miss(&self, tags: &TagSet, baseline: &TagSet) -> MatrixResult<()> {
        for target in self.configuration.targets() {
            for (tag, base) in tags.for_target(target).iter().zip(baseline.for_target(target)) {
                let now = self.deps.registry.digest_ids(&ImageRef::parse(tag)?).await?;
                let before = self.deps.registry.digest_ids(&ImageRef::parse(base)?).await?;
                if !introduces_new_digests(&now, &before) {
                    return Err(MatrixError::assertion(format!(
                        "{} was rebuilt but its digests are neither fresh nor a superset of {}",
                        tag, base
                    )));
                }
            }
        }
        Ok(())
    }

    /// Run each image and look for the markers in its copy of the context
    async fn check_contents(&self, tags: &TagSet) -> MatrixResult<()> {
        for tag in tags.all() {
            self.deps.engine.remove_image(tag).await?;
        }

        for (target, target_tags) in tags.by_target() {
            let dir = format!("/added_files_{}", target);
            for tag in target_tags {
                let listing = self.deps.engine.list_image_dir(tag, &dir).await?;
                let names: Vec<&str> = listing.split_whitespace().collect();
                if !names.contains(&INCLUDED_MARKER) {
                    return Err(MatrixError::assertion(format!(
                        "{} missing from {} in {}",
                        INCLUDED_MARKER, dir, tag
                    )));
                }
                if names.contains(&EXCLUDED_MARKER) {
                    return Err(MatrixError::assertion(format!(
                        "{} present in {} in {}",
                        EXCLUDED_MARKER, dir, tag
                    )));
                }
            }
        }
        Ok(())
    }
}

fn record(suffix: &str, expected_hit: bool, tags: TagSet) -> BuildRecord {
    BuildRecord {
        suffix: suffix.to_string(),
        expected_hit,
        tags,
    }
}

fn marker_change() -> String {
    format!("\nModified at {}\n", chrono::Utc::now().to_rfc3339())
}

fn definition_change() -> String {
    format!("\n# Modified at {}\n", chrono::Utc::now().to_rfc3339())
}
