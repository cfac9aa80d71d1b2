//! Built-in templates for scaffolded build definitions
//!
//! Rendering is behind `TemplateRenderer` so a test run can swap in other
//! file contents; the built-in set produces a minimal multi-stage image
//! that copies its build context into `/added_files_<target>/`.

use crate::error::{MatrixError, MatrixResult};
use crate::matrix::{Configuration, TARGET1, TARGET2};
use std::collections::BTreeMap;

pub const DOCKERFILE: &str = "Dockerfile";
pub const DOCKERFILE_SECOND: &str = "Dockerfile2";
pub const BAKEFILE: &str = "docker-bake.hcl";
pub const BAKEFILE_OVERRIDE: &str = "docker-bake.override.hcl";
pub const IGNORE_FIRST: &str = "dockerignore1";
pub const IGNORE_SECOND: &str = "dockerignore2";

/// Marker file that ignore rules must exclude
pub const EXCLUDED_MARKER: &str = "excluded_file.txt";

/// Marker file that must end up in the image
pub const INCLUDED_MARKER: &str = "included_file.txt";

/// Everything a template may interpolate
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub configuration: Configuration,
    pub base_image: String,
    pub platforms: Vec<String>,
    /// Build file per target, relative to the bake context
    pub build_files: BTreeMap<&'static str, String>,
}

/// Produces file contents by template name
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, name: &str, ctx: &TemplateContext) -> MatrixResult<String>;
}

/// Templates compiled into the binary
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTemplates;

impl TemplateRenderer for BuiltinTemplates {
    fn render(&self, name: &str, ctx: &TemplateContext) -> MatrixResult<String> {
        match name {
            DOCKERFILE => Ok(dockerfile(ctx)),
            DOCKERFILE_SECOND => Ok(stage(&ctx.base_image, TARGET2)),
            BAKEFILE => Ok(bakefile(ctx)),
            BAKEFILE_OVERRIDE => Ok(bake_override(ctx)),
            IGNORE_FIRST => Ok(ignore_rules(TARGET1)),
            IGNORE_SECOND => Ok(ignore_rules(TARGET2)),
            other => Err(MatrixError::TemplateNotFound(other.to_string())),
        }
    }
}

/// First build file. When it is the only one but two targets are built,
/// it carries both stages with `target1` last so a plain build yields it.
fn dockerfile(ctx: &TemplateContext) -> String {
    let first = ctx.build_files.get(TARGET1);
    let single_file_two_targets =
        ctx.build_files.len() > 1 && ctx.build_files.values().all(|f| Some(f) == first);

    if single_file_two_targets {
        format!(
            "{}\n{}",
            stage(&ctx.base_image, TARGET2),
            stage(&ctx.base_image, TARGET1)
        )
    } else {
        stage(&ctx.base_image, TARGET1)
    }
}

fn stage(base_image: &str, target: &str) -> String {
    format!(
        "FROM {base_image} AS {target}\n\
         WORKDIR /added_files_{target}\n\
         COPY . .\n"
    )
}

fn tags_var(target: &str) -> String {
    format!("{}_TAGS", target.to_uppercase())
}

fn platforms_list(platforms: &[String]) -> String {
    let quoted: Vec<String> = platforms.iter().map(|p| format!("\"{}\"", p)).collect();
    format!("[{}]", quoted.join(", "))
}

fn bakefile(ctx: &TemplateContext) -> String {
    let split = ctx.configuration.bake_definition() == crate::matrix::BakeDefinition::Multiple;
    let mut out = String::new();

    for target in [TARGET1, TARGET2] {
        out.push_str(&format!(
            "variable \"{}\" {{\n  default = \"\"\n}}\n\n",
            tags_var(target)
        ));
    }

    let targets: Vec<String> = ctx
        .build_files
        .keys()
        .map(|t| format!("\"{}\"", t))
        .collect();
    out.push_str(&format!(
        "group \"default\" {{\n  targets = [{}]\n}}\n",
        targets.join(", ")
    ));

    for (target, dockerfile) in &ctx.build_files {
        out.push_str(&format!("\ntarget \"{target}\" {{\n"));
        out.push_str("  context = \".\"\n");
        out.push_str(&format!("  dockerfile = \"{dockerfile}\"\n"));
        out.push_str(&format!("  target = \"{target}\"\n"));
        if !split {
            out.push_str(&format!(
                "  platforms = {}\n",
                platforms_list(&ctx.platforms)
            ));
            out.push_str(&format!("  tags = split(\",\", {})\n", tags_var(target)));
        }
        out.push_str("}\n");
    }

    out
}

/// Override file: tags and platforms move here when bake files are split
fn bake_override(ctx: &TemplateContext) -> String {
    let mut out = String::new();
    for target in ctx.build_files.keys() {
        out.push_str(&format!("target \"{target}\" {{\n"));
        out.push_str(&format!(
            "  platforms = {}\n",
            platforms_list(&ctx.platforms)
        ));
        out.push_str(&format!("  tags = split(\",\", {})\n", tags_var(target)));
        out.push_str("}\n\n");
    }
    out
}

fn ignore_rules(target: &str) -> String {
    format!("# {target}\n{EXCLUDED_MARKER}\n**/{EXCLUDED_MARKER}\n")
}
