//! Working-tree scaffolding for one test case
//!
//! Materializes build files, bake files, ignore files and the two marker
//! files into a fresh per-case directory.

pub mod templates;

pub use templates::{BuiltinTemplates, TemplateContext, TemplateRenderer};

use crate::error::{MatrixError, MatrixResult};
use crate::matrix::{
    BakeDefinition, Configuration, ContextLocation, IgnoreVariant, Location, Multiplicity, SUBDIR,
};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use templates::{EXCLUDED_MARKER, INCLUDED_MARKER};
use tracing::debug;

/// Content ignored by everything: the decoy root ignore file
const DECOY_IGNORE: &str = "**/*";

/// A file written to disk for a test case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldedFile {
    /// Absolute location
    pub path: PathBuf,
    /// Content written at creation time
    pub content: String,
}

/// Files created for one configuration
#[derive(Debug, Clone)]
pub struct ScaffoldResult {
    /// Working directory every other path lives under
    pub root: PathBuf,
    pub dockerfiles: Vec<ScaffoldedFile>,
    pub bakefiles: Vec<ScaffoldedFile>,
    pub ignorefiles: Vec<ScaffoldedFile>,
    pub aux_files: Vec<ScaffoldedFile>,
}

impl ScaffoldResult {
    /// Marker that ignore rules must keep out of the image
    pub fn excluded_marker(&self) -> Option<&ScaffoldedFile> {
        self.marker(EXCLUDED_MARKER)
    }

    /// Marker that must end up in the image
    pub fn included_marker(&self) -> Option<&ScaffoldedFile> {
        self.marker(INCLUDED_MARKER)
    }

    fn marker(&self, name: &str) -> Option<&ScaffoldedFile> {
        self.aux_files
            .iter()
            .find(|f| f.path.file_name().is_some_and(|n| n == name))
    }

    /// Path of a scaffolded file relative to the working directory
    pub fn relative(&self, file: &ScaffoldedFile) -> PathBuf {
        file.path
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| file.path.clone())
    }
}

/// Inputs beyond the configuration itself
pub struct ScaffoldOptions<'a> {
    pub renderer: &'a dyn TemplateRenderer,
    pub base_image: &'a str,
    pub platforms: &'a [String],
}

/// Create `output_dir` and populate it for `config`
pub fn materialize(
    config: &Configuration,
    output_dir: &Path,
    options: &ScaffoldOptions<'_>,
) -> MatrixResult<ScaffoldResult> {
    create_dir(output_dir)?;
    if config.needs_subdir() {
        create_dir(&output_dir.join(SUBDIR))?;
    }

    let build_dir = location_dir(output_dir, config.build_file_location());
    let build_names = build_file_names(config);

    let mut build_files = BTreeMap::new();
    for (i, target) in config.targets().into_iter().enumerate() {
        // A single build file serves every target
        if let Some(name) = build_names.get(i).or_else(|| build_names.first()) {
            build_files.insert(target, relative_to(output_dir, &build_dir.join(name)));
        }
    }

    let ctx = TemplateContext {
        configuration: *config,
        base_image: options.base_image.to_string(),
        platforms: options.platforms.to_vec(),
        build_files,
    };
    let renderer = options.renderer;

    let bakefiles = bakefiles(config, output_dir, renderer, &ctx)?;

    let mut dockerfiles = Vec::new();
    for (i, name) in build_names.iter().enumerate() {
        let template = if i == 0 {
            templates::DOCKERFILE
        } else {
            templates::DOCKERFILE_SECOND
        };
        dockerfiles.push(ScaffoldedFile {
            path: build_dir.join(name),
            content: renderer.render(template, &ctx)?,
        });
    }

    let ignorefiles = ignorefiles(config, output_dir, &dockerfiles, renderer, &ctx)?;
    let aux_files = aux_files(config, output_dir);

    let result = ScaffoldResult {
        root: output_dir.to_path_buf(),
        dockerfiles,
        bakefiles,
        ignorefiles,
        aux_files,
    };

    for file in result
        .bakefiles
        .iter()
        .chain(&result.dockerfiles)
        .chain(&result.ignorefiles)
        .chain(&result.aux_files)
    {
        write_file(file)?;
    }

    debug!(
        "Scaffolded {} build, {} bake, {} ignore files in {}",
        result.dockerfiles.len(),
        result.bakefiles.len(),
        result.ignorefiles.len(),
        output_dir.display()
    );
    Ok(result)
}

/// Append text to an existing scaffolded file
pub fn append(path: &Path, text: &str) -> MatrixResult<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| MatrixError::scaffold(path, e))?;
    file.write_all(text.as_bytes())
        .map_err(|e| MatrixError::scaffold(path, e))
}

fn build_file_names(config: &Configuration) -> Vec<&'static str> {
    match config.build_file_count() {
        Multiplicity::Single => vec!["Dockerfile"],
        Multiplicity::Multiple => vec!["Dockerfile.target1", "Dockerfile.target2"],
    }
}

fn bakefiles(
    config: &Configuration,
    output_dir: &Path,
    renderer: &dyn TemplateRenderer,
    ctx: &TemplateContext,
) -> MatrixResult<Vec<ScaffoldedFile>> {
    let names: &[&str] = match config.bake_definition() {
        BakeDefinition::None => return Ok(Vec::new()),
        BakeDefinition::Single => &[templates::BAKEFILE],
        BakeDefinition::Multiple => &[templates::BAKEFILE, templates::BAKEFILE_OVERRIDE],
    };

    let dir = location_dir(output_dir, config.bake_location());
    names
        .iter()
        .map(|name| {
            Ok(ScaffoldedFile {
                path: dir.join(name),
                content: renderer.render(name, ctx)?,
            })
        })
        .collect()
}

fn ignorefiles(
    config: &Configuration,
    output_dir: &Path,
    dockerfiles: &[ScaffoldedFile],
    renderer: &dyn TemplateRenderer,
    ctx: &TemplateContext,
) -> MatrixResult<Vec<ScaffoldedFile>> {
    let paired = |files: &mut Vec<ScaffoldedFile>| -> MatrixResult<()> {
        for (i, dockerfile) in dockerfiles.iter().enumerate() {
            let template = if i == 0 {
                templates::IGNORE_FIRST
            } else {
                templates::IGNORE_SECOND
            };
            let mut path = dockerfile.path.clone().into_os_string();
            path.push(".dockerignore");
            files.push(ScaffoldedFile {
                path: PathBuf::from(path),
                content: renderer.render(template, ctx)?,
            });
        }
        Ok(())
    };

    let mut files = Vec::new();
    match config.ignore_variant() {
        IgnoreVariant::Single => files.push(ScaffoldedFile {
            path: context_dir(config, output_dir).join(".dockerignore"),
            content: renderer.render(templates::IGNORE_FIRST, ctx)?,
        }),
        IgnoreVariant::Multiple => {
            paired(&mut files)?;
            // Must never be picked up: it would ignore the whole context
            files.push(ScaffoldedFile {
                path: output_dir.join(".dockerignore"),
                content: DECOY_IGNORE.to_string(),
            });
        }
        IgnoreVariant::None => paired(&mut files)?,
    }
    Ok(files)
}

fn aux_files(config: &Configuration, output_dir: &Path) -> Vec<ScaffoldedFile> {
    let dir = context_dir(config, output_dir);
    vec![
        ScaffoldedFile {
            path: dir.join(INCLUDED_MARKER),
            content: "This file must be part of the image.".to_string(),
        },
        ScaffoldedFile {
            path: dir.join(EXCLUDED_MARKER),
            content: "This file should be excluded by .dockerignore.".to_string(),
        },
    ]
}

/// Indented listing of everything under `root`, hidden files included
pub fn tree_listing(root: &Path) -> MatrixResult<String> {
    fn walk(dir: &Path, depth: usize, out: &mut String) -> MatrixResult<()> {
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| MatrixError::io(format!("listing {}", dir.display()), e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        for path in entries {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            if path.is_dir() {
                out.push_str(&format!("{}{}/\n", "  ".repeat(depth), name));
                walk(&path, depth + 1, out)?;
            } else {
                out.push_str(&format!("{}{}\n", "  ".repeat(depth), name));
            }
        }
        Ok(())
    }

    let mut out = format!("{}\n", root.display());
    walk(root, 1, &mut out)?;
    Ok(out)
}

/// Build context directory for `config`
pub fn context_dir(config: &Configuration, output_dir: &Path) -> PathBuf {
    match config.context_location() {
        ContextLocation::Cwd => output_dir.to_path_buf(),
        ContextLocation::Subdir => output_dir.join(SUBDIR),
    }
}

fn location_dir(output_dir: &Path, location: Location) -> PathBuf {
    match location {
        Location::Root => output_dir.to_path_buf(),
        Location::Subdir => output_dir.join(SUBDIR),
    }
}

fn relative_to(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn create_dir(path: &Path) -> MatrixResult<()> {
    fs::create_dir_all(path).map_err(|e| MatrixError::scaffold(path, e))
}

fn write_file(file: &ScaffoldedFile) -> MatrixResult<()> {
    fs::write(&file.path, &file.content).map_err(|e| MatrixError::scaffold(&file.path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::tests::simple_fields;
    use crate::matrix::ConfigurationFields;
    use tempfile::TempDir;

    fn platforms() -> Vec<String> {
        vec!["linux/amd64".to_string(), "linux/arm64".to_string()]
    }

    fn scaffold(fields: ConfigurationFields, dir: &Path) -> MatrixResult<ScaffoldResult> {
        let config = Configuration::new(fields).unwrap();
        let platforms = platforms();
        let options = ScaffoldOptions {
            renderer: &BuiltinTemplates,
            base_image: "alpine:3.20",
            platforms: &platforms,
        };
        materialize(&config, dir, &options)
    }

    fn names(root: &Path, files: &[ScaffoldedFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.path.strip_prefix(root).unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn simple_case_layout() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("case");
        let result = scaffold(simple_fields(), &root).unwrap();

        assert_eq!(names(&root, &result.dockerfiles), vec!["Dockerfile"]);
        assert!(result.bakefiles.is_empty());
        assert_eq!(names(&root, &result.ignorefiles), vec![".dockerignore"]);
        assert_eq!(
            names(&root, &result.aux_files),
            vec![INCLUDED_MARKER, EXCLUDED_MARKER]
        );
        assert!(!root.join(SUBDIR).exists());

        for file in result.dockerfiles.iter().chain(&result.aux_files) {
            assert_eq!(fs::read_to_string(&file.path).unwrap(), file.content);
        }
    }

    #[test]
    fn multiple_everything_in_subdir() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let mut fields = simple_fields();
        fields.bake_definition = BakeDefinition::Multiple;
        fields.bake_location = Location::Subdir;
        fields.build_file_count = Multiplicity::Multiple;
        fields.build_file_location = Location::Subdir;
        fields.ignore_variant = IgnoreVariant::Multiple;
        let result = scaffold(fields, &root).unwrap();

        assert_eq!(
            names(&root, &result.bakefiles),
            vec!["subdir/docker-bake.hcl", "subdir/docker-bake.override.hcl"]
        );
        assert_eq!(
            names(&root, &result.dockerfiles),
            vec!["subdir/Dockerfile.target1", "subdir/Dockerfile.target2"]
        );
        assert_eq!(
            names(&root, &result.ignorefiles),
            vec![
                "subdir/Dockerfile.target1.dockerignore",
                "subdir/Dockerfile.target2.dockerignore",
                ".dockerignore"
            ]
        );
        let decoy = fs::read_to_string(root.join(".dockerignore")).unwrap();
        assert_eq!(decoy, DECOY_IGNORE);

        let bake = fs::read_to_string(root.join("subdir/docker-bake.hcl")).unwrap();
        assert!(bake.contains("dockerfile = \"subdir/Dockerfile.target2\""));
    }

    #[test]
    fn context_subdir_holds_markers_and_ignore() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let mut fields = simple_fields();
        fields.context_location = ContextLocation::Subdir;
        let result = scaffold(fields, &root).unwrap();

        assert_eq!(
            names(&root, &result.ignorefiles),
            vec!["subdir/.dockerignore"]
        );
        assert_eq!(
            result.included_marker().map(|f| result.relative(f)),
            Some(PathBuf::from("subdir/included_file.txt"))
        );
        assert!(root.join("subdir/excluded_file.txt").exists());
    }

    #[test]
    fn no_ignore_variant_pairs_without_root_file() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let mut fields = simple_fields();
        fields.ignore_variant = IgnoreVariant::None;
        let result = scaffold(fields, &root).unwrap();

        assert_eq!(
            names(&root, &result.ignorefiles),
            vec!["Dockerfile.dockerignore"]
        );
        assert!(!root.join(".dockerignore").exists());
    }

    #[test]
    fn single_file_two_targets_shares_dockerfile() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let mut fields = simple_fields();
        fields.bake_definition = BakeDefinition::Single;
        fields.target_count = Multiplicity::Multiple;
        let result = scaffold(fields, &root).unwrap();

        assert_eq!(result.dockerfiles.len(), 1);
        assert!(result.dockerfiles[0].content.contains("AS target2"));
        assert!(result.bakefiles[0].content.contains("dockerfile = \"Dockerfile\""));
    }

    #[test]
    fn append_extends_file() {
        let temp = TempDir::new().unwrap();
        let result = scaffold(simple_fields(), temp.path()).unwrap();
        let marker = result.excluded_marker().unwrap();

        append(&marker.path, "\nchanged").unwrap();
        let content = fs::read_to_string(&marker.path).unwrap();
        assert_eq!(content, format!("{}\nchanged", marker.content));
    }

    #[test]
    fn tree_lists_nested_files() {
        let temp = TempDir::new().unwrap();
        let mut fields = simple_fields();
        fields.build_file_location = Location::Subdir;
        scaffold(fields, temp.path()).unwrap();

        let listing = tree_listing(temp.path()).unwrap();
        assert!(listing.contains("\n  .dockerignore\n"));
        assert!(listing.contains("\n  subdir/\n    Dockerfile\n"));
    }

    struct MissingTemplates;

    impl TemplateRenderer for MissingTemplates {
        fn render(&self, name: &str, _ctx: &TemplateContext) -> MatrixResult<String> {
            Err(MatrixError::TemplateNotFound(name.to_string()))
        }
    }

    #[test]
    fn renderer_failure_propagates() {
        let temp = TempDir::new().unwrap();
        let config = Configuration::new(simple_fields()).unwrap();
        let platforms = platforms();
        let options = ScaffoldOptions {
            renderer: &MissingTemplates,
            base_image: "alpine:3.20",
            platforms: &platforms,
        };
        let err = materialize(&config, temp.path(), &options).unwrap_err();
        assert!(matches!(err, MatrixError::TemplateNotFound(_)));
    }
}
