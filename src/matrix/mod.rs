//! Build-configuration space
//!
//! A `Configuration` is one point in the matrix: how many bake files,
//! where the build files live, which ignore files exist and so on.
//! Pruned combinations cannot be constructed.

mod space;

pub use space::{enumerate, Domains};

use crate::error::{MatrixError, MatrixResult};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bake files, or no bake file at all
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BakeDefinition {
    Single,
    Multiple,
    None,
}

/// One or two of something (build files, targets)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Multiplicity {
    Single,
    Multiple,
}

/// Where a family of definition files is written
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Root,
    Subdir,
}

/// Ignore-file layout
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum IgnoreVariant {
    /// One `.dockerignore` at the build context root
    Single,
    /// One `<file>.dockerignore` per build file plus a decoy at the root
    Multiple,
    /// No root-level ignore file, only `<file>.dockerignore` per build file
    None,
}

/// Build context directory relative to the working directory
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ContextLocation {
    Cwd,
    Subdir,
}

/// Where the tool reads its previous cache state from
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    Disk,
    Memory,
}

/// Every value of a field, in declaration order
pub trait FieldDomain: Sized + Copy + 'static {
    const ALL: &'static [Self];
}

impl FieldDomain for BakeDefinition {
    const ALL: &'static [Self] = &[Self::Single, Self::Multiple, Self::None];
}

impl FieldDomain for Multiplicity {
    const ALL: &'static [Self] = &[Self::Single, Self::Multiple];
}

impl FieldDomain for Location {
    const ALL: &'static [Self] = &[Self::Root, Self::Subdir];
}

impl FieldDomain for IgnoreVariant {
    const ALL: &'static [Self] = &[Self::Single, Self::Multiple, Self::None];
}

impl FieldDomain for ContextLocation {
    const ALL: &'static [Self] = &[Self::Cwd, Self::Subdir];
}

impl FieldDomain for CacheSource {
    const ALL: &'static [Self] = &[Self::Disk, Self::Memory];
}

/// Name of the directory used by every `subdir` location
pub const SUBDIR: &str = "subdir";

/// Name of the first build target
pub const TARGET1: &str = "target1";

/// Name of the second build target
pub const TARGET2: &str = "target2";

/// Raw field tuple, before pruning rules are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigurationFields {
    pub bake_definition: BakeDefinition,
    pub bake_location: Location,
    pub build_file_count: Multiplicity,
    pub build_file_location: Location,
    pub target_count: Multiplicity,
    pub ignore_variant: IgnoreVariant,
    pub context_location: ContextLocation,
    pub cache_source: CacheSource,
}

/// A validated point in the matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ConfigurationFields", into = "ConfigurationFields")]
pub struct Configuration {
    fields: ConfigurationFields,
}

impl Configuration {
    /// Validate a field tuple against the pruning rules
    pub fn new(fields: ConfigurationFields) -> MatrixResult<Self> {
        if let Some(reason) = pruning_violation(&fields) {
            return Err(MatrixError::InvalidConfiguration(reason.to_string()));
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &ConfigurationFields {
        &self.fields
    }

    pub fn bake_definition(&self) -> BakeDefinition {
        self.fields.bake_definition
    }

    pub fn bake_location(&self) -> Location {
        self.fields.bake_location
    }

    pub fn build_file_count(&self) -> Multiplicity {
        self.fields.build_file_count
    }

    pub fn build_file_location(&self) -> Location {
        self.fields.build_file_location
    }

    pub fn target_count(&self) -> Multiplicity {
        self.fields.target_count
    }

    pub fn ignore_variant(&self) -> IgnoreVariant {
        self.fields.ignore_variant
    }

    pub fn context_location(&self) -> ContextLocation {
        self.fields.context_location
    }

    pub fn cache_source(&self) -> CacheSource {
        self.fields.cache_source
    }

    /// Whether the build goes through `buildx bake`
    pub fn uses_bake(&self) -> bool {
        self.fields.bake_definition != BakeDefinition::None
    }

    /// Targets the build produces.
    ///
    /// `target2` is built whenever two targets are requested or two build
    /// files exist, so every scaffolded build file feeds the build.
    pub fn targets(&self) -> Vec<&'static str> {
        let two = self.uses_bake()
            && (self.fields.target_count == Multiplicity::Multiple
                || self.fields.build_file_count == Multiplicity::Multiple);
        if two {
            vec![TARGET1, TARGET2]
        } else {
            vec![TARGET1]
        }
    }

    /// Whether any file family is placed under `subdir/`
    pub fn needs_subdir(&self) -> bool {
        (self.uses_bake() && self.fields.bake_location == Location::Subdir)
            || self.fields.build_file_location == Location::Subdir
            || self.fields.context_location == ContextLocation::Subdir
    }
}

impl TryFrom<ConfigurationFields> for Configuration {
    type Error = MatrixError;

    fn try_from(fields: ConfigurationFields) -> MatrixResult<Self> {
        Self::new(fields)
    }
}

impl From<Configuration> for ConfigurationFields {
    fn from(config: Configuration) -> Self {
        config.fields
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.fields;
        write!(
            f,
            "bake={} bake_location={} build_files={} build_file_location={} targets={} ignore={} context={} cache={}",
            value_name(c.bake_definition),
            value_name(c.bake_location),
            value_name(c.build_file_count),
            value_name(c.build_file_location),
            value_name(c.target_count),
            value_name(c.ignore_variant),
            value_name(c.context_location),
            value_name(c.cache_source),
        )
    }
}

/// The clap value name of a field value (`single`, `subdir`, ...)
pub fn value_name<T: ValueEnum>(value: T) -> String {
    value
        .to_possible_value()
        .map(|v| v.get_name().to_string())
        .unwrap_or_default()
}

fn pruning_violation(c: &ConfigurationFields) -> Option<&'static str> {
    match c.bake_definition {
        BakeDefinition::None => {
            if c.build_file_count == Multiplicity::Multiple {
                Some("a single build has no notion of multiple build files")
            } else if c.ignore_variant == IgnoreVariant::Multiple {
                Some("a single build has no notion of multiple ignore files")
            } else if c.target_count == Multiplicity::Multiple {
                Some("a single build has no notion of multiple targets")
            } else {
                None
            }
        }
        BakeDefinition::Single | BakeDefinition::Multiple => {
            if c.context_location != ContextLocation::Cwd {
                Some("bake always builds from the working root")
            } else {
                None
            }
        }
    }
}
