//! Image registry access
//!
//! Tag decomposition, manifest-list types, and an HTTP client for the
//! registry's `/v2/<image>/manifests/<tag>` endpoint.

mod client;

pub use client::{ManifestSource, RegistryClient};

use crate::error::{MatrixError, MatrixResult};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;

/// A fully qualified tag, `host:port/path:tag`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    /// Registry host including its port
    pub host: String,
    /// Repository path inside the registry
    pub repository: String,
    /// Tag name
    pub tag: String,
}

impl ImageRef {
    /// Split a tag on the first slash (host) and the last colon (tag name).
    ///
    /// The host must carry a port, so the colon inside it is never taken
    /// for the tag separator.
    pub fn parse(tag: &str) -> MatrixResult<Self> {
        let invalid = || MatrixError::InvalidTag(tag.to_string());

        let (host, rest) = tag.split_once('/').ok_or_else(invalid)?;
        let (repository, name) = rest.rsplit_once(':').ok_or_else(invalid)?;

        let has_port = host
            .rsplit_once(':')
            .is_some_and(|(h, p)| !h.is_empty() && !p.is_empty() && p.parse::<u16>().is_ok());
        if !has_port || repository.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            repository: repository.to_string(),
            tag: name.to_string(),
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.host, self.repository, self.tag)
    }
}

/// Platform of one manifest in an image index
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub variant: Option<String>,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// Platform-specific manifest entry of an image index
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformManifest {
    #[serde(default)]
    pub platform: Platform,
    pub digest: String,
    pub size: u64,
    pub media_type: String,
}

/// Manifests published under one tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSet {
    /// Top-level digest from `Docker-Content-Digest`
    pub digest: String,
    pub schema_version: u32,
    pub media_type: String,
    pub manifests: Vec<PlatformManifest>,
}

impl ManifestSet {
    /// Platform-specific digests, order irrelevant
    pub fn digests(&self) -> BTreeSet<String> {
        self.manifests.iter().map(|m| m.digest.clone()).collect()
    }

    /// Platforms as `os/arch[/variant]`
    pub fn platforms(&self) -> BTreeSet<String> {
        self.manifests.iter().map(|m| m.platform.to_string()).collect()
    }

    /// Requested platforms with no manifest in this set
    pub fn missing_platforms<'a>(&self, expected: &'a [String]) -> Vec<&'a str> {
        let available = self.platforms();
        expected
            .iter()
            .filter(|p| !available.contains(p.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Two sets are equivalent iff their digest sets are equal
    pub fn equivalent(&self, other: &ManifestSet) -> bool {
        self.digests() == other.digests()
    }
}

/// Whether `current` is a genuine rebuild of `baseline`.
///
/// Only a disjoint set or a strict superset qualifies. Equal sets, subsets
/// and partial overlaps (a baseline digest dropped and another published)
/// do not.
pub fn introduces_new_digests(current: &BTreeSet<String>, baseline: &BTreeSet<String>) -> bool {
    current != baseline && (current.is_disjoint(baseline) || current.is_superset(baseline))
}
