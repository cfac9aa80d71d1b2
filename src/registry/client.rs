//! Blocking HTTP client for the registry manifest API

use super::{ImageRef, ManifestSet, PlatformManifest};
use crate::error::{MatrixError, MatrixResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;
use ureq::http::Response;
use ureq::{Agent, Body};

const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Index, manifest list, or single manifest: whatever the tag points at
const ANY_MANIFEST: &str = "application/vnd.docker.distribution.manifest.list.v2+json,\
application/vnd.oci.image.index.v1+json,\
application/vnd.docker.distribution.manifest.v2+json";

const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// Source of manifest information for a tag
///
/// Implemented by `RegistryClient`; the verify protocol only sees this
/// trait so it can run against a fake registry.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Per-platform manifests of an image index
    async fn manifest_list(&self, image: &ImageRef) -> MatrixResult<ManifestSet>;

    /// Digests of whatever the tag points at, index or single manifest
    async fn digest_ids(&self, image: &ImageRef) -> MatrixResult<BTreeSet<String>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexBody {
    #[serde(default = "default_schema_version")]
    schema_version: u32,
    #[serde(default)]
    media_type: String,
    #[serde(default)]
    manifests: Vec<PlatformManifest>,
}

fn default_schema_version() -> u32 {
    2
}

#[derive(Debug, Deserialize)]
struct DigestsBody {
    #[serde(default)]
    manifests: Option<Vec<DigestEntry>>,
    #[serde(default)]
    digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DigestEntry {
    digest: String,
}

/// Registry HTTP client
#[derive(Clone)]
pub struct RegistryClient {
    scheme: String,
    agent: Agent,
}

impl RegistryClient {
    /// Create a client; every request is bounded by `timeout`
    pub fn new(scheme: impl Into<String>, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            scheme: scheme.into(),
            agent,
        }
    }

    /// Base URL for a registry host (`host:port`)
    pub fn registry_url(&self, host: &str) -> String {
        format!("{}://{}", self.scheme, host)
    }

    /// Fetch the image index of `image:tag`
    pub fn fetch_manifest_list(
        &self,
        registry_url: &str,
        image: &str,
        tag: &str,
    ) -> MatrixResult<ManifestSet> {
        let url = manifest_url(registry_url, image, tag);
        let (response, body) = self.get(&url, OCI_INDEX)?;
        check_status(&response, image, tag, &body)?;

        let digest = header_digest(&response)
            .ok_or_else(|| MatrixError::Registry(format!("Missing {} header in response", DIGEST_HEADER)))?;
        let index: IndexBody = serde_json::from_str(&body)
            .map_err(|e| MatrixError::Registry(format!("Malformed manifest for {}:{}: {}", image, tag, e)))?;

        Ok(ManifestSet {
            digest,
            schema_version: index.schema_version,
            media_type: index.media_type,
            manifests: index.manifests,
        })
    }

    /// Fetch digests of `image:tag`, tolerating a single-platform manifest
    pub fn fetch_digest_ids(
        &self,
        registry_url: &str,
        image: &str,
        tag: &str,
    ) -> MatrixResult<BTreeSet<String>> {
        let url = manifest_url(registry_url, image, tag);
        let (response, body) = self.get(&url, ANY_MANIFEST)?;
        check_status(&response, image, tag, &body)?;

        let parsed: DigestsBody = serde_json::from_str(&body)
            .map_err(|e| MatrixError::Registry(format!("Malformed manifest for {}:{}: {}", image, tag, e)))?;

        if let Some(manifests) = parsed.manifests {
            return Ok(manifests.into_iter().map(|m| m.digest).collect());
        }

        header_digest(&response)
            .or(parsed.digest)
            .map(|d| BTreeSet::from([d]))
            .ok_or_else(|| MatrixError::Registry(format!("No digest for {}:{}", image, tag)))
    }

    /// Whether the registry answers `GET /v2/` with 200
    pub fn ping(&self, registry_url: &str) -> bool {
        let url = format!("{}/v2/", registry_url.trim_end_matches('/'));
        matches!(self.get(&url, "application/json"), Ok((response, _)) if response.status().as_u16() == 200)
    }

    fn get(&self, url: &str, accept: &str) -> MatrixResult<(Response<Body>, String)> {
        debug!("GET {}", url);
        let mut response = self
            .agent
            .get(url)
            .header("Accept", accept)
            .call()
            .map_err(|e| transport_error(url, e))?;
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| transport_error(url, e))?;
        Ok((response, body))
    }
}

#[async_trait]
impl ManifestSource for RegistryClient {
    async fn manifest_list(&self, image: &ImageRef) -> MatrixResult<ManifestSet> {
        let client = self.clone();
        let image = image.clone();
        tokio::task::spawn_blocking(move || {
            let url = client.registry_url(&image.host);
            client.fetch_manifest_list(&url, &image.repository, &image.tag)
        })
        .await
        .map_err(|e| MatrixError::Internal(format!("registry task failed: {}", e)))?
    }

    async fn digest_ids(&self, image: &ImageRef) -> MatrixResult<BTreeSet<String>> {
        let client = self.clone();
        let image = image.clone();
        tokio::task::spawn_blocking(move || {
            let url = client.registry_url(&image.host);
            client.fetch_digest_ids(&url, &image.repository, &image.tag)
        })
        .await
        .map_err(|e| MatrixError::Internal(format!("registry task failed: {}", e)))?
    }
}

fn manifest_url(registry_url: &str, image: &str, tag: &str) -> String {
    format!(
        "{}/v2/{}/manifests/{}",
        registry_url.trim_end_matches('/'),
        image,
        tag
    )
}

fn check_status(response: &Response<Body>, image: &str, tag: &str, body: &str) -> MatrixResult<()> {
    match response.status().as_u16() {
        200 => Ok(()),
        404 => Err(MatrixError::ManifestNotFound {
            image: image.to_string(),
            tag: tag.to_string(),
        }),
        code => Err(MatrixError::Registry(format!("{} - {}", code, body.trim()))),
    }
}

fn header_digest(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(DIGEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn transport_error(url: &str, err: ureq::Error) -> MatrixError {
    match &err {
        ureq::Error::Timeout(_)
        | ureq::Error::HostNotFound
        | ureq::Error::ConnectionFailed
        | ureq::Error::Io(_) => MatrixError::RegistryConnection {
            url: url.to_string(),
            reason: err.to_string(),
        },
        _ => MatrixError::Registry(format!("HTTP error: {}", err)),
    }
}
