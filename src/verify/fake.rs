//! In-process stand-in for the tool, the build engine and the registry.
//!
//! A build hashes the working tree (minus the excluded marker) into a cache
//! key. A known key is a hit and retags the stored digests; an unknown key
//! is a miss and pushes fresh ones. Faults break one part of that contract.

use crate::command::BuildCommand;
use crate::config::schema::ToolConfig;
use crate::error::{MatrixError, MatrixResult};
use crate::orchestration::{BuildEngine, CommandOutput};
use crate::registry::{ImageRef, ManifestSet, ManifestSource, Platform, PlatformManifest};
use crate::scaffold::templates::{EXCLUDED_MARKER, INCLUDED_MARKER};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    None,
    NeverHit,
    IgnoresIncluded,
    RepushOnHit,
    SinglePlatform,
    Silent,
    LeakExcluded,
    BuildFails,
    /// Reports a miss but retags the last digests pushed for the target
    StaleOnMiss,
    /// Leaves build and bake file edits out of the cache key
    IgnoresDefinitions,
}

type Pushed = Vec<(String, String)>;

#[derive(Default)]
struct State {
    seen: HashMap<u64, BTreeMap<String, Pushed>>,
    registry: HashMap<String, Pushed>,
    latest: HashMap<String, Pushed>,
    builds: usize,
    exports: usize,
    pushes: u64,
}

pub(crate) struct SimulatedTool {
    fault: Fault,
    state: Mutex<State>,
}

impl SimulatedTool {
    pub(crate) fn new() -> Self {
        Self::with_fault(Fault::None)
    }

    pub(crate) fn with_fault(fault: Fault) -> Self {
        Self {
            fault,
            state: Mutex::new(State::default()),
        }
    }

    pub(crate) fn builds(&self) -> usize {
        self.state.lock().unwrap().builds
    }

    pub(crate) fn exports(&self) -> usize {
        self.state.lock().unwrap().exports
    }

    fn cache_key(&self, root: &Path) -> u64 {
        let mut files = Vec::new();
        collect(root, root, &mut files);
        files.sort();

        let mut hasher = DefaultHasher::new();
        for (name, content) in files {
            let file_name = name.rsplit('/').next().unwrap_or(&name).to_string();
            if file_name == EXCLUDED_MARKER {
                continue;
            }
            if file_name == INCLUDED_MARKER && self.fault == Fault::IgnoresIncluded {
                continue;
            }
            name.hash(&mut hasher);
            if self.fault == Fault::IgnoresDefinitions {
                content
                    .lines()
                    .filter(|l| !l.starts_with("# Modified at"))
                    .for_each(|l| l.hash(&mut hasher));
            } else {
                content.hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    fn push(&self, state: &mut State, target: &str) -> Pushed {
        state.pushes += 1;
        let platforms: &[&str] = if self.fault == Fault::SinglePlatform {
            &["linux/amd64"]
        } else {
            &["linux/amd64", "linux/arm64"]
        };
        platforms
            .iter()
            .map(|p| {
                (
                    p.to_string(),
                    format!("sha256:{:04}-{}-{}", state.pushes, target, p.replace('/', "-")),
                )
            })
            .collect()
    }
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<(String, String)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(root, &path, out);
        } else if let Ok(content) = std::fs::read_to_string(&path) {
            let name = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().to_string();
            out.push((name, content));
        }
    }
}

#[async_trait]
impl BuildEngine for SimulatedTool {
    async fn run_build(&self, command: &BuildCommand) -> MatrixResult<CommandOutput> {
        let key = self.cache_key(&command.working_dir);
        let mut state = self.state.lock().unwrap();
        state.builds += 1;

        if self.fault == Fault::BuildFails {
            let mut lines = vec!["#5 ERROR: failed to solve: process did not complete".to_string()];
            lines.extend((0..60).map(|i| format!("#5 retrying layer {}", i)));
            return Ok(CommandOutput { code: 1, lines });
        }

        let known = state.seen.get(&key).cloned();
        let hit = known.is_some() && self.fault != Fault::NeverHit;

        let mut pushed = BTreeMap::new();
        for (target, tags) in &command.tags_by_target {
            let manifests = match (&known, hit, self.fault) {
                (Some(previous), true, fault) if fault != Fault::RepushOnHit => {
                    previous.get(target).cloned().unwrap_or_default()
                }
                (_, false, Fault::StaleOnMiss) if state.latest.contains_key(target) => {
                    state.latest[target].clone()
                }
                _ => self.push(&mut state, target),
            };
            state.latest.insert(target.clone(), manifests.clone());
            for tag in tags {
                state.registry.insert(tag.clone(), manifests.clone());
            }
            pushed.insert(target.clone(), manifests);
        }
        if !hit {
            state.seen.insert(key, pushed);
        }

        let mut lines = vec!["#1 [internal] load build definition".to_string()];
        if self.fault != Fault::Silent {
            lines.push(format!("mimosa-cache-hit: {}", hit));
        }
        Ok(CommandOutput { code: 0, lines })
    }

    async fn export_cache(&self, _tool: &ToolConfig, _cache_dir: &Path) -> MatrixResult<String> {
        self.state.lock().unwrap().exports += 1;
        Ok(String::new())
    }

    async fn remove_image(&self, _tag: &str) -> MatrixResult<()> {
        Ok(())
    }

    async fn list_image_dir(&self, tag: &str, _dir: &str) -> MatrixResult<String> {
        if !self.state.lock().unwrap().registry.contains_key(tag) {
            return Err(MatrixError::command_exec(
                format!("docker run --rm {}", tag),
                "manifest unknown",
            ));
        }
        let mut listing = format!("Dockerfile\n{}\n", INCLUDED_MARKER);
        if self.fault == Fault::LeakExcluded {
            listing.push_str(EXCLUDED_MARKER);
            listing.push('\n');
        }
        Ok(listing)
    }
}

#[async_trait]
impl ManifestSource for SimulatedTool {
    async fn manifest_list(&self, image: &ImageRef) -> MatrixResult<ManifestSet> {
        let state = self.state.lock().unwrap();
        let pushed = state
            .registry
            .get(&image.to_string())
            .ok_or_else(|| MatrixError::ManifestNotFound {
                image: image.repository.clone(),
                tag: image.tag.clone(),
            })?;

        let manifests = pushed
            .iter()
            .map(|(platform, digest)| {
                let (os, architecture) = platform.split_once('/').unwrap_or((platform.as_str(), ""));
                PlatformManifest {
                    platform: Platform {
                        os: os.to_string(),
                        architecture: architecture.to_string(),
                        variant: None,
                    },
                    digest: digest.clone(),
                    size: 1024,
                    media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
                }
            })
            .collect();

        Ok(ManifestSet {
            digest: format!("sha256:index-{}", image.tag),
            schema_version: 2,
            media_type: "application/vnd.oci.image.index.v1+json".to_string(),
            manifests,
        })
    }

    async fn digest_ids(&self, image: &ImageRef) -> MatrixResult<BTreeSet<String>> {
        Ok(self.manifest_list(image).await?.digests())
    }
}
