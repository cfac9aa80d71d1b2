//! Cache seeding for the tool under test
//!
//! The tool keeps one `<hash>.json` entry per build in its cache directory.
//! A case can hand that cache to the tool in two ways:
//!
//! | Source | Tool sees | After the build |
//! |--------|-----------|-----------------|
//! | Disk | `MIMOSA_CACHE_DIR=<cache_dir>` | nothing to do |
//! | Memory | `MIMOSA_CACHE=<export>`, `MIMOSA_CACHE_DIR=<empty scratch>` | new entries copied back into `<cache_dir>` |
//!
//! Memory mode simulates a cold disk with a warm environment variable, so
//! each build re-exports the cache the previous builds left on disk.

use crate::config::schema::ToolConfig;
use crate::error::{MatrixError, MatrixResult};
use crate::matrix::CacheSource;
use crate::orchestration::BuildEngine;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Extension of the tool's cache entries
const ENTRY_EXTENSION: &str = "json";

/// Environment and bookkeeping for one build's cache
#[derive(Debug, Clone)]
pub struct CacheSeed {
    env: BTreeMap<String, String>,
    cache_dir: PathBuf,
    scratch: Option<PathBuf>,
}

impl CacheSeed {
    /// Point the tool straight at `cache_dir`
    pub fn disk(dir_var: &str, cache_dir: &Path) -> Self {
        let env = BTreeMap::from([(dir_var.to_string(), cache_dir.to_string_lossy().to_string())]);
        Self {
            env,
            cache_dir: cache_dir.to_path_buf(),
            scratch: None,
        }
    }

    /// Prepare the cache for the next build of a case
    pub async fn prepare(
        engine: &dyn BuildEngine,
        tool: &ToolConfig,
        source: CacheSource,
        cache_dir: &Path,
    ) -> MatrixResult<Self> {
        fs::create_dir_all(cache_dir)
            .await
            .map_err(|e| MatrixError::io(format!("creating cache dir {}", cache_dir.display()), e))?;

        match source {
            CacheSource::Disk => Ok(Self::disk(&tool.cache_dir_var(), cache_dir)),
            CacheSource::Memory => {
                let exported = engine.export_cache(tool, cache_dir).await?;
                debug!(
                    "Exported {} cache entries from {}",
                    exported.lines().filter(|l| !l.trim().is_empty()).count(),
                    cache_dir.display()
                );

                let scratch = scratch_dir(cache_dir);
                if fs::try_exists(&scratch).await.unwrap_or(false) {
                    fs::remove_dir_all(&scratch)
                        .await
                        .map_err(|e| MatrixError::io(format!("clearing {}", scratch.display()), e))?;
                }
                fs::create_dir_all(&scratch)
                    .await
                    .map_err(|e| MatrixError::io(format!("creating {}", scratch.display()), e))?;

                let env = BTreeMap::from([
                    (tool.cache_dir_var(), scratch.to_string_lossy().to_string()),
                    (tool.memory_cache_var(), exported),
                ]);
                Ok(Self {
                    env,
                    cache_dir: cache_dir.to_path_buf(),
                    scratch: Some(scratch),
                })
            }
        }
    }

    /// Variables to add to the build environment
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Directory the tool writes to during the build
    pub fn effective_dir(&self) -> &Path {
        self.scratch.as_deref().unwrap_or(&self.cache_dir)
    }

    /// Copy entries the tool wrote into the scratch dir back to the cache.
    ///
    /// Returns the number of entries copied; always zero for disk mode.
    pub async fn absorb(&self) -> MatrixResult<usize> {
        let Some(scratch) = &self.scratch else {
            return Ok(0);
        };

        let mut copied = 0;
        let mut pending = vec![scratch.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| MatrixError::io(format!("reading {}", dir.display()), e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| MatrixError::io(format!("reading {}", dir.display()), e))?
            {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let is_entry = path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION);
                if let (true, Some(name)) = (is_entry, path.file_name()) {
                    let target = self.cache_dir.join(name);
                    fs::copy(&path, &target)
                        .await
                        .map_err(|e| MatrixError::io(format!("copying {}", path.display()), e))?;
                    copied += 1;
                }
            }
        }

        debug!("Absorbed {} cache entries into {}", copied, self.cache_dir.display());
        Ok(copied)
    }
}

/// Sibling of the cache dir used as the tool's scratch space
pub fn scratch_dir(cache_dir: &Path) -> PathBuf {
    let mut name = cache_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push("-scratch");
    cache_dir.with_file_name(name)
}
