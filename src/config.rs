//! `ccf.toml` manifest.

use crate::error::ConfigError;
use crate::project::{ChunkSettings, LinkScope, ProjectType, Settings};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_NAME: &str = "ccf.toml";

#[derive(Deserialize, Debug, Default)]
pub struct Manifest {
    #[serde(default)]
    pub build: BuildDefaults,
    /// Settings merged into every project built for that target.
    #[serde(default)]
    pub targets: BTreeMap<String, Settings>,
    #[serde(default, rename = "project")]
    pub projects: Vec<ProjectConfig>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct BuildDefaults {
    pub jobs: usize,
    pub link_jobs: usize,
    pub stop_on_error: bool,
    pub header_recursion_depth: usize,
    pub ignore_external_headers: bool,
    pub toolchain: Option<String>,
    pub targets: Vec<String>,
    pub archs: Vec<String>,
    pub c_standard: Option<String>,
    pub cxx_standard: Option<String>,
    #[serde(flatten)]
    pub chunking: ChunkConfig,
    #[serde(flatten)]
    pub settings: Settings,
}

/// Chunking overrides. Setting `chunk_size` clears `chunk_filesize` and the
/// other way round.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct ChunkConfig {
    pub chunk_size: Option<usize>,
    pub chunk_filesize: Option<u64>,
    pub chunk_tolerance: Option<usize>,
    pub chunk_size_tolerance: Option<u64>,
    pub use_chunks: Option<bool>,
    pub unity: Option<bool>,
}

impl ChunkConfig {
    pub fn apply(&self, to: &mut ChunkSettings) {
        if let Some(n) = self.chunk_size {
            to.chunk_size = n;
            to.chunk_filesize = 0;
        }
        if let Some(bytes) = self.chunk_filesize {
            to.chunk_filesize = bytes;
            to.chunk_size = 0;
        }
        if let Some(n) = self.chunk_tolerance {
            to.chunk_tolerance = n;
        }
        if let Some(bytes) = self.chunk_size_tolerance {
            to.chunk_size_tolerance = bytes;
        }
        if let Some(on) = self.use_chunks {
            to.use_chunks = on;
        }
        if let Some(on) = self.unity {
            to.unity = on;
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    #[default]
    Link,
    Source,
}

fn default_scope() -> Vec<LinkScope> {
    vec![LinkScope::Final]
}

/// `"name"` or `{ name = "...", scope = [...], kind = "..." }`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum DependencySpec {
    Name(String),
    Detailed {
        name: String,
        #[serde(default = "default_scope")]
        scope: Vec<LinkScope>,
        #[serde(default)]
        kind: DependencyKind,
    },
}

impl DependencySpec {
    pub fn name(&self) -> &str {
        match self {
            DependencySpec::Name(name) | DependencySpec::Detailed { name, .. } => name,
        }
    }

    pub fn kind(&self) -> DependencyKind {
        match self {
            DependencySpec::Name(_) => DependencyKind::Link,
            DependencySpec::Detailed { kind, .. } => *kind,
        }
    }

    pub fn scopes(&self) -> Vec<LinkScope> {
        match self {
            DependencySpec::Name(_) => default_scope(),
            DependencySpec::Detailed { scope, .. } => scope.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct ScopeConfig {
    pub intermediate: Settings,
    #[serde(rename = "final")]
    pub final_scope: Settings,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub dir: Option<PathBuf>,
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    pub output: Option<String>,
    pub priority: i32,
    pub ignore_dependency_ordering: bool,
    pub depends: Vec<DependencySpec>,
    pub sources: Vec<PathBuf>,
    pub exclude_dirs: Vec<PathBuf>,
    pub exclude_files: Vec<PathBuf>,
    pub extra_objects: Vec<PathBuf>,
    pub precompile: Vec<PathBuf>,
    pub precompile_c: Vec<PathBuf>,
    pub precompile_exclude: Vec<PathBuf>,
    pub no_chunk: Vec<String>,
    pub no_chunk_together: Vec<Vec<String>>,
    pub pre_build: Option<String>,
    pub pre_link: Option<String>,
    pub post_build: Option<String>,
    pub c_standard: Option<String>,
    pub cxx_standard: Option<String>,
    pub header_recursion_depth: Option<usize>,
    pub ignore_external_headers: Option<bool>,
    pub scope: ScopeConfig,
    pub targets: BTreeMap<String, Settings>,
    #[serde(flatten)]
    pub chunking: ChunkConfig,
    #[serde(flatten)]
    pub settings: Settings,
}

pub fn parse_manifest(text: &str, path: &Path) -> Result<Manifest, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    if !path.exists() {
        return Err(ConfigError::ManifestNotFound(path.to_path_buf()).into());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let manifest = parse_manifest(&text, path)?;
    if manifest.projects.is_empty() {
        tracing::warn!("{} declares no [[project]]", path.display());
    }
    Ok(manifest)
}
