//! Recompilation decisions.
//!
//! [`StalenessOracle::check`] applies, first match wins:
//!
//! 1. recompile-all (base command changed or rebuild forced)
//! 2. the object file is missing
//! 3. the source is newer than the object *and* its normalized content hash
//!    differs from the stored one
//! 4. some transitively included header is newer than the object *and* its
//!    content changed. Headers force-included through the precompiled
//!    superheader count as included by every unit of their language.
//!
//! A source that is newer but hashes the same is only a touch and falls
//! through to the header check.

use crate::cache::BuildCache;
use crate::headers::{HeaderGraph, HeaderScope};
use crate::project::{Language, Project};
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

static COMMENTS_AND_LITERALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?ms)//[^\n]*$|/\*.*?\*/|'(?:\\.|[^\\'])*'|"(?:\\.|[^\\"])*""#)
        .expect("valid regex")
});

/// Strip comments and layout-only whitespace, keeping string and character
/// literals intact.
pub fn normalize_source(text: &str) -> String {
    let stripped = COMMENTS_AND_LITERALS.replace_all(text, |caps: &Captures| {
        let m = &caps[0];
        if m.starts_with('/') {
            " ".to_string()
        } else {
            m.to_string()
        }
    });
    let mut out = String::with_capacity(stripped.len());
    for line in stripped.lines() {
        let line = line.trim();
        if !line.is_empty() {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    RecompileAll,
    MissingObject,
    SourceChanged,
    HeaderChanged,
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StaleReason::RecompileAll => "full rebuild",
            StaleReason::MissingObject => "no object file",
            StaleReason::SourceChanged => "source changed",
            StaleReason::HeaderChanged => "header changed",
        };
        f.write_str(s)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

pub struct StalenessOracle<'a> {
    project: &'a Project,
    cache: &'a BuildCache,
    headers: &'a HeaderGraph,
    recompile_all: bool,
}

impl<'a> StalenessOracle<'a> {
    pub fn new(
        project: &'a Project,
        cache: &'a BuildCache,
        headers: &'a HeaderGraph,
        recompile_all: bool,
    ) -> Self {
        Self {
            project,
            cache,
            headers,
            recompile_all,
        }
    }

    pub fn should_recompile(&self, source: &Path) -> bool {
        self.check(source, &self.project.object_path(source)).is_some()
    }

    /// Why `source` must be rebuilt into `object`, or `None` if it is current.
    pub fn check(&self, source: &Path, object: &Path) -> Option<StaleReason> {
        if self.recompile_all {
            return Some(StaleReason::RecompileAll);
        }
        let Some(object_time) = modified(object) else {
            return Some(StaleReason::MissingObject);
        };
        let store = &self.project.cache_dir;

        let source_newer = self
            .cache
            .mtime(source)
            .is_none_or(|t| t > object_time);
        if source_newer && self.cache.has_changed(store, source) {
            return Some(StaleReason::SourceChanged);
        }

        let headers = self.included_headers(source);
        let changed_header = headers.iter().any(|header| {
            self.cache.mtime(header).is_some_and(|t| t > object_time)
                && self.cache.has_changed(store, header)
        });
        if changed_header {
            return Some(StaleReason::HeaderChanged);
        }
        None
    }

    /// Configured precompiled headers that units of `source`'s language
    /// force-include.
    fn precompiled_headers(&self, source: &Path) -> Vec<PathBuf> {
        let pch = &self.project.precompile;
        let Some(language) = Language::from_path(source) else {
            return Vec::new();
        };
        let configured: Vec<&PathBuf> = if language.is_cpp_class() {
            pch.cpp_headers.iter().chain(&pch.c_headers).collect()
        } else {
            pch.c_headers.iter().collect()
        };
        configured
            .into_iter()
            .filter(|h| !pch.exclude.contains(h))
            .cloned()
            .collect()
    }

    /// Every header `source` depends on: its own transitive includes plus the
    /// precompiled headers and what they include.
    pub fn included_headers(&self, source: &Path) -> BTreeSet<PathBuf> {
        let scope = HeaderScope::for_project(self.project);
        let mut headers: BTreeSet<PathBuf> =
            self.headers.resolve_headers(source, &scope).iter().cloned().collect();
        for pch in self.precompiled_headers(source) {
            headers.extend(self.headers.resolve_headers(&pch, &scope).iter().cloned());
            headers.insert(pch);
        }
        headers
    }

    /// Precompiled headers are judged on timestamps alone: any header newer
    /// than the artifact, or a missing artifact, means rebuild.
    pub fn precompiled_is_stale(&self, headers: &[PathBuf], artifact: &Path) -> bool {
        if self.recompile_all {
            return true;
        }
        let Some(artifact_time) = modified(artifact) else {
            return true;
        };
        let scope = HeaderScope::for_project(self.project);
        headers.iter().any(|h| {
            self.cache.mtime(h).is_none_or(|t| t > artifact_time)
                || self
                    .headers
                    .resolve_headers(h, &scope)
                    .iter()
                    .any(|inc| self.cache.mtime(inc).is_some_and(|t| t > artifact_time))
        })
    }

    /// Persist content hashes of `sources` and every header they include.
    /// Returns how many hash files were written.
    pub fn persist_hashes(&self, sources: &[PathBuf]) -> io::Result<usize> {
        let store = &self.project.cache_dir;
        let mut written = 0;
        let mut seen = std::collections::HashSet::new();
        for source in sources {
            if seen.insert(source.clone()) && self.cache.persist_hash(store, source)? {
                written += 1;
            }
            for header in self.included_headers(source) {
                if seen.insert(header.clone()) && self.cache.persist_hash(store, &header)? {
                    written += 1;
                }
            }
        }
        Ok(written)
    }
}
