//! Precompiled header management.
//!
//! A project's configured headers are gathered into one generated
//! "superheader" per language (C++ and C); the compiler turns each into a
//! precompiled artifact that every unit of that language force-includes.

use crate::error::BuildError;
use crate::project::{Language, Project};
use crate::staleness::StalenessOracle;
use crate::toolchain::CommandLine;
use std::fs;
use std::path::{Path, PathBuf};

/// A superheader that has to be precompiled before the project's units run.
#[derive(Debug, Clone)]
pub struct PchTask {
    pub language: Language,
    pub superheader: PathBuf,
    pub artifact: PathBuf,
    pub command: CommandLine,
}

/// Superheaders force-included into the project's units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Superheaders {
    pub cpp: Option<PathBuf>,
    pub c: Option<PathBuf>,
}

impl Superheaders {
    pub fn for_language(&self, language: Language) -> Option<&Path> {
        if language.is_cpp_class() {
            self.cpp.as_deref()
        } else {
            self.c.as_deref()
        }
    }
}

pub fn superheader_path(project: &Project, cpp: bool) -> PathBuf {
    let (kind, ext) = if cpp { ("cpp", "hpp") } else { ("c", "h") };
    project.cache_dir.join(format!(
        "{}_{}_precompiled_headers_{}.{}",
        project.output_stem(),
        kind,
        project.key.target,
        ext
    ))
}

/// Content of a superheader. The C++ variant pulls the C headers in with C
/// linkage.
pub fn superheader_text(cpp_headers: &[PathBuf], c_headers: &[PathBuf], cpp: bool) -> String {
    let include = |h: &PathBuf| format!("#include \"{}\"\n", h.display().to_string().replace('\\', "/"));
    let mut text = String::from("// Automatically generated file, do not edit.\n");
    if cpp {
        for header in cpp_headers {
            text.push_str(&include(header));
        }
        if !c_headers.is_empty() {
            text.push_str("extern \"C\"\n{\n");
            for header in c_headers {
                text.push_str(&include(header));
            }
            text.push_str("}\n");
        }
    } else {
        for header in c_headers {
            text.push_str(&include(header));
        }
    }
    text
}

/// Write `text` to `path` unless it already holds exactly that. Returns
/// whether the file changed.
fn write_if_changed(path: &Path, text: &str) -> Result<bool, BuildError> {
    if fs::read_to_string(path).ok().as_deref() == Some(text) {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildError::io("failed to create", parent, e))?;
    }
    fs::write(path, text).map_err(|e| BuildError::io("failed to write", path, e))?;
    Ok(true)
}

pub struct PrecompileManager<'a> {
    project: &'a Project,
    oracle: &'a StalenessOracle<'a>,
}

impl<'a> PrecompileManager<'a> {
    pub fn new(project: &'a Project, oracle: &'a StalenessOracle<'a>) -> Self {
        Self { project, oracle }
    }

    fn headers(&self, list: &[PathBuf]) -> Vec<PathBuf> {
        list.iter()
            .filter(|h| !self.project.precompile.exclude.contains(h))
            .cloned()
            .collect()
    }

    /// Write the superheaders this project needs and list the ones whose
    /// artifact must be rebuilt.
    pub fn prepare(&self) -> Result<(Superheaders, Vec<PchTask>), BuildError> {
        let project = self.project;
        let mut headers = Superheaders::default();
        let mut tasks = Vec::new();
        if project.precompile.is_empty() {
            return Ok((headers, tasks));
        }

        let cpp_headers = self.headers(&project.precompile.cpp_headers);
        let c_headers = self.headers(&project.precompile.c_headers);
        let languages = |cpp: bool| {
            project
                .sources
                .iter()
                .filter_map(|s| Language::from_path(s))
                .any(|l| l.is_cpp_class() == cpp)
        };

        for cpp in [true, false] {
            let wanted = if cpp {
                !(cpp_headers.is_empty() && c_headers.is_empty())
            } else {
                !c_headers.is_empty()
            };
            if !wanted || !languages(cpp) {
                continue;
            }
            let language = if cpp { Language::Cpp } else { Language::C };
            let superheader = superheader_path(project, cpp);
            let rewritten =
                write_if_changed(&superheader, &superheader_text(&cpp_headers, &c_headers, cpp))?;

            let compiler = project.toolchain.compiler();
            let artifact = compiler.precompiled_artifact(&superheader);
            let members: Vec<PathBuf> = if cpp {
                cpp_headers.iter().chain(&c_headers).cloned().collect()
            } else {
                c_headers.clone()
            };
            if rewritten || self.oracle.precompiled_is_stale(&members, &artifact) {
                tracing::info!(
                    "{}: precompiling {}",
                    project.key,
                    superheader.display()
                );
                let base = compiler.base_command(project, language);
                let command =
                    compiler.precompile_command(&base, project, language, &superheader, &artifact);
                tasks.push(PchTask {
                    language,
                    superheader: superheader.clone(),
                    artifact,
                    command,
                });
            }
            if cpp {
                headers.cpp = Some(superheader);
            } else {
                headers.c = Some(superheader);
            }
        }
        Ok((headers, tasks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BuildCache;
    use crate::headers::HeaderGraph;
    use crate::project::ProjectType;
    use crate::project::testing::project;
    use tempfile::TempDir;

    #[test]
    fn test_superheader_text_wraps_c_headers() {
        let text = superheader_text(&["/w/a.hpp".into()], &["/w/b.h".into()], true);
        assert!(text.contains("#include \"/w/a.hpp\"\nextern \"C\"\n{\n#include \"/w/b.h\"\n}\n"));
        let c_only = superheader_text(&["/w/a.hpp".into()], &["/w/b.h".into()], false);
        assert!(!c_only.contains("a.hpp"));
        assert!(!c_only.contains("extern"));
    }

    #[test]
    fn test_superheader_path() {
        let p = project("core", ProjectType::Static, Path::new("/w"));
        let path = superheader_path(&p, true);
        assert_eq!(
            path.file_name().unwrap(),
            "core_cpp_precompiled_headers_debug.hpp"
        );
        assert!(path.starts_with(&p.cache_dir));
    }

    #[test]
    fn test_prepare_then_reuse() {
        let tmp = TempDir::new().unwrap();
        let mut p = project("app", ProjectType::Application, tmp.path());
        let pch = tmp.path().join("pch.hpp");
        let skip = tmp.path().join("skip.hpp");
        fs::write(&pch, "#pragma once\n").unwrap();
        fs::write(&skip, "").unwrap();
        p.sources = vec![tmp.path().join("main.cpp")];
        p.precompile.cpp_headers = vec![pch.clone(), skip.clone()];
        p.precompile.exclude = vec![skip];

        let cache = BuildCache::new();
        let graph = HeaderGraph::new();
        let oracle = StalenessOracle::new(&p, &cache, &graph, false);
        let (headers, tasks) = PrecompileManager::new(&p, &oracle).prepare().unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(headers.c.is_none());
        let superheader = headers.for_language(Language::Cpp).unwrap();
        let text = fs::read_to_string(superheader).unwrap();
        assert!(!text.contains("skip.hpp"));
        assert!(tasks[0].command.args.iter().any(|a| a == "c++-header"));

        // Once the artifact exists and is newer than the headers, nothing runs.
        fs::write(&tasks[0].artifact, b"pch").unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&tasks[0].artifact)
            .unwrap()
            .set_modified(later)
            .unwrap();
        let cache = BuildCache::new();
        let oracle = StalenessOracle::new(&p, &cache, &graph, false);
        let (_, tasks) = PrecompileManager::new(&p, &oracle).prepare().unwrap();
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_no_headers_no_work() {
        let p = project("app", ProjectType::Application, Path::new("/w"));
        let cache = BuildCache::new();
        let graph = HeaderGraph::new();
        let oracle = StalenessOracle::new(&p, &cache, &graph, false);
        let (headers, tasks) = PrecompileManager::new(&p, &oracle).prepare().unwrap();
        assert_eq!(headers, Superheaders::default());
        assert!(tasks.is_empty());
    }
}
