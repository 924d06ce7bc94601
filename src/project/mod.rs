//! Project model.
//!
//! A [`Project`] is one buildable unit instantiated for a single
//! (name, target, architecture, toolchain) combination. Everything except
//! [`Project::status`] is fixed once the graph has been finalized; the
//! status is shared between compile workers, the link consumer and the
//! reporting pass behind a per-project lock.

pub mod loader;
pub mod state;

use crate::toolchain::Toolchain;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub use state::{FileState, ProjectState, ProjectStatus};

/// Unique identity of a project within the active build graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProjectKey {
    pub name: String,
    pub target: String,
    pub arch: String,
    pub toolchain: String,
}

impl ProjectKey {
    pub fn new(name: &str, target: &str, arch: &str, toolchain: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            arch: arch.to_string(),
            toolchain: toolchain.to_string(),
        }
    }

    /// Key of the project called `name` in the same target/arch/toolchain slice.
    pub fn sibling(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}/{}/{}",
            self.name, self.target, self.arch, self.toolchain
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    #[default]
    #[serde(alias = "app", alias = "executable")]
    Application,
    #[serde(alias = "staticlib", alias = "lib")]
    Static,
    #[serde(alias = "sharedlib", alias = "dylib")]
    Shared,
}

impl ProjectType {
    pub fn is_library(self) -> bool {
        !matches!(self, ProjectType::Application)
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProjectType::Application => "application",
            ProjectType::Static => "static library",
            ProjectType::Shared => "shared library",
        };
        f.write_str(s)
    }
}

/// Which consumers a link dependency applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkScope {
    /// The declaring project links the dependency itself.
    #[serde(rename = "self")]
    Direct,
    /// Library consumers of the declaring project inherit the dependency.
    Intermediate,
    /// Application consumers of the declaring project inherit the dependency.
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    C,
    Cpp,
    ObjC,
    ObjCpp,
}

impl Language {
    pub fn from_path(path: &Path) -> Option<Language> {
        let ext = path.extension()?.to_str()?;
        match ext {
            "c" => Some(Language::C),
            "cc" | "cpp" | "cxx" | "c++" | "cp" | "C" => Some(Language::Cpp),
            "m" => Some(Language::ObjC),
            "mm" => Some(Language::ObjCpp),
            _ => None,
        }
    }

    /// C++ and Objective-C++ share one extension class; C and Objective-C the other.
    pub fn is_cpp_class(self) -> bool {
        matches!(self, Language::Cpp | Language::ObjCpp)
    }

    pub fn is_objective(self) -> bool {
        matches!(self, Language::ObjC | Language::ObjCpp)
    }
}

pub fn is_header(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("h" | "hh" | "hpp" | "hxx" | "h++" | "inl" | "ipp" | "tpp")
    )
}

/// Compiler/linker inputs. Lists merge by appending entries not yet present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub include_dirs: Vec<PathBuf>,
    pub library_dirs: Vec<PathBuf>,
    pub libraries: Vec<String>,
    pub static_libraries: Vec<String>,
    pub shared_libraries: Vec<String>,
    pub defines: Vec<String>,
    pub undefines: Vec<String>,
    pub cflags: Vec<String>,
    pub cxxflags: Vec<String>,
    pub link_flags: Vec<String>,
}

fn extend_unique<T: PartialEq + Clone>(into: &mut Vec<T>, from: &[T]) {
    for item in from {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

impl Settings {
    pub fn merge(&mut self, other: &Settings) {
        extend_unique(&mut self.include_dirs, &other.include_dirs);
        extend_unique(&mut self.library_dirs, &other.library_dirs);
        extend_unique(&mut self.libraries, &other.libraries);
        extend_unique(&mut self.static_libraries, &other.static_libraries);
        extend_unique(&mut self.shared_libraries, &other.shared_libraries);
        extend_unique(&mut self.defines, &other.defines);
        extend_unique(&mut self.undefines, &other.undefines);
        extend_unique(&mut self.cflags, &other.cflags);
        extend_unique(&mut self.cxxflags, &other.cxxflags);
        extend_unique(&mut self.link_flags, &other.link_flags);
    }

    /// Anchor relative include/library directories at `base`.
    pub fn anchor(&mut self, base: &Path) {
        for dir in self
            .include_dirs
            .iter_mut()
            .chain(self.library_dirs.iter_mut())
        {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
}

/// The three parallel settings variants of a project: what it compiles and
/// links with itself, and what it hands to library and application consumers.
#[derive(Debug, Clone, Default)]
pub struct ScopedSettings {
    pub direct: Settings,
    pub intermediate: Settings,
    pub final_scope: Settings,
}

impl ScopedSettings {
    pub fn exported_to(&self, consumer: ProjectType) -> &Settings {
        if consumer == ProjectType::Application {
            &self.final_scope
        } else {
            &self.intermediate
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSettings {
    pub use_chunks: bool,
    pub unity: bool,
    /// Files per chunk; zero when chunking by size.
    pub chunk_size: usize,
    /// Bytes per chunk; zero when chunking by file count.
    pub chunk_filesize: u64,
    pub chunk_tolerance: usize,
    pub chunk_size_tolerance: u64,
    /// Paths or wildcard patterns (relative to the working directory) never chunked.
    pub no_chunk: Vec<String>,
    /// Groups of patterns whose matches may not share a chunk.
    pub no_chunk_together: Vec<Vec<String>>,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            use_chunks: true,
            unity: false,
            chunk_size: 0,
            chunk_filesize: 512_000,
            chunk_tolerance: 3,
            chunk_size_tolerance: 128_000,
            no_chunk: Vec::new(),
            no_chunk_together: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecompileSettings {
    pub cpp_headers: Vec<PathBuf>,
    pub c_headers: Vec<PathBuf>,
    pub exclude: Vec<PathBuf>,
}

impl PrecompileSettings {
    pub fn is_empty(&self) -> bool {
        self.cpp_headers.is_empty() && self.c_headers.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Steps {
    pub pre_build: Option<String>,
    pub pre_link: Option<String>,
    pub post_build: Option<String>,
}

#[derive(Debug)]
pub struct Project {
    pub key: ProjectKey,
    pub project_type: ProjectType,
    pub priority: i32,
    pub ignore_dependency_ordering: bool,
    pub working_dir: PathBuf,
    pub obj_dir: PathBuf,
    /// Hashes, fingerprints and generated files live here.
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
    /// File name of the output, extension included.
    pub output_name: String,
    pub sources: Vec<PathBuf>,
    pub headers: Vec<PathBuf>,
    pub extra_objects: Vec<PathBuf>,
    pub settings: ScopedSettings,
    pub link_depends: Vec<ProjectKey>,
    pub link_depends_intermediate: Vec<ProjectKey>,
    pub link_depends_final: Vec<ProjectKey>,
    pub src_depends: Vec<ProjectKey>,
    pub reconciled_link_depends: Vec<ProjectKey>,
    /// Outputs of reconciled library dependencies, handed to the linker.
    pub dependency_outputs: Vec<PathBuf>,
    /// Library name to the file `find_library` located for it.
    pub resolved_libraries: BTreeMap<String, PathBuf>,
    pub c_standard: Option<String>,
    pub cxx_standard: Option<String>,
    pub header_recursion_depth: usize,
    pub ignore_external_headers: bool,
    pub chunking: ChunkSettings,
    pub precompile: PrecompileSettings,
    pub steps: Steps,
    pub toolchain: Toolchain,
    /// Set when the manifest referenced something that does not exist.
    pub config_error: Option<String>,
    pub status: Mutex<ProjectStatus>,
}

impl Project {
    /// A project with default settings rooted at `working_dir`.
    pub fn new(
        key: ProjectKey,
        project_type: ProjectType,
        working_dir: impl Into<PathBuf>,
        toolchain: Toolchain,
    ) -> Self {
        let working_dir = working_dir.into();
        let obj_dir = working_dir
            .join(".ccf")
            .join("obj")
            .join(&key.target)
            .join(&key.arch)
            .join(&key.toolchain)
            .join(&key.name);
        let cache_dir = obj_dir.join(".ccf");
        let output_dir = working_dir.join("out").join(&key.target).join(&key.arch);
        let output_name = toolchain
            .linker()
            .output_file_name(&key.name, project_type);
        Self {
            key,
            project_type,
            priority: 0,
            ignore_dependency_ordering: false,
            working_dir,
            obj_dir,
            cache_dir,
            output_dir,
            output_name,
            sources: Vec::new(),
            headers: Vec::new(),
            extra_objects: Vec::new(),
            settings: ScopedSettings::default(),
            link_depends: Vec::new(),
            link_depends_intermediate: Vec::new(),
            link_depends_final: Vec::new(),
            src_depends: Vec::new(),
            reconciled_link_depends: Vec::new(),
            dependency_outputs: Vec::new(),
            resolved_libraries: BTreeMap::new(),
            c_standard: None,
            cxx_standard: None,
            header_recursion_depth: 0,
            ignore_external_headers: false,
            chunking: ChunkSettings::default(),
            precompile: PrecompileSettings::default(),
            steps: Steps::default(),
            toolchain,
            config_error: None,
            status: Mutex::new(ProjectStatus::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn is_application(&self) -> bool {
        self.project_type == ProjectType::Application
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_name)
    }

    /// Output name without directory, `lib` prefix or extension.
    pub fn output_stem(&self) -> String {
        let stem = Path::new(&self.output_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.output_name.clone());
        match stem.strip_prefix("lib") {
            Some(rest) if self.project_type.is_library() && !rest.is_empty() => rest.to_string(),
            _ => stem,
        }
    }

    /// Object file for a single source, mirroring its location under the
    /// working directory.
    pub fn object_path(&self, source: &Path) -> PathBuf {
        let ext = self.toolchain.compiler().object_extension();
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir = match source.strip_prefix(&self.working_dir) {
            Ok(rel) => rel
                .parent()
                .map(|p| self.obj_dir.join(p))
                .unwrap_or_else(|| self.obj_dir.clone()),
            Err(_) => self.obj_dir.join("external"),
        };
        dir.join(format!("{}{}", file_name, ext))
    }

    /// All link dependency edges, in declaration order and without duplicates.
    pub fn declared_link_depends(&self) -> Vec<ProjectKey> {
        let mut all = Vec::new();
        for key in self
            .link_depends
            .iter()
            .chain(&self.link_depends_intermediate)
            .chain(&self.link_depends_final)
        {
            if !all.contains(key) {
                all.push(key.clone());
            }
        }
        all
    }

    pub fn state(&self) -> ProjectState {
        self.status.lock().state()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::project;
    use super::*;

    #[test]
    fn test_key_display() {
        let key = ProjectKey::new("core", "release", "x64", "clang");
        assert_eq!(key.to_string(), "core@release/x64/clang");
        assert_eq!(key.sibling("util").to_string(), "util@release/x64/clang");
    }

    #[test]
    fn test_object_path_mirrors_tree() {
        let p = project("app", ProjectType::Application, Path::new("/w"));
        let obj = p.object_path(Path::new("/w/src/net/socket.cpp"));
        assert_eq!(
            obj,
            PathBuf::from("/w/.ccf/obj/debug/x64/gcc/app/src/net/socket.cpp.o")
        );
    }

    #[test]
    fn test_same_stem_different_extension_do_not_collide() {
        let p = project("app", ProjectType::Application, Path::new("/w"));
        assert_ne!(
            p.object_path(Path::new("/w/a.c")),
            p.object_path(Path::new("/w/a.cpp"))
        );
    }

    #[test]
    fn test_output_stem_strips_lib_prefix() {
        let p = project("core", ProjectType::Static, Path::new("/w"));
        assert_eq!(p.output_name, "libcore.a");
        assert_eq!(p.output_stem(), "core");
    }

    #[test]
    fn test_settings_merge_skips_duplicates() {
        let mut a = Settings {
            defines: vec!["A".into()],
            ..Default::default()
        };
        let b = Settings {
            defines: vec!["A".into(), "B".into()],
            include_dirs: vec!["inc".into()],
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.defines, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(a.include_dirs, vec![PathBuf::from("inc")]);
    }

    #[test]
    fn test_language_classes() {
        assert!(Language::from_path(Path::new("a.cc")).unwrap().is_cpp_class());
        assert!(!Language::from_path(Path::new("a.c")).unwrap().is_cpp_class());
        assert!(Language::from_path(Path::new("a.mm")).unwrap().is_objective());
        assert!(Language::from_path(Path::new("a.h")).is_none());
        assert!(is_header(Path::new("x.hpp")));
    }
}
