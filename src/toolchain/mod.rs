//! Toolchain capabilities and discovery.
//!
//! The build core only talks to a toolchain through the narrow [`Compiler`]
//! and [`Linker`] capabilities. Which implementation backs them is decided
//! once, when a project is set up, by the [`Toolchain`] variant it carries.

mod gcc;
mod msvc;
pub mod types;

pub use gcc::GccToolchain;
pub use msvc::MsvcToolchain;
pub use types::{CommandLine, CompilerType, ToolchainError, path_arg};

use crate::diagnostic::Diagnostic;
use crate::project::{Language, Project, ProjectType};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

pub trait Compiler: Send + Sync {
    /// Command prefix shared by every translation unit of `project` in `language`.
    fn base_command(&self, project: &Project, language: Language) -> CommandLine;

    /// Complete compile command for one input.
    fn extended_command(
        &self,
        base: &CommandLine,
        project: &Project,
        force_include: Option<&Path>,
        output: &Path,
        input: &Path,
    ) -> CommandLine;

    /// Command that turns a superheader into a precompiled header artifact.
    fn precompile_command(
        &self,
        base: &CommandLine,
        project: &Project,
        language: Language,
        input: &Path,
        output: &Path,
    ) -> CommandLine;

    /// Where the precompiled artifact for `superheader` is written.
    fn precompiled_artifact(&self, superheader: &Path) -> PathBuf;

    fn object_extension(&self) -> &str;

    fn parse_output(&self, text: &str) -> Vec<Diagnostic>;

    /// Exit code the compiler reports when it was interrupted.
    fn interrupt_exit_code(&self) -> Option<i32> {
        None
    }
}

pub trait Linker: Send + Sync {
    fn link_command(&self, project: &Project, output: &Path, objects: &[PathBuf]) -> CommandLine;

    fn find_library(
        &self,
        project: &Project,
        name: &str,
        search_dirs: &[PathBuf],
        force_static: bool,
        force_shared: bool,
    ) -> Option<PathBuf>;

    fn default_output_extension(&self, project_type: ProjectType) -> &str;

    fn output_file_name(&self, stem: &str, project_type: ProjectType) -> String {
        format!("{}{}", stem, self.default_output_extension(project_type))
    }

    fn parse_output(&self, text: &str) -> Vec<Diagnostic>;
}

/// The toolchain backing a project.
#[derive(Clone)]
pub enum Toolchain {
    Gcc(Arc<GccToolchain>),
    Msvc(Arc<MsvcToolchain>),
    /// Externally supplied back end (cross toolchains, test doubles).
    Custom {
        name: String,
        compiler: Arc<dyn Compiler>,
        linker: Arc<dyn Linker>,
    },
}

impl Toolchain {
    pub fn custom<T>(name: &str, backend: Arc<T>) -> Self
    where
        T: Compiler + Linker + 'static,
    {
        Toolchain::Custom {
            name: name.to_string(),
            compiler: backend.clone(),
            linker: backend,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Toolchain::Gcc(tc) => tc.compiler_type.name(),
            Toolchain::Msvc(_) => "msvc",
            Toolchain::Custom { name, .. } => name,
        }
    }

    pub fn compiler(&self) -> &dyn Compiler {
        match self {
            Toolchain::Gcc(tc) => tc.as_ref(),
            Toolchain::Msvc(tc) => tc.as_ref(),
            Toolchain::Custom { compiler, .. } => compiler.as_ref(),
        }
    }

    pub fn linker(&self) -> &dyn Linker {
        match self {
            Toolchain::Gcc(tc) => tc.as_ref(),
            Toolchain::Msvc(tc) => tc.as_ref(),
            Toolchain::Custom { linker, .. } => linker.as_ref(),
        }
    }

    /// Stable identity used in the base command fingerprint.
    pub fn fingerprint(&self) -> String {
        match self {
            Toolchain::Gcc(tc) => format!("{} {}", tc.cxx.display(), tc.version),
            Toolchain::Msvc(tc) => format!("{} {}", tc.cl.display(), tc.version),
            Toolchain::Custom { name, .. } => name.clone(),
        }
    }
}

impl fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Toolchain::Gcc(tc) => f.debug_tuple("Gcc").field(tc).finish(),
            Toolchain::Msvc(tc) => f.debug_tuple("Msvc").field(tc).finish(),
            Toolchain::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
        }
    }
}

/// Locate the executables of a compiler family on this machine.
///
/// `CC`, `CXX` and `AR` override the GNU-style lookups.
pub fn detect(kind: CompilerType) -> Result<Toolchain, ToolchainError> {
    match kind {
        CompilerType::Gcc | CompilerType::Clang => {
            let (cc_name, cxx_name, ar_names): (&str, &str, &[&str]) = if kind == CompilerType::Gcc
            {
                ("gcc", "g++", &["gcc-ar", "ar"])
            } else {
                ("clang", "clang++", &["llvm-ar", "ar"])
            };

            let cxx = env_tool("CXX")
                .or_else(|| find_executable(cxx_name))
                .ok_or_else(|| {
                    ToolchainError::NotFound(format!("{} is not installed or not on PATH", cxx_name))
                })?;
            let cc = env_tool("CC")
                .or_else(|| find_executable(cc_name))
                .unwrap_or_else(|| cxx.clone());
            let ar = env_tool("AR")
                .or_else(|| ar_names.iter().find_map(|n| find_executable(n)))
                .ok_or_else(|| ToolchainError::NotFound("no archiver (ar) found".to_string()))?;
            let version = tool_version(&cxx, "--version");

            tracing::info!("using {} toolchain: {} ({})", kind, cxx.display(), version);
            Ok(Toolchain::Gcc(Arc::new(GccToolchain::new(
                kind, cc, cxx, ar, version,
            ))))
        }
        CompilerType::Msvc => {
            let cl = find_executable("cl").ok_or_else(|| {
                ToolchainError::NotFound(
                    "cl.exe not found; run from a Visual Studio developer prompt".to_string(),
                )
            })?;
            let link = find_executable("link").unwrap_or_else(|| PathBuf::from("link.exe"));
            let lib = find_executable("lib").unwrap_or_else(|| PathBuf::from("lib.exe"));
            let version = tool_version(&cl, "/?");
            Ok(Toolchain::Msvc(Arc::new(MsvcToolchain::new(
                cl, link, lib, version,
            ))))
        }
    }
}

/// Resolve a toolchain by its manifest/CLI name.
pub fn detect_by_name(name: &str) -> Result<Toolchain, ToolchainError> {
    let kind = CompilerType::parse(name).ok_or_else(|| ToolchainError::Unknown(name.to_string()))?;
    detect(kind)
}

fn env_tool(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Look a command up on PATH with `which` (or `where` on Windows).
pub fn find_executable(cmd: &str) -> Option<PathBuf> {
    let finder = if cfg!(windows) { "where" } else { "which" };
    let output = Command::new(finder).arg(cmd).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|l| PathBuf::from(l.trim()))
        .filter(|p| !p.as_os_str().is_empty())
}

fn tool_version(path: &Path, flag: &str) -> String {
    Command::new(path)
        .arg(flag)
        .output()
        .map(|o| {
            let text = if o.stdout.is_empty() { o.stderr } else { o.stdout };
            String::from_utf8_lossy(&text)
                .lines()
                .next()
                .unwrap_or("unknown")
                .trim()
                .to_string()
        })
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_toolchain_name() {
        let err = detect_by_name("borland").unwrap_err();
        assert!(matches!(err, ToolchainError::Unknown(_)));
    }

    #[test]
    fn test_toolchain_names() {
        let gcc = Toolchain::Gcc(Arc::new(GccToolchain::new(
            CompilerType::Clang,
            "clang".into(),
            "clang++".into(),
            "ar".into(),
            "18".into(),
        )));
        assert_eq!(gcc.name(), "clang");
        assert_eq!(gcc.compiler().object_extension(), ".o");
        assert!(gcc.fingerprint().contains("clang++"));
    }
}
