//! GCC and Clang back end.

use super::types::{CommandLine, CompilerType, path_arg};
use super::{Compiler, Linker};
use crate::diagnostic::{Diagnostic, Severity};
use crate::project::{Language, Project, ProjectType};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static COMPILER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>(?:[A-Za-z]:)?[^:\n]+):(?P<line>\d+):(?:(?P<col>\d+):)?\s+(?P<sev>fatal error|error|warning|note):\s+(?P<msg>.*)$",
    )
    .expect("valid regex")
});

static LINKER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:.*[/\\])?(?:ld(?:\.\w+)?|collect2|ar|gcc-ar|llvm-ar)(?:\.exe)?:\s+(?:(?P<sev>error|warning):\s+)?(?P<msg>.*)$")
        .expect("valid regex")
});

#[derive(Debug, Clone)]
pub struct GccToolchain {
    pub compiler_type: CompilerType,
    pub cc: PathBuf,
    pub cxx: PathBuf,
    pub ar: PathBuf,
    pub version: String,
}

impl GccToolchain {
    pub fn new(
        compiler_type: CompilerType,
        cc: PathBuf,
        cxx: PathBuf,
        ar: PathBuf,
        version: String,
    ) -> Self {
        Self {
            compiler_type,
            cc,
            cxx,
            ar,
            version,
        }
    }

    fn system_library_dirs() -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = std::env::var_os("LIBRARY_PATH")
            .map(|v| std::env::split_paths(&v).collect())
            .unwrap_or_default();
        for dir in [
            "/usr/local/lib",
            "/usr/lib",
            "/lib",
            "/usr/lib64",
            "/lib64",
            "/usr/lib/x86_64-linux-gnu",
            "/usr/lib/aarch64-linux-gnu",
            "/opt/homebrew/lib",
        ] {
            dirs.push(PathBuf::from(dir));
        }
        dirs
    }
}

/// Extra machine flags for an architecture name.
fn arch_flags(arch: &str) -> &'static [&'static str] {
    match arch {
        "x86" | "i386" | "i686" => &["-m32"],
        "x64" | "x86_64" | "amd64" => &["-m64"],
        _ => &[],
    }
}

/// Normalize a language standard into a `-std=` flag.
pub fn std_flag(edition: &str) -> String {
    let lowered = edition.to_lowercase();
    let edition = lowered.strip_prefix("-std=").unwrap_or(&lowered);
    let canonical = match edition {
        "c90" => "c89",
        "c18" => "c17",
        "c2x" => "c23",
        "c++98" => "c++03",
        "c++0x" => "c++11",
        "c++1y" => "c++14",
        "c++1z" => "c++17",
        "c++2a" => "c++20",
        "c++2b" => "c++23",
        "c++2c" => "c++26",
        "gnu++0x" => "gnu++11",
        "gnu++1z" => "gnu++17",
        "gnu++2a" => "gnu++20",
        other => other,
    };
    format!("-std={}", canonical)
}

fn uses_cpp_driver(project: &Project) -> bool {
    project
        .sources
        .iter()
        .filter_map(|s| Language::from_path(s))
        .any(Language::is_cpp_class)
}

impl Compiler for GccToolchain {
    fn base_command(&self, project: &Project, language: Language) -> CommandLine {
        let settings = &project.settings.direct;
        let program = if language.is_cpp_class() {
            &self.cxx
        } else {
            &self.cc
        };
        let mut cmd = CommandLine::new(program).arg("-fdiagnostics-color=never");
        cmd = cmd.args(arch_flags(&project.key.arch).iter().copied());
        if project.project_type == ProjectType::Shared {
            cmd.push("-fPIC");
        }
        let standard = if language.is_cpp_class() {
            project.cxx_standard.as_deref()
        } else {
            project.c_standard.as_deref()
        };
        if let Some(std) = standard {
            cmd.push(std_flag(std));
        }
        cmd = cmd.args(settings.cflags.iter().cloned());
        if language.is_cpp_class() {
            cmd = cmd.args(settings.cxxflags.iter().cloned());
        }
        for define in &settings.defines {
            cmd.push(format!("-D{}", define));
        }
        for undefine in &settings.undefines {
            cmd.push(format!("-U{}", undefine));
        }
        for dir in &settings.include_dirs {
            cmd.push(format!("-I{}", dir.display()));
        }
        cmd
    }

    fn extended_command(
        &self,
        base: &CommandLine,
        _project: &Project,
        force_include: Option<&Path>,
        output: &Path,
        input: &Path,
    ) -> CommandLine {
        let mut cmd = base.clone();
        if let Some(header) = force_include {
            cmd = cmd.arg("-include").arg(path_arg(header));
        }
        cmd.arg("-c")
            .arg(path_arg(input))
            .arg("-o")
            .arg(path_arg(output))
    }

    fn precompile_command(
        &self,
        base: &CommandLine,
        _project: &Project,
        language: Language,
        input: &Path,
        output: &Path,
    ) -> CommandLine {
        let kind = if language.is_cpp_class() {
            "c++-header"
        } else {
            "c-header"
        };
        base.clone()
            .args(["-x", kind])
            .arg(path_arg(input))
            .arg("-o")
            .arg(path_arg(output))
    }

    fn precompiled_artifact(&self, superheader: &Path) -> PathBuf {
        let mut name = superheader.as_os_str().to_os_string();
        name.push(".gch");
        PathBuf::from(name)
    }

    fn object_extension(&self) -> &str {
        ".o"
    }

    fn parse_output(&self, text: &str) -> Vec<Diagnostic> {
        parse_gcc_output(text)
    }
}

/// Parse `file:line:col: severity: message` records, nesting notes under the
/// diagnostic they follow.
pub fn parse_gcc_output(text: &str) -> Vec<Diagnostic> {
    let mut out: Vec<Diagnostic> = Vec::new();
    for line in text.lines() {
        let Some(caps) = COMPILER_LINE.captures(line.trim_end()) else {
            continue;
        };
        let Some(severity) = Severity::parse(&caps["sev"]) else {
            continue;
        };
        let diag = Diagnostic::new(severity, caps["msg"].trim()).at(
            caps["file"].trim(),
            caps["line"].parse().ok(),
            caps.name("col").and_then(|c| c.as_str().parse().ok()),
        );
        match out.last_mut() {
            Some(parent) if severity == Severity::Note => parent.details.push(diag),
            _ => out.push(diag),
        }
    }
    out
}

impl Linker for GccToolchain {
    fn link_command(&self, project: &Project, output: &Path, objects: &[PathBuf]) -> CommandLine {
        if project.project_type == ProjectType::Static {
            return CommandLine::new(&self.ar)
                .arg("rcs")
                .arg(path_arg(output))
                .args(objects.iter().map(|o| path_arg(o)));
        }

        let settings = &project.settings.direct;
        let driver = if uses_cpp_driver(project) {
            &self.cxx
        } else {
            &self.cc
        };
        let mut cmd = CommandLine::new(driver)
            .args(objects.iter().map(|o| path_arg(o)))
            .arg("-o")
            .arg(path_arg(output))
            .args(arch_flags(&project.key.arch).iter().copied());
        if project.project_type == ProjectType::Shared {
            cmd.push("-shared");
        }
        for dir in &settings.library_dirs {
            cmd.push(format!("-L{}", dir.display()));
        }
        cmd = cmd.args(project.dependency_outputs.iter().map(|p| path_arg(p)));
        for lib in &settings.libraries {
            cmd.push(format!("-l{}", lib));
        }
        for lib in &settings.static_libraries {
            match project.resolved_libraries.get(lib) {
                Some(path) => cmd.push(path_arg(path)),
                None => cmd.push(format!("-l{}", lib)),
            }
        }
        for lib in &settings.shared_libraries {
            cmd.push(format!("-l{}", lib));
        }
        cmd.args(settings.link_flags.iter().cloned())
    }

    fn find_library(
        &self,
        _project: &Project,
        name: &str,
        search_dirs: &[PathBuf],
        force_static: bool,
        force_shared: bool,
    ) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.is_absolute() && direct.is_file() {
            return Some(direct.to_path_buf());
        }
        let mut candidates = Vec::new();
        if name.starts_with("lib") && name.contains('.') {
            candidates.push(name.to_string());
        }
        if !force_static {
            candidates.push(format!("lib{}.so", name));
            candidates.push(format!("lib{}.dylib", name));
        }
        if !force_shared {
            candidates.push(format!("lib{}.a", name));
        }

        search_dirs
            .iter()
            .cloned()
            .chain(Self::system_library_dirs())
            .find_map(|dir| {
                candidates
                    .iter()
                    .map(|c| dir.join(c))
                    .find(|p| p.is_file())
            })
    }

    fn default_output_extension(&self, project_type: ProjectType) -> &str {
        match project_type {
            ProjectType::Application => {
                if cfg!(windows) {
                    ".exe"
                } else {
                    ""
                }
            }
            ProjectType::Static => ".a",
            ProjectType::Shared => {
                if cfg!(target_os = "macos") {
                    ".dylib"
                } else if cfg!(windows) {
                    ".dll"
                } else {
                    ".so"
                }
            }
        }
    }

    fn output_file_name(&self, stem: &str, project_type: ProjectType) -> String {
        let ext = self.default_output_extension(project_type);
        if project_type.is_library() && !stem.starts_with("lib") {
            format!("lib{}{}", stem, ext)
        } else {
            format!("{}{}", stem, ext)
        }
    }

    fn parse_output(&self, text: &str) -> Vec<Diagnostic> {
        let mut out = parse_gcc_output(text);
        for line in text.lines() {
            if COMPILER_LINE.is_match(line) {
                continue;
            }
            if let Some(caps) = LINKER_LINE.captures(line) {
                let severity = match caps.name("sev").map(|m| m.as_str()) {
                    Some("warning") => Severity::Warning,
                    _ => Severity::Error,
                };
                out.push(Diagnostic::new(severity, caps["msg"].trim()));
            } else if line.contains("undefined reference to") {
                out.push(Diagnostic::error(line.trim()));
            }
        }
        out
    }
}
