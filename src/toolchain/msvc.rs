//! Microsoft Visual C++ back end.

use super::types::{CommandLine, path_arg};
use super::{Compiler, Linker};
use crate::diagnostic::{Diagnostic, Severity};
use crate::project::{Language, Project, ProjectType};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static CL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>.+?)\((?P<line>\d+)(?:,(?P<col>\d+))?\)\s*:\s*(?P<sev>fatal error|error|warning|note)\s*(?:[A-Z]+\d+)?\s*:\s*(?P<msg>.*)$",
    )
    .expect("valid regex")
});

static LINK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<file>.*?)\s*:\s*(?:fatal\s+)?(?P<sev>error|warning)\s+(?P<code>LNK\d+)\s*:\s*(?P<msg>.*)$")
        .expect("valid regex")
});

/// Exit status cl.exe reports after Ctrl+C (STATUS_CONTROL_C_EXIT).
const CONTROL_C_EXIT: i32 = -1073741510;

#[derive(Debug, Clone)]
pub struct MsvcToolchain {
    pub cl: PathBuf,
    pub link: PathBuf,
    pub lib: PathBuf,
    pub version: String,
}

impl MsvcToolchain {
    pub fn new(cl: PathBuf, link: PathBuf, lib: PathBuf, version: String) -> Self {
        Self {
            cl,
            link,
            lib,
            version,
        }
    }
}

/// Map a language standard onto the closest `/std:` switch cl.exe accepts.
pub fn std_flag(edition: &str) -> String {
    if edition.starts_with("/std:") {
        return edition.to_string();
    }
    let lowered = edition.to_lowercase();
    let is_c = !lowered.contains("++");
    let number = lowered.trim_start_matches(|c: char| !c.is_ascii_digit());
    let value = match (is_c, number) {
        (true, "17" | "18") => "c17",
        (true, "23" | "2x") => "clatest",
        (true, _) => "c11",
        (false, "98" | "03" | "0x" | "11" | "14" | "1y") => "c++14",
        (false, "17" | "1z") => "c++17",
        (false, "20" | "2a") => "c++20",
        (false, _) => "c++latest",
    };
    format!("/std:{}", value)
}

impl Compiler for MsvcToolchain {
    fn base_command(&self, project: &Project, language: Language) -> CommandLine {
        let settings = &project.settings.direct;
        let mut cmd = CommandLine::new(&self.cl).arg("/nologo");
        let standard = if language.is_cpp_class() {
            cmd.push("/EHsc");
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
            cmd.push(format!("/D{}", define));
        }
        for undefine in &settings.undefines {
            cmd.push(format!("/U{}", undefine));
        }
        for dir in &settings.include_dirs {
            cmd.push(format!("/I{}", dir.display()));
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
            cmd.push(format!("/FI{}", header.display()));
            cmd.push(format!("/Yu{}", header.display()));
            cmd.push(format!("/Fp{}", self.precompiled_artifact(header).display()));
        }
        cmd.arg("/c")
            .arg(path_arg(input))
            .arg(format!("/Fo{}", output.display()))
    }

    fn precompile_command(
        &self,
        base: &CommandLine,
        _project: &Project,
        language: Language,
        input: &Path,
        output: &Path,
    ) -> CommandLine {
        let source_switch = if language.is_cpp_class() { "/Tp" } else { "/Tc" };
        let mut object = output.as_os_str().to_os_string();
        object.push(".obj");
        base.clone()
            .arg("/c")
            .arg(format!("{}{}", source_switch, input.display()))
            .arg(format!("/Yc{}", input.display()))
            .arg(format!("/Fp{}", output.display()))
            .arg(format!("/Fo{}", PathBuf::from(object).display()))
    }

    fn precompiled_artifact(&self, superheader: &Path) -> PathBuf {
        let mut name = superheader.as_os_str().to_os_string();
        name.push(".pch");
        PathBuf::from(name)
    }

    fn object_extension(&self) -> &str {
        ".obj"
    }

    fn parse_output(&self, text: &str) -> Vec<Diagnostic> {
        let mut out: Vec<Diagnostic> = Vec::new();
        for line in text.lines() {
            let Some(caps) = CL_LINE.captures(line.trim_end()) else {
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

    fn interrupt_exit_code(&self) -> Option<i32> {
        Some(CONTROL_C_EXIT)
    }
}

impl Linker for MsvcToolchain {
    fn link_command(&self, project: &Project, output: &Path, objects: &[PathBuf]) -> CommandLine {
        let out_flag = format!("/OUT:{}", output.display());
        if project.project_type == ProjectType::Static {
            return CommandLine::new(&self.lib)
                .arg("/NOLOGO")
                .arg(out_flag)
                .args(objects.iter().map(|o| path_arg(o)));
        }
        let settings = &project.settings.direct;
        let mut cmd = CommandLine::new(&self.link).arg("/NOLOGO").arg(out_flag);
        if project.project_type == ProjectType::Shared {
            cmd.push("/DLL");
        }
        cmd = cmd.args(objects.iter().map(|o| path_arg(o)));
        for dir in &settings.library_dirs {
            cmd.push(format!("/LIBPATH:{}", dir.display()));
        }
        cmd = cmd.args(project.dependency_outputs.iter().map(|p| path_arg(p)));
        for lib in settings
            .libraries
            .iter()
            .chain(&settings.static_libraries)
            .chain(&settings.shared_libraries)
        {
            match project.resolved_libraries.get(lib) {
                Some(path) => cmd.push(path_arg(path)),
                None if lib.ends_with(".lib") => cmd.push(lib.clone()),
                None => cmd.push(format!("{}.lib", lib)),
            }
        }
        cmd.args(settings.link_flags.iter().cloned())
    }

    fn find_library(
        &self,
        _project: &Project,
        name: &str,
        search_dirs: &[PathBuf],
        _force_static: bool,
        _force_shared: bool,
    ) -> Option<PathBuf> {
        let file = if name.to_lowercase().ends_with(".lib") {
            name.to_string()
        } else {
            format!("{}.lib", name)
        };
        let env_dirs: Vec<PathBuf> = std::env::var_os("LIB")
            .map(|v| std::env::split_paths(&v).collect())
            .unwrap_or_default();
        search_dirs
            .iter()
            .chain(env_dirs.iter())
            .map(|dir| dir.join(&file))
            .find(|p| p.is_file())
    }

    fn default_output_extension(&self, project_type: ProjectType) -> &str {
        match project_type {
            ProjectType::Application => ".exe",
            ProjectType::Static => ".lib",
            ProjectType::Shared => ".dll",
        }
    }

    fn parse_output(&self, text: &str) -> Vec<Diagnostic> {
        let mut out = Compiler::parse_output(self, text);
        for line in text.lines() {
            if let Some(caps) = LINK_LINE.captures(line.trim_end()) {
                let severity = if &caps["sev"] == "warning" {
                    Severity::Warning
                } else {
                    Severity::Error
                };
                let message = format!("{}: {}", &caps["code"], caps["msg"].trim());
                let mut diag = Diagnostic::new(severity, message);
                let file = caps["file"].trim();
                if !file.is_empty() {
                    diag.file = Some(PathBuf::from(file));
                }
                out.push(diag);
            }
        }
        out
    }
}
