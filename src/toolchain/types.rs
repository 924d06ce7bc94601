use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Supported compiler families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerType {
    /// GNU Compiler Collection (gcc / g++)
    Gcc,
    /// Clang/LLVM (clang / clang++)
    Clang,
    /// Microsoft Visual C++ (cl.exe)
    Msvc,
}

impl CompilerType {
    pub fn parse(name: &str) -> Option<CompilerType> {
        match name.to_lowercase().as_str() {
            "gcc" | "g++" | "gnu" => Some(CompilerType::Gcc),
            "clang" | "clang++" | "llvm" => Some(CompilerType::Clang),
            "msvc" | "cl" | "cl.exe" => Some(CompilerType::Msvc),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompilerType::Gcc => "gcc",
            CompilerType::Clang => "clang",
            CompilerType::Msvc => "msvc",
        }
    }

    pub fn uses_msvc_flags(self) -> bool {
        matches!(self, CompilerType::Msvc)
    }

    /// The family detected when nothing is configured.
    pub fn host_default() -> CompilerType {
        if cfg!(windows) {
            CompilerType::Msvc
        } else if cfg!(target_os = "macos") {
            CompilerType::Clang
        } else {
            CompilerType::Gcc
        }
    }
}

impl fmt::Display for CompilerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error type for toolchain operations
#[derive(Debug, Error)]
pub enum ToolchainError {
    /// No suitable toolchain found
    #[error("toolchain not found: {0}")]
    NotFound(String),
    #[error("unknown toolchain '{0}' (expected gcc, clang or msvc)")]
    Unknown(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A program plus its arguments. Rendered with spaces for fingerprints,
/// logs and `compile_commands.json`; executed without a shell.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn push(&mut self, arg: impl Into<String>) {
        self.args.push(arg.into());
    }

    pub fn to_command(&self, cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(cwd);
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program.to_string_lossy()))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(s: &str) -> String {
    if s.is_empty() || s.contains(char::is_whitespace) {
        format!("\"{}\"", s.replace('"', "\\\""))
    } else {
        s.to_string()
    }
}

pub fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiler_type_parse() {
        assert_eq!(CompilerType::parse("g++"), Some(CompilerType::Gcc));
        assert_eq!(CompilerType::parse("Clang"), Some(CompilerType::Clang));
        assert_eq!(CompilerType::parse("cl.exe"), Some(CompilerType::Msvc));
        assert_eq!(CompilerType::parse("tcc"), None);
    }

    #[test]
    fn test_command_line_display_quotes_spaces() {
        let cmd = CommandLine::new("g++")
            .arg("-c")
            .arg("my file.cpp")
            .args(["-o", "out.o"]);
        assert_eq!(cmd.to_string(), "g++ -c \"my file.cpp\" -o out.o");
    }
}
