//! `compile_commands.json` for editors and language servers.

use crate::error::BuildError;
use crate::project::{Language, Project};
use crate::toolchain::path_arg;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    pub directory: String,
    pub command: String,
    pub file: String,
}

/// One entry per source file of every project.
pub fn entries(projects: &[Project]) -> Vec<CompileCommand> {
    let mut out = Vec::new();
    for project in projects {
        let compiler = project.toolchain.compiler();
        let mut bases = HashMap::new();
        for source in &project.sources {
            let language = Language::from_path(source).unwrap_or(Language::Cpp);
            let base = bases
                .entry(language)
                .or_insert_with(|| compiler.base_command(project, language));
            let command =
                compiler.extended_command(base, project, None, &project.object_path(source), source);
            out.push(CompileCommand {
                directory: path_arg(&project.working_dir),
                command: command.to_string(),
                file: path_arg(source),
            });
        }
    }
    out
}

/// Write the database to `path`. Returns the number of entries.
pub fn write(projects: &[Project], path: &Path) -> Result<usize, BuildError> {
    let entries = entries(projects);
    let json = serde_json::to_string_pretty(&entries).map_err(|e| {
        BuildError::io("failed to serialize", path, std::io::Error::other(e))
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| BuildError::io("failed to create", parent, e))?;
    }
    fs::write(path, json).map_err(|e| BuildError::io("failed to write", path, e))?;
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectType;
    use crate::project::testing::project;
    use tempfile::TempDir;

    #[test]
    fn test_one_entry_per_source() {
        let tmp = TempDir::new().unwrap();
        let mut p = project("app", ProjectType::Application, tmp.path());
        p.sources = vec![tmp.path().join("main.cpp"), tmp.path().join("util.c")];
        let out = tmp.path().join("compile_commands.json");
        assert_eq!(write(&[p], &out).unwrap(), 2);

        let parsed: Vec<CompileCommand> =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].command.starts_with("g++"));
        assert!(parsed[0].file.ends_with("main.cpp"));
        assert!(parsed[1].command.starts_with("gcc"));
    }
}
