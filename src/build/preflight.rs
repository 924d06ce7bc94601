//! Checks that run before anything is compiled.

use crate::cache::refresh_fingerprint;
use crate::error::BuildError;
use crate::project::{Language, Project};
use std::fs;
use std::path::PathBuf;

/// Locate every library the project links and record where it was found.
///
/// Names that refer to a dependency built in this run are skipped; their
/// output does not exist yet.
pub fn check_libraries(project: &mut Project) -> Result<(), BuildError> {
    let settings = &project.settings.direct;
    let wanted: Vec<(String, bool, bool)> = settings
        .libraries
        .iter()
        .map(|l| (l.clone(), false, false))
        .chain(settings.static_libraries.iter().map(|l| (l.clone(), true, false)))
        .chain(settings.shared_libraries.iter().map(|l| (l.clone(), false, true)))
        .collect();
    let search_dirs = settings.library_dirs.clone();

    for (name, force_static, force_shared) in wanted {
        if is_dependency_output(project, &name) {
            continue;
        }
        let found = project.toolchain.linker().find_library(
            project,
            &name,
            &search_dirs,
            force_static,
            force_shared,
        );
        match found {
            Some(path) => {
                tracing::debug!("{}: library {} -> {}", project.key, name, path.display());
                project.resolved_libraries.insert(name, path);
            }
            None => {
                return Err(BuildError::MissingLibrary {
                    project: project.key.to_string(),
                    library: name,
                });
            }
        }
    }
    Ok(())
}

fn is_dependency_output(project: &Project, name: &str) -> bool {
    let stem_of = |p: &PathBuf| {
        p.file_stem()
            .map(|s| s.to_string_lossy().trim_start_matches("lib").to_string())
    };
    project.reconciled_link_depends.iter().any(|k| k.name == name)
        || project
            .dependency_outputs
            .iter()
            .any(|p| stem_of(p).as_deref() == Some(name.trim_start_matches("lib")))
}

pub fn fingerprint_path(project: &Project) -> PathBuf {
    project
        .cache_dir
        .join(format!("{}.fingerprint", project.key.target))
}

/// Current base command fingerprint of the project.
pub fn base_fingerprint(project: &Project) -> String {
    let compiler = project.toolchain.compiler();
    format!(
        "{}\n{}\n{}\n",
        project.toolchain.fingerprint(),
        compiler.base_command(project, Language::C),
        compiler.base_command(project, Language::Cpp)
    )
}

/// Whether the objects on disk may have been built with other global
/// compile flags. A missing fingerprint counts as changed: either nothing was
/// built yet or the last build never finished compiling.
pub fn flags_changed(project: &Project) -> bool {
    let stored = fs::read_to_string(fingerprint_path(project)).ok();
    let changed = stored.as_deref() != Some(base_fingerprint(project).as_str());
    if changed && stored.is_some() {
        tracing::info!("{}: compiler flags changed, rebuilding everything", project.key);
    }
    changed
}

/// Store the current fingerprint. Called once every unit of the project has
/// compiled with these flags.
pub fn record_fingerprint(project: &Project) -> Result<bool, BuildError> {
    let path = fingerprint_path(project);
    refresh_fingerprint(&path, &base_fingerprint(project))
        .map_err(|e| BuildError::io("failed to write", &path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::testing::project;
    use crate::project::{ProjectKey, ProjectType};
    use tempfile::TempDir;

    #[test]
    fn test_missing_library_fails() {
        let tmp = TempDir::new().unwrap();
        let mut p = project("app", ProjectType::Application, tmp.path());
        p.settings.direct.libraries.push("ccf_definitely_missing_lib".into());
        let err = check_libraries(&mut p).unwrap_err();
        assert!(matches!(err, BuildError::MissingLibrary { .. }));
    }

    #[test]
    fn test_library_found_in_search_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("libzz.a"), b"!<arch>\n").unwrap();
        let mut p = project("app", ProjectType::Application, tmp.path());
        p.settings.direct.library_dirs.push(tmp.path().to_path_buf());
        p.settings.direct.static_libraries.push("zz".into());
        check_libraries(&mut p).unwrap();
        assert_eq!(p.resolved_libraries["zz"], tmp.path().join("libzz.a"));
    }

    #[test]
    fn test_dependency_outputs_are_not_looked_up() {
        let tmp = TempDir::new().unwrap();
        let mut p = project("app", ProjectType::Application, tmp.path());
        p.reconciled_link_depends
            .push(ProjectKey::new("core", "debug", "x64", "gcc"));
        p.settings.direct.libraries.push("core".into());
        check_libraries(&mut p).unwrap();
        assert!(p.resolved_libraries.is_empty());
    }

    #[test]
    fn test_fingerprint_change_detection() {
        let tmp = TempDir::new().unwrap();
        let mut p = project("app", ProjectType::Application, tmp.path());
        // Nothing recorded yet.
        assert!(flags_changed(&p));
        assert!(record_fingerprint(&p).unwrap());
        assert!(!flags_changed(&p));
        assert!(!record_fingerprint(&p).unwrap());

        p.settings.direct.defines.push("FAST".into());
        assert!(flags_changed(&p));
    }

    #[test]
    fn test_unrecorded_flag_change_stays_pending() {
        let tmp = TempDir::new().unwrap();
        let mut p = project("app", ProjectType::Application, tmp.path());
        record_fingerprint(&p).unwrap();
        p.settings.direct.defines.push("FAST".into());
        // A build that fails before recording leaves the old fingerprint,
        // so the next run still rebuilds everything.
        assert!(flags_changed(&p));
        assert!(flags_changed(&p));
        record_fingerprint(&p).unwrap();
        assert!(!flags_changed(&p));
    }
}
