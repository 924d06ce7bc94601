//! Expand a manifest into concrete projects.
//!
//! Every `[[project]]` is instantiated once per selected target, architecture
//! and toolchain. Settings are layered `[build]`, `[targets.<t>]`, the
//! project table, then `[project.targets.<t>]`; lists extend and scalars
//! override.

use super::{ChunkSettings, LinkScope, Project, ProjectKey, ProjectType, Settings, is_header};
use crate::config::{DependencyKind, Manifest, ProjectConfig};
use crate::error::ConfigError;
use crate::headers::normalize_path;
use crate::project::Language;
use crate::toolchain::{CompilerType, Toolchain, ToolchainError};
use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What to build. Empty lists fall back to the manifest defaults.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub targets: Vec<String>,
    pub archs: Vec<String>,
    pub toolchains: Vec<String>,
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub selection: Selection,
    pub no_chunks: bool,
    pub unity: bool,
    pub no_precompile: bool,
}

pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "x86" => "x86",
        "aarch64" => "arm64",
        other => other,
    }
}

fn or_default(chosen: &[String], configured: &[String], fallback: &str) -> Vec<String> {
    if !chosen.is_empty() {
        chosen.to_vec()
    } else if !configured.is_empty() {
        configured.to_vec()
    } else {
        vec![fallback.to_string()]
    }
}

fn anchored(settings: &Settings, base: &Path) -> Settings {
    let mut s = settings.clone();
    s.anchor(base);
    s
}

fn anchor_paths(paths: &[PathBuf], base: &Path) -> Vec<PathBuf> {
    paths.iter().map(|p| normalize_path(&base.join(p))).collect()
}

/// Sources and headers under `dirs`, skipping build output and hidden
/// directories.
pub fn discover_sources(
    working_dir: &Path,
    dirs: &[PathBuf],
    exclude_dirs: &[PathBuf],
    exclude_files: &[PathBuf],
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let roots = if dirs.is_empty() {
        vec![working_dir.to_path_buf()]
    } else {
        anchor_paths(dirs, working_dir)
    };
    let skip_dirs = anchor_paths(exclude_dirs, working_dir);
    let skip_files = anchor_paths(exclude_files, working_dir);

    let mut sources = BTreeSet::new();
    let mut headers = BTreeSet::new();
    for root in roots {
        let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
            let path = e.path();
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !(name.starts_with('.') || name == "out" || skip_dirs.iter().any(|d| d == path))
        });
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = normalize_path(entry.path());
            if skip_files.contains(&path) {
                continue;
            }
            if Language::from_path(&path).is_some() {
                sources.insert(path);
            } else if is_header(&path) {
                headers.insert(path);
            }
        }
    }
    (sources.into_iter().collect(), headers.into_iter().collect())
}

/// Instantiate the manifest's projects. `resolve` turns a toolchain name
/// into a backend and is called once per distinct name.
pub fn load_projects(
    manifest: &Manifest,
    root: &Path,
    options: &LoadOptions,
    resolve: &mut dyn FnMut(&str) -> Result<Toolchain, ToolchainError>,
) -> Result<Vec<Project>> {
    let selection = &options.selection;
    let defaults = &manifest.build;
    let targets = or_default(&selection.targets, &defaults.targets, "debug");
    let archs = or_default(&selection.archs, &defaults.archs, host_arch());
    let default_toolchain = defaults
        .toolchain
        .clone()
        .unwrap_or_else(|| CompilerType::host_default().name().to_string());
    let toolchains = or_default(&selection.toolchains, &[], &default_toolchain);

    let configs = select_configs(manifest, &selection.projects)?;

    let mut resolved: HashMap<String, Toolchain> = HashMap::new();
    let mut projects = Vec::new();
    for toolchain_name in &toolchains {
        let toolchain = match resolved.get(toolchain_name) {
            Some(tc) => tc.clone(),
            None => {
                let tc = resolve(toolchain_name.as_str())?;
                resolved.insert(toolchain_name.clone(), tc.clone());
                tc
            }
        };
        for target in &targets {
            for arch in &archs {
                for config in &configs {
                    let key = ProjectKey::new(&config.name, target, arch, toolchain_name);
                    projects.push(instantiate(
                        manifest,
                        config,
                        key,
                        root,
                        toolchain.clone(),
                        options,
                    )?);
                }
            }
        }
    }
    Ok(projects)
}

/// The selected project tables plus everything they depend on.
fn select_configs<'m>(manifest: &'m Manifest, names: &[String]) -> Result<Vec<&'m ProjectConfig>, ConfigError> {
    if names.is_empty() {
        return Ok(manifest.projects.iter().collect());
    }
    let by_name: HashMap<&str, &ProjectConfig> =
        manifest.projects.iter().map(|p| (p.name.as_str(), p)).collect();
    let mut wanted = BTreeSet::new();
    let mut stack: Vec<&str> = Vec::new();
    for name in names {
        if !by_name.contains_key(name.as_str()) {
            return Err(ConfigError::UnknownProject(name.clone()));
        }
        stack.push(name);
    }
    while let Some(name) = stack.pop() {
        if !wanted.insert(name) {
            continue;
        }
        // Unknown dependency names are reported when the graph is finalized.
        if let Some(config) = by_name.get(name) {
            stack.extend(config.depends.iter().map(|d| d.name()));
        }
    }
    Ok(manifest
        .projects
        .iter()
        .filter(|p| wanted.contains(p.name.as_str()))
        .collect())
}

fn instantiate(
    manifest: &Manifest,
    config: &ProjectConfig,
    key: ProjectKey,
    root: &Path,
    toolchain: Toolchain,
    options: &LoadOptions,
) -> Result<Project, ConfigError> {
    let defaults = &manifest.build;
    let working_dir = normalize_path(&root.join(config.dir.as_deref().unwrap_or(Path::new("."))));
    if !working_dir.is_dir() {
        return Err(ConfigError::MissingDirectory {
            project: config.name.clone(),
            path: working_dir,
        });
    }
    let target = key.target.clone();
    let mut project = Project::new(key, config.project_type, &working_dir, toolchain);
    if let Some(output) = &config.output {
        project.output_name = project
            .toolchain
            .linker()
            .output_file_name(output, config.project_type);
    }
    project.priority = config.priority;
    project.ignore_dependency_ordering = config.ignore_dependency_ordering;

    let mut direct = anchored(&defaults.settings, root);
    if let Some(per_target) = manifest.targets.get(&target) {
        direct.merge(&anchored(per_target, root));
    }
    direct.merge(&anchored(&config.settings, &working_dir));
    if let Some(per_target) = config.targets.get(&target) {
        direct.merge(&anchored(per_target, &working_dir));
    }
    project.settings.direct = direct;
    project.settings.intermediate = anchored(&config.scope.intermediate, &working_dir);
    project.settings.final_scope = anchored(&config.scope.final_scope, &working_dir);

    project.c_standard = config.c_standard.clone().or_else(|| defaults.c_standard.clone());
    project.cxx_standard = config.cxx_standard.clone().or_else(|| defaults.cxx_standard.clone());
    project.header_recursion_depth = config
        .header_recursion_depth
        .unwrap_or(defaults.header_recursion_depth);
    project.ignore_external_headers = config
        .ignore_external_headers
        .unwrap_or(defaults.ignore_external_headers);

    let mut chunking = ChunkSettings::default();
    defaults.chunking.apply(&mut chunking);
    config.chunking.apply(&mut chunking);
    chunking.no_chunk = config.no_chunk.clone();
    chunking.no_chunk_together = config.no_chunk_together.clone();
    if options.no_chunks {
        chunking.use_chunks = false;
    }
    if options.unity {
        chunking.unity = true;
    }
    project.chunking = chunking;

    if !options.no_precompile {
        project.precompile.cpp_headers = anchor_paths(&config.precompile, &working_dir);
        project.precompile.c_headers = anchor_paths(&config.precompile_c, &working_dir);
        project.precompile.exclude = anchor_paths(&config.precompile_exclude, &working_dir);
    }
    project.steps.pre_build = config.pre_build.clone();
    project.steps.pre_link = config.pre_link.clone();
    project.steps.post_build = config.post_build.clone();
    project.extra_objects = anchor_paths(&config.extra_objects, &working_dir);

    for spec in &config.depends {
        let dep = project.key.sibling(spec.name());
        if spec.kind() == DependencyKind::Source {
            push_unique(&mut project.src_depends, dep);
            continue;
        }
        for scope in spec.scopes() {
            let list = match scope {
                LinkScope::Direct => &mut project.link_depends,
                LinkScope::Intermediate => &mut project.link_depends_intermediate,
                LinkScope::Final => &mut project.link_depends_final,
            };
            push_unique(list, dep.clone());
        }
    }
    if project.project_type == ProjectType::Application {
        for dep in std::mem::take(&mut project.link_depends_final) {
            push_unique(&mut project.link_depends, dep);
        }
    }

    let (sources, headers) = discover_sources(
        &working_dir,
        &config.sources,
        &config.exclude_dirs,
        &config.exclude_files,
    );
    if sources.is_empty() {
        tracing::warn!("{}: no source files found in {}", project.key, working_dir.display());
    }
    project.sources = sources;
    project.headers = headers;
    Ok(project)
}

fn push_unique(list: &mut Vec<ProjectKey>, key: ProjectKey) {
    if !list.contains(&key) {
        list.push(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_manifest;
    use crate::project::testing::gcc;
    use std::fs;
    use tempfile::TempDir;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn load(dir: &Path, text: &str, options: &LoadOptions) -> Result<Vec<Project>> {
        let manifest = parse_manifest(text, &dir.join("ccf.toml"))?;
        let mut calls = 0;
        let mut resolve = |_: &str| {
            calls += 1;
            Ok::<_, ToolchainError>(gcc())
        };
        let projects = load_projects(&manifest, dir, options, &mut resolve)?;
        assert!(calls <= options.selection.toolchains.len().max(1));
        Ok(projects)
    }

    #[test]
    fn test_discover_skips_outputs_and_excludes() {
        let tmp = TempDir::new().unwrap();
        let d = tmp.path();
        write(&d.join("src/main.cpp"), "");
        write(&d.join("src/util.c"), "");
        write(&d.join("src/util.h"), "");
        write(&d.join("src/gen/skip.cpp"), "");
        write(&d.join("src/old.cpp"), "");
        write(&d.join(".ccf/obj/x.cpp"), "");
        write(&d.join("out/y.cpp"), "");
        write(&d.join("notes.txt"), "");

        let (sources, headers) = discover_sources(
            d,
            &[],
            &[PathBuf::from("src/gen")],
            &[PathBuf::from("src/old.cpp")],
        );
        assert_eq!(sources, vec![d.join("src/main.cpp"), d.join("src/util.c")]);
        assert_eq!(headers, vec![d.join("src/util.h")]);
    }

    #[test]
    fn test_expansion_and_layering() {
        let tmp = TempDir::new().unwrap();
        let d = tmp.path();
        write(&d.join("core/a.cpp"), "");
        write(&d.join("app/main.cpp"), "");
        let text = r#"
[build]
targets = ["debug", "release"]
archs = ["x64"]
cflags = ["-Wall"]
chunk_size = 4

[targets.release]
cflags = ["-O2"]

[[project]]
name = "core"
dir = "core"
type = "static"
include_dirs = ["include"]
[project.targets.debug]
defines = ["CORE_DEBUG"]

[[project]]
name = "app"
dir = "app"
depends = ["core", { name = "core", kind = "source" }]
chunk_tolerance = 1
"#;
        let projects = load(d, text, &LoadOptions::default()).unwrap();
        assert_eq!(projects.len(), 4);

        let core_debug = projects
            .iter()
            .find(|p| p.name() == "core" && p.key.target == "debug")
            .unwrap();
        assert_eq!(core_debug.settings.direct.cflags, vec!["-Wall".to_string()]);
        assert_eq!(core_debug.settings.direct.defines, vec!["CORE_DEBUG".to_string()]);
        assert_eq!(core_debug.settings.direct.include_dirs, vec![d.join("core/include")]);
        assert_eq!(core_debug.sources, vec![d.join("core/a.cpp")]);
        assert_eq!(core_debug.chunking.chunk_size, 4);

        let app_release = projects
            .iter()
            .find(|p| p.name() == "app" && p.key.target == "release")
            .unwrap();
        assert_eq!(
            app_release.settings.direct.cflags,
            vec!["-Wall".to_string(), "-O2".to_string()]
        );
        // Applications link their final-scope dependencies directly.
        assert_eq!(app_release.link_depends, vec![app_release.key.sibling("core")]);
        assert!(app_release.link_depends_final.is_empty());
        assert_eq!(app_release.src_depends, vec![app_release.key.sibling("core")]);
        assert_eq!(app_release.chunking.chunk_tolerance, 1);
    }

    #[test]
    fn test_project_selection_pulls_dependencies() {
        let tmp = TempDir::new().unwrap();
        let d = tmp.path();
        let text = r#"
[[project]]
name = "core"
[[project]]
name = "app"
depends = ["core"]
[[project]]
name = "other"
"#;
        let options = LoadOptions {
            selection: Selection {
                projects: vec!["app".into()],
                archs: vec!["x64".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let mut names: Vec<String> = load(d, text, &options)
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["app", "core"]);

        let bad = LoadOptions {
            selection: Selection {
                projects: vec!["nope".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let err = load(d, text, &bad).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_cli_overrides() {
        let tmp = TempDir::new().unwrap();
        let d = tmp.path();
        let text = r#"
[[project]]
name = "app"
precompile = ["pch.hpp"]
"#;
        let options = LoadOptions {
            no_chunks: true,
            unity: true,
            no_precompile: true,
            ..Default::default()
        };
        let p = &load(d, text, &options).unwrap()[0];
        assert!(!p.chunking.use_chunks);
        assert!(p.chunking.unity);
        assert!(p.precompile.is_empty());
    }

    #[test]
    fn test_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let text = "[[project]]\nname = \"app\"\ndir = \"nowhere\"\n";
        let err = load(tmp.path(), text, &LoadOptions::default()).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
