//! Inter-project dependency graph.
//!
//! Finalizing the graph runs four passes in order:
//!
//! 1. edges to projects that do not exist are dropped and the dependent
//!    project is marked as misconfigured (it fails, the rest of the build
//!    goes on);
//! 2. link dependencies are reconciled into their transitive closure;
//! 3. the build order is computed, dropping cycle edges with a warning;
//! 4. exported settings and library outputs flow from dependencies into
//!    their consumers.

use crate::error::ConfigError;
use crate::project::{Project, ProjectKey, ProjectType, Settings};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    MissingDependency {
        project: ProjectKey,
        dependency: ProjectKey,
    },
    Cycle {
        project: ProjectKey,
        dependency: ProjectKey,
    },
}

impl fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphIssue::MissingDependency {
                project,
                dependency,
            } => write!(
                f,
                "project {} references unknown dependency {}",
                project.name, dependency.name
            ),
            GraphIssue::Cycle {
                project,
                dependency,
            } => write!(
                f,
                "circular dependency between {} and {}; ignoring the edge",
                dependency.name, project.name
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOrder {
    /// Project indices, dependencies first.
    pub order: Vec<usize>,
    pub issues: Vec<GraphIssue>,
}

#[derive(Debug)]
pub struct ProjectGraph {
    projects: Vec<Project>,
    index: HashMap<ProjectKey, usize>,
}

impl ProjectGraph {
    pub fn new(projects: Vec<Project>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(projects.len());
        for (i, project) in projects.iter().enumerate() {
            if index.insert(project.key.clone(), i).is_some() {
                return Err(ConfigError::DuplicateProject(project.key.to_string()));
            }
        }
        Ok(Self { projects, index })
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn get(&self, key: &ProjectKey) -> Option<&Project> {
        self.index.get(key).map(|&i| &self.projects[i])
    }

    pub fn index_of(&self, key: &ProjectKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn into_projects(self) -> Vec<Project> {
        self.projects
    }

    /// Run every pass and return the build order.
    pub fn finalize(&mut self) -> BuildOrder {
        let mut issues = self.drop_missing_dependencies();
        self.reconcile_link_depends();
        let mut order = self.build_order();
        issues.append(&mut order.issues);
        self.propagate_scopes(&order.order);
        BuildOrder {
            order: order.order,
            issues,
        }
    }

    fn drop_missing_dependencies(&mut self) -> Vec<GraphIssue> {
        let mut issues = Vec::new();
        for project in &mut self.projects {
            let mut missing = Vec::new();
            for dep in project.declared_link_depends().iter().chain(&project.src_depends) {
                if !self.index.contains_key(dep) && !missing.contains(dep) {
                    missing.push(dep.clone());
                }
            }
            if missing.is_empty() {
                continue;
            }
            for dep in &missing {
                let issue = GraphIssue::MissingDependency {
                    project: project.key.clone(),
                    dependency: dep.clone(),
                };
                tracing::error!("{}", issue);
                issues.push(issue);
            }
            let keep = |list: &mut Vec<ProjectKey>| list.retain(|k| !missing.contains(k));
            keep(&mut project.link_depends);
            keep(&mut project.link_depends_intermediate);
            keep(&mut project.link_depends_final);
            keep(&mut project.src_depends);
            let names: Vec<&str> = missing.iter().map(|k| k.name.as_str()).collect();
            project.config_error = Some(format!("unknown dependencies: {}", names.join(", ")));
        }
        issues
    }

    /// Compute every project's reconciled link dependencies.
    ///
    /// A project starts from its own edges plus the edges of the scope its
    /// type consumes (final for applications, intermediate for libraries),
    /// then follows the same scope through each dependency it reaches. The
    /// project itself is never part of its own closure.
    pub fn reconcile_link_depends(&mut self) {
        let mut results = Vec::with_capacity(self.projects.len());
        for project in &self.projects {
            let consumer = project.project_type;
            let scoped = |p: &Project| -> Vec<ProjectKey> {
                if consumer == ProjectType::Application {
                    p.link_depends_final.clone()
                } else {
                    p.link_depends_intermediate.clone()
                }
            };

            let mut seen: HashSet<&ProjectKey> = HashSet::new();
            seen.insert(&project.key);
            let mut closure = Vec::new();
            let mut stack: Vec<ProjectKey> = project
                .link_depends
                .iter()
                .cloned()
                .chain(scoped(project))
                .rev()
                .collect();
            while let Some(key) = stack.pop() {
                let Some(&i) = self.index.get(&key) else {
                    continue;
                };
                let dep = &self.projects[i];
                if !seen.insert(&dep.key) {
                    continue;
                }
                closure.push(dep.key.clone());
                stack.extend(scoped(dep).into_iter().rev());
            }
            results.push(closure);
        }
        for (project, closure) in self.projects.iter_mut().zip(results) {
            project.reconciled_link_depends = closure;
        }
    }

    /// Order projects so that every project follows its reconciled link and
    /// source dependencies.
    ///
    /// Roots are visited by descending priority, ties in discovery order.
    /// An edge back to a project still being visited is a cycle: it is
    /// reported, left out of the order and removed from the project.
    pub fn build_order(&mut self) -> BuildOrder {
        let n = self.projects.len();
        let mut roots: Vec<usize> = (0..n).collect();
        roots.sort_by_key(|&i| std::cmp::Reverse(self.projects[i].priority));

        let mut order = Vec::with_capacity(n);
        let mut placed = vec![false; n];
        let mut in_progress = vec![false; n];
        let mut dropped: Vec<(usize, usize)> = Vec::new();

        for &i in roots
            .iter()
            .filter(|&&i| self.projects[i].ignore_dependency_ordering)
        {
            placed[i] = true;
            order.push(i);
        }
        for &root in &roots {
            if !placed[root] {
                self.visit(root, &mut placed, &mut in_progress, &mut order, &mut dropped);
            }
        }

        let mut issues = Vec::new();
        for (from, to) in dropped {
            let dependency = self.projects[to].key.clone();
            let project = &mut self.projects[from];
            let issue = GraphIssue::Cycle {
                project: project.key.clone(),
                dependency: dependency.clone(),
            };
            tracing::warn!("{}", issue);
            issues.push(issue);
            for list in [
                &mut project.reconciled_link_depends,
                &mut project.link_depends,
                &mut project.link_depends_intermediate,
                &mut project.link_depends_final,
                &mut project.src_depends,
            ] {
                list.retain(|k| *k != dependency);
            }
        }
        BuildOrder { order, issues }
    }

    fn visit(
        &self,
        i: usize,
        placed: &mut [bool],
        in_progress: &mut [bool],
        order: &mut Vec<usize>,
        dropped: &mut Vec<(usize, usize)>,
    ) {
        in_progress[i] = true;
        let project = &self.projects[i];
        for key in project
            .reconciled_link_depends
            .iter()
            .chain(&project.src_depends)
        {
            let Some(&dep) = self.index.get(key) else {
                continue;
            };
            if placed[dep] {
                continue;
            }
            if in_progress[dep] {
                if !dropped.contains(&(i, dep)) {
                    dropped.push((i, dep));
                }
                continue;
            }
            self.visit(dep, placed, in_progress, order, dropped);
        }
        in_progress[i] = false;
        placed[i] = true;
        order.push(i);
    }

    /// Merge each dependency's exported settings into its consumers and hand
    /// library outputs to the consumer's link step.
    pub fn propagate_scopes(&mut self, order: &[usize]) {
        for &i in order {
            let consumer = self.projects[i].project_type;
            let mut inherited: Vec<Settings> = Vec::new();
            let mut outputs: Vec<PathBuf> = Vec::new();
            for key in &self.projects[i].reconciled_link_depends {
                let Some(&d) = self.index.get(key) else {
                    continue;
                };
                let dep = &self.projects[d];
                inherited.push(dep.settings.exported_to(consumer).clone());
                if dep.project_type.is_library() {
                    outputs.push(dep.output_path());
                }
            }
            let project = &mut self.projects[i];
            for settings in &inherited {
                project.settings.direct.merge(settings);
            }
            for output in outputs {
                if !project.dependency_outputs.contains(&output) {
                    project.dependency_outputs.push(output);
                }
            }
        }
    }
}
