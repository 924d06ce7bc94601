//! Build orchestration.
//!
//! [`Builder`] takes a finalized [`ProjectGraph`](crate::graph::ProjectGraph),
//! runs the library preflight, and drives the [`BuildScheduler`] and
//! [`LinkScheduler`](link::LinkScheduler) until every project is terminal or
//! blocked. The outcome is a [`BuildReport`].

mod clean;
pub mod compile_db;
mod feedback;
pub mod link;
pub mod pool;
pub mod preflight;
mod scheduler;
pub mod steps;
pub mod task;

pub use clean::clean;
pub use feedback::FeedbackAnalyzer;
pub use scheduler::BuildScheduler;

use crate::cache::BuildCache;
use crate::error::BuildError;
use crate::graph::{BuildOrder, ProjectGraph};
use crate::headers::HeaderGraph;
use crate::project::{Project, ProjectKey, ProjectState};
use crate::ui::{Reporter, Table};
use colored::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use task::TaskContext;

/// Worker completions, sent to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Compiled { project: usize, success: bool },
    Linked { project: usize },
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Compile workers; 0 picks the available parallelism.
    pub jobs: usize,
    /// Link workers; 0 picks half the compile workers.
    pub link_jobs: usize,
    pub stop_on_error: bool,
    pub recompile_all: bool,
    pub compile_commands: Option<PathBuf>,
}

impl BuildOptions {
    pub fn compile_workers(&self) -> usize {
        if self.jobs > 0 {
            self.jobs
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn link_workers(&self) -> usize {
        if self.link_jobs > 0 {
            self.link_jobs
        } else {
            (self.compile_workers() / 2).max(1)
        }
    }
}

/// Projects in build order with their dependency edges resolved to indices.
#[derive(Debug)]
pub struct Schedule {
    pub projects: Vec<Arc<Project>>,
    pub link_deps: Vec<Vec<usize>>,
    pub src_deps: Vec<Vec<usize>>,
    index: HashMap<ProjectKey, usize>,
}

impl Schedule {
    pub fn new(projects: Vec<Project>) -> Self {
        let index: HashMap<ProjectKey, usize> = projects
            .iter()
            .enumerate()
            .map(|(i, p)| (p.key.clone(), i))
            .collect();
        let resolve = |keys: &[ProjectKey]| -> Vec<usize> {
            keys.iter().filter_map(|k| index.get(k).copied()).collect()
        };
        let link_deps = projects
            .iter()
            .map(|p| resolve(&p.reconciled_link_depends))
            .collect();
        let src_deps = projects.iter().map(|p| resolve(&p.src_depends)).collect();
        Self {
            projects: projects.into_iter().map(Arc::new).collect(),
            link_deps,
            src_deps,
            index,
        }
    }

    pub fn index_of(&self, key: &ProjectKey) -> Option<usize> {
        self.index.get(key).copied()
    }
}

/// Put the graph's projects in build order.
pub fn ordered_projects(graph: ProjectGraph, order: &BuildOrder) -> Vec<Project> {
    let mut slots: Vec<Option<Project>> = graph.into_projects().into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(slots.len());
    for &i in &order.order {
        if let Some(project) = slots.get_mut(i).and_then(Option::take) {
            ordered.push(project);
        }
    }
    ordered.extend(slots.into_iter().flatten());
    ordered
}

pub struct Builder {
    options: BuildOptions,
    reporter: Arc<Reporter>,
    interrupt: Arc<AtomicBool>,
    cache: Arc<BuildCache>,
    headers: Arc<HeaderGraph>,
}

impl Builder {
    pub fn new(options: BuildOptions, reporter: Reporter) -> Self {
        Self {
            options,
            reporter: Arc::new(reporter),
            interrupt: Arc::new(AtomicBool::new(false)),
            cache: Arc::new(BuildCache::new()),
            headers: Arc::new(HeaderGraph::new()),
        }
    }

    /// Use an externally owned cancellation flag.
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    pub fn build(&self, graph: ProjectGraph, order: &BuildOrder) -> Result<BuildReport, BuildError> {
        let mut projects = ordered_projects(graph, order);
        for project in &mut projects {
            if project.config_error.is_some() {
                continue;
            }
            if let Err(e) = preflight::check_libraries(project) {
                tracing::error!("{}", e);
                project.config_error = Some(e.to_string());
            }
        }
        if let Some(path) = &self.options.compile_commands {
            let written = compile_db::write(&projects, path)?;
            tracing::info!("wrote {} entries to {}", written, path.display());
        }

        let schedule = Arc::new(Schedule::new(projects));
        let ctx = TaskContext {
            reporter: Arc::clone(&self.reporter),
            interrupt: Arc::clone(&self.interrupt),
        };
        let scheduler = BuildScheduler::new(
            Arc::clone(&schedule),
            Arc::clone(&self.cache),
            Arc::clone(&self.headers),
            ctx,
            self.options.clone(),
        );
        let result = scheduler.run();
        self.reporter.finish();
        result?;
        Ok(BuildReport::collect(
            &schedule,
            self.interrupt.load(Ordering::SeqCst),
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectOutcome {
    pub key: ProjectKey,
    pub state: ProjectState,
    pub errors: usize,
    pub warnings: usize,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub projects: Vec<ProjectOutcome>,
    pub interrupted: bool,
}

impl BuildReport {
    pub fn collect(schedule: &Schedule, interrupted: bool) -> Self {
        let projects = schedule
            .projects
            .iter()
            .map(|p| {
                let status = p.status.lock();
                ProjectOutcome {
                    key: p.key.clone(),
                    state: status.state(),
                    errors: status.error_count(),
                    warnings: status.warning_count(),
                    output: p.output_path(),
                }
            })
            .collect();
        Self {
            projects,
            interrupted,
        }
    }

    pub fn success(&self) -> bool {
        !self.interrupted && self.projects.iter().all(|p| p.state.is_success())
    }

    /// State of the first project called `name`.
    pub fn state_of(&self, name: &str) -> Option<ProjectState> {
        self.projects
            .iter()
            .find(|p| p.key.name == name)
            .map(|p| p.state)
    }

    pub fn incomplete(&self) -> impl Iterator<Item = &ProjectOutcome> {
        self.projects.iter().filter(|p| !p.state.is_success())
    }

    /// 0 on success, 2 when interrupted, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            2
        } else if self.success() {
            0
        } else {
            1
        }
    }

    pub fn summary_table(&self) -> Table {
        let mut table = Table::new(&["Project", "State", "Errors", "Warnings"]);
        for p in self.incomplete() {
            table.add_row(vec![
                p.key.to_string(),
                p.state.to_string(),
                p.errors.to_string(),
                p.warnings.to_string(),
            ]);
        }
        table
    }

    pub fn print_summary(&self) {
        let table = self.summary_table();
        if !table.is_empty() {
            println!();
            println!("{}", "Incomplete projects:".bold());
            table.print();
        }
        let built = self.projects.len() - self.incomplete().count();
        if self.interrupted {
            println!("{} Build interrupted", "!".yellow());
        } else if self.success() {
            println!(
                "{} Built {} project(s)",
                "✓".green(),
                built
            );
        } else {
            println!(
                "{} {} of {} project(s) did not build",
                "x".red(),
                self.projects.len() - built,
                self.projects.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectType;
    use crate::project::testing::project;
    use std::path::Path;

    #[test]
    fn test_worker_defaults() {
        let opts = BuildOptions {
            jobs: 6,
            ..Default::default()
        };
        assert_eq!(opts.compile_workers(), 6);
        assert_eq!(opts.link_workers(), 3);
        let single = BuildOptions {
            jobs: 1,
            ..Default::default()
        };
        assert_eq!(single.link_workers(), 1);
        assert!(BuildOptions::default().compile_workers() >= 1);
    }

    #[test]
    fn test_schedule_resolves_edges() {
        let a = project("a", ProjectType::Static, Path::new("/w"));
        let mut b = project("b", ProjectType::Application, Path::new("/w"));
        b.reconciled_link_depends.push(a.key.clone());
        b.src_depends.push(a.key.clone());
        let schedule = Schedule::new(vec![a, b]);
        assert_eq!(schedule.link_deps, vec![vec![], vec![0]]);
        assert_eq!(schedule.src_deps[1], vec![0]);
        assert_eq!(schedule.index_of(&schedule.projects[1].key), Some(1));
    }

    #[test]
    fn test_report_exit_codes() {
        let schedule = Schedule::new(vec![project("a", ProjectType::Static, Path::new("/w"))]);
        schedule.projects[0]
            .status
            .lock()
            .advance(ProjectState::Failed);
        let report = BuildReport::collect(&schedule, false);
        assert!(!report.success());
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.state_of("a"), Some(ProjectState::Failed));
        assert!(!report.summary_table().is_empty());
        assert_eq!(BuildReport::collect(&schedule, true).exit_code(), 2);
    }
}
