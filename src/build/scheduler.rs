//! Compile dispatch.
//!
//! The dispatcher walks the build order on the calling thread. A project
//! starts once its source dependencies have linked; it is then prepared
//! (pre-build step, fingerprint, precompiled headers, chunk plan) and its
//! tasks are handed to the compile pool one free slot at a time,
//! precompiled headers first. Workers report back over a channel; when the
//! last unit of a project completes the project goes to the link scheduler.

use crate::build::link::{LinkScheduler, LinkTask};
use crate::build::pool::WorkerPool;
use crate::build::preflight::{flags_changed, record_fingerprint};
use crate::build::steps::run_step;
use crate::build::task::{CompileTask, TaskContext};
use crate::build::{BuildOptions, Event, Schedule};
use crate::cache::BuildCache;
use crate::chunk::{ChunkRules, file_size, make_chunks, plan_units};
use crate::diagnostic::Diagnostic;
use crate::error::BuildError;
use crate::headers::HeaderGraph;
use crate::precompile::PrecompileManager;
use crate::project::state::after_compile;
use crate::project::{FileState, Project, ProjectState};
use crate::staleness::StalenessOracle;
use colored::*;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(100);

/// Everything one project needs compiled before it can link.
struct Prepared {
    precompile: Vec<CompileTask>,
    units: Vec<CompileTask>,
    objects: Vec<PathBuf>,
}

/// Dispatcher bookkeeping, owned by the dispatching thread.
struct Progress {
    started: Vec<bool>,
    compile_done: Vec<bool>,
    objects: Vec<Option<Vec<PathBuf>>>,
    in_flight: usize,
    /// Some project failed; stops new work under `stop_on_error`.
    failed: bool,
}

pub struct BuildScheduler {
    schedule: Arc<Schedule>,
    cache: Arc<BuildCache>,
    headers: Arc<HeaderGraph>,
    ctx: TaskContext,
    options: BuildOptions,
}

impl BuildScheduler {
    pub fn new(
        schedule: Arc<Schedule>,
        cache: Arc<BuildCache>,
        headers: Arc<HeaderGraph>,
        ctx: TaskContext,
        options: BuildOptions,
    ) -> Self {
        Self {
            schedule,
            cache,
            headers,
            ctx,
            options,
        }
    }

    /// Build every project of the schedule. Returns once nothing is running
    /// and nothing more can start.
    pub fn run(&self) -> Result<(), BuildError> {
        let n = self.schedule.projects.len();
        let pool = WorkerPool::new(self.options.compile_workers(), "compile")?;
        let (tx, rx) = crossbeam::channel::unbounded();
        let linker = LinkScheduler::start(
            Arc::clone(&self.schedule),
            self.options.link_workers(),
            self.ctx.clone(),
            tx.clone(),
        )?;
        tracing::info!(
            "building {} projects with {} compile and {} link workers",
            n,
            pool.threads(),
            self.options.link_workers()
        );

        let mut progress = Progress {
            started: vec![false; n],
            compile_done: vec![false; n],
            objects: vec![None; n],
            in_flight: 0,
            failed: false,
        };

        loop {
            while let Ok(event) = rx.try_recv() {
                self.handle(event, &mut progress, &linker);
            }
            if let Some(i) = self.next_startable(&mut progress) {
                self.start_project(i, &mut progress, &pool, &tx, &rx, &linker);
                continue;
            }
            if progress.in_flight == 0 && linker.is_idle() {
                match rx.try_recv() {
                    Ok(event) => self.handle(event, &mut progress, &linker),
                    Err(_) => break,
                }
                continue;
            }
            match rx.recv_timeout(POLL) {
                Ok(event) => self.handle(event, &mut progress, &linker),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        linker.finish();
        self.persist_hashes(&progress);
        Ok(())
    }

    fn interrupted(&self) -> bool {
        self.ctx.interrupt.load(Ordering::SeqCst)
    }

    fn halted(&self, progress: &Progress) -> bool {
        self.interrupted() || (self.options.stop_on_error && progress.failed)
    }

    /// The next project in build order whose source dependencies have all
    /// linked. Projects whose source dependency ended without linking are
    /// aborted on the way.
    fn next_startable(&self, progress: &mut Progress) -> Option<usize> {
        if self.halted(progress) {
            return None;
        }
        let schedule = &self.schedule;
        for i in 0..schedule.projects.len() {
            if progress.started[i] {
                continue;
            }
            let deps = &schedule.src_deps[i];
            let blocked_by = deps.iter().find(|&&d| {
                let state = schedule.projects[d].state();
                state.is_terminal() && !state.is_linked()
            });
            if let Some(&d) = blocked_by {
                let project = &schedule.projects[i];
                tracing::warn!(
                    "{}: source dependency {} did not build",
                    project.key,
                    schedule.projects[d].key
                );
                project.status.lock().advance(ProjectState::Aborted);
                progress.started[i] = true;
                progress.compile_done[i] = true;
                continue;
            }
            if deps
                .iter()
                .all(|&d| schedule.projects[d].state().is_linked())
            {
                return Some(i);
            }
        }
        None
    }

    fn handle(&self, event: Event, progress: &mut Progress, linker: &LinkScheduler) {
        match event {
            Event::Compiled { project, success } => {
                progress.in_flight = progress.in_flight.saturating_sub(1);
                let complete = {
                    let mut status = self.schedule.projects[project].status.lock();
                    status.completed_units += 1;
                    if !success {
                        status.compile_failed = true;
                        status.advance(ProjectState::Failed);
                    }
                    status.compile_complete()
                };
                if !success {
                    progress.failed = true;
                }
                if complete {
                    self.finish_compile(project, progress, linker);
                }
            }
            Event::Linked { project } => {
                if !self.schedule.projects[project].state().is_success() {
                    progress.failed = true;
                }
            }
        }
    }

    fn finish_compile(&self, i: usize, progress: &mut Progress, linker: &LinkScheduler) {
        if std::mem::replace(&mut progress.compile_done[i], true) {
            return;
        }
        let project = &self.schedule.projects[i];
        let (failed, aborted) = {
            let status = project.status.lock();
            (status.compile_failed, status.aborted_units)
        };
        if failed || aborted > 0 {
            let next = after_compile(failed, aborted, false);
            project.status.lock().advance(next);
            if failed {
                progress.failed = true;
                self.ctx
                    .reporter
                    .println(format!("{} {}: compilation failed", "x".red(), project.name().bold()));
            }
            return;
        }
        let objects = progress.objects[i].take().unwrap_or_default();
        linker.submit(LinkTask { project: i, objects });
    }

    fn fail_project(&self, project: &Project, message: String, progress: &mut Progress) {
        tracing::error!("{}: {}", project.key, message);
        self.ctx
            .reporter
            .println(format!("{} {}: {}", "x".red(), project.name().bold(), message));
        let mut status = project.status.lock();
        status.diagnostics.push(Diagnostic::error(message));
        status.advance(ProjectState::Failed);
        progress.failed = true;
    }

    fn start_project(
        &self,
        i: usize,
        progress: &mut Progress,
        pool: &WorkerPool,
        tx: &Sender<Event>,
        rx: &Receiver<Event>,
        linker: &LinkScheduler,
    ) {
        progress.started[i] = true;
        let project = Arc::clone(&self.schedule.projects[i]);
        project.status.lock().advance(ProjectState::Building);
        self.ctx.reporter.status(format!("building {}", project.name()));

        let prepared = match self.prepare(&project, i) {
            Ok(prepared) => prepared,
            Err(message) => {
                progress.compile_done[i] = true;
                self.fail_project(&project, message, progress);
                return;
            }
        };

        let pch_count = prepared.precompile.len();
        let total = pch_count + prepared.units.len();
        project.status.lock().total_units = total;
        progress.objects[i] = Some(prepared.objects);
        self.ctx.reporter.add_work(total as u64);
        tracing::info!(
            "{}: {} precompiled headers, {} units",
            project.key,
            pch_count,
            total - pch_count
        );
        if total == 0 {
            self.finish_compile(i, progress, linker);
            return;
        }

        self.dispatch(i, prepared.precompile, progress, pool, tx, rx, linker);
        // Units force-include the precompiled headers, so those finish first.
        while project.status.lock().completed_units < pch_count {
            match rx.recv() {
                Ok(event) => self.handle(event, progress, linker),
                Err(_) => break,
            }
        }
        self.dispatch(i, prepared.units, progress, pool, tx, rx, linker);
    }

    /// Hand `tasks` to the pool one free slot at a time. Once the build is
    /// halted or the project has failed, the rest are aborted.
    fn dispatch(
        &self,
        i: usize,
        tasks: Vec<CompileTask>,
        progress: &mut Progress,
        pool: &WorkerPool,
        tx: &Sender<Event>,
        rx: &Receiver<Event>,
        linker: &LinkScheduler,
    ) {
        let mut tasks = tasks.into_iter();
        while let Some(task) = tasks.next() {
            let slot = pool.acquire();
            // Pick up results that finished while we waited for the slot.
            while let Ok(event) = rx.try_recv() {
                self.handle(event, progress, linker);
            }

            let project_failed = self.schedule.projects[i].status.lock().compile_failed;
            if self.halted(progress) || project_failed {
                drop(slot);
                let rest: Vec<CompileTask> = std::iter::once(task).chain(tasks).collect();
                self.abort(i, rest, progress, linker);
                return;
            }

            progress.in_flight += 1;
            let ctx = self.ctx.clone();
            let tx = tx.clone();
            pool.spawn(slot, move || {
                let success = task.run(&ctx);
                let _ = tx.send(Event::Compiled {
                    project: task.index,
                    success,
                });
            });
        }
    }

    fn abort(&self, i: usize, tasks: Vec<CompileTask>, progress: &mut Progress, linker: &LinkScheduler) {
        if tasks.is_empty() {
            return;
        }
        let project = &self.schedule.projects[i];
        let complete = {
            let mut status = project.status.lock();
            for task in &tasks {
                for source in &task.sources {
                    status.set_file_state(source, FileState::Aborted);
                }
            }
            status.aborted_units += tasks.len();
            status.completed_units += tasks.len();
            status.compile_complete()
        };
        tracing::info!("{}: aborted {} units", project.key, tasks.len());
        self.ctx.reporter.skip(tasks.len() as u64);
        if complete {
            self.finish_compile(i, progress, linker);
        }
    }

    /// Run the pre-build step, decide what is stale and turn the chunk plan
    /// into tasks.
    fn prepare(&self, project: &Arc<Project>, index: usize) -> Result<Prepared, String> {
        if let Some(error) = &project.config_error {
            return Err(error.clone());
        }
        if let Some(script) = &project.steps.pre_build {
            let text = run_step(script, &project.working_dir)
                .map_err(|e| format!("pre-build step failed: {:#}", e))?;
            if !text.trim().is_empty() {
                self.ctx.reporter.println(text.trim_end());
            }
        }

        let recompile_all = self.options.recompile_all || flags_changed(project);
        let oracle = StalenessOracle::new(project, &self.cache, &self.headers, recompile_all);
        let (superheaders, pch_tasks) = PrecompileManager::new(project, &oracle)
            .prepare()
            .map_err(|e| e.to_string())?;

        let rules = ChunkRules::new(&project.chunking, &project.working_dir)
            .map_err(|e| format!("invalid no_chunk pattern: {}", e))?;
        let chunks = make_chunks(
            &project.sources,
            &project.chunking,
            &rules,
            &project.output_stem(),
            file_size,
        );
        let plan = plan_units(
            project,
            &chunks,
            &oracle,
            self.options.compile_workers(),
            file_size,
        )
        .map_err(|e| e.to_string())?;

        let compiler = project.toolchain.compiler();
        let precompile = pch_tasks
            .into_iter()
            .map(|pch| CompileTask {
                project: Arc::clone(project),
                index,
                label: pch
                    .superheader
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                sources: Vec::new(),
                output: pch.artifact,
                command: pch.command,
            })
            .collect();

        let mut bases = HashMap::new();
        let units = plan
            .units
            .iter()
            .map(|unit| {
                let language = unit.language();
                let base = bases
                    .entry(language)
                    .or_insert_with(|| compiler.base_command(project, language));
                let command = compiler.extended_command(
                    base,
                    project,
                    superheaders.for_language(language),
                    unit.object(),
                    unit.input(),
                );
                CompileTask {
                    project: Arc::clone(project),
                    index,
                    label: unit.label(),
                    sources: unit.sources(),
                    output: unit.object().to_path_buf(),
                    command,
                }
            })
            .collect();

        Ok(Prepared {
            precompile,
            units,
            objects: plan.objects,
        })
    }

    /// Store content hashes and the flag fingerprint of every project whose
    /// units all compiled.
    fn persist_hashes(&self, progress: &Progress) {
        for (i, project) in self.schedule.projects.iter().enumerate() {
            let (compiled, units) = {
                let status = project.status.lock();
                let compiled = progress.compile_done[i]
                    && !status.compile_failed
                    && status.aborted_units == 0
                    && !matches!(status.state(), ProjectState::Failed | ProjectState::Aborted);
                (compiled, status.total_units)
            };
            if !compiled {
                continue;
            }
            if let Err(e) = record_fingerprint(project) {
                tracing::warn!("{}: {}", project.key, e);
            }
            if units == 0 {
                continue;
            }
            let oracle = StalenessOracle::new(project, &self.cache, &self.headers, false);
            match oracle.persist_hashes(&project.sources) {
                Ok(written) => tracing::debug!("{}: stored {} hashes", project.key, written),
                Err(e) => tracing::warn!("{}: failed to store hashes: {}", project.key, e),
            }
        }
    }
}
