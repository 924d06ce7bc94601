//! Link scheduling.
//!
//! A single consumer thread pulls compiled projects off the link queue and
//! hands them to a separate, smaller worker pool. A project whose reconciled
//! link dependencies have not all linked waits outside the queue; every
//! finished link re-checks the waiting projects and moves the ready ones in.

use crate::build::pool::WorkerPool;
use crate::build::steps::run_step;
use crate::build::task::{TaskContext, run_tool};
use crate::build::{Event, Schedule};
use crate::build::feedback::FeedbackAnalyzer;
use crate::diagnostic::Diagnostic;
use crate::error::BuildError;
use crate::project::state::{LinkOutcome, after_compile, after_link};
use crate::project::{Project, ProjectState};
use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

const POLL: Duration = Duration::from_millis(100);

/// A compiled project and the objects its link consumes.
#[derive(Debug, Clone)]
pub struct LinkTask {
    pub project: usize,
    pub objects: Vec<PathBuf>,
}

#[derive(Default)]
struct LinkState {
    queue: VecDeque<LinkTask>,
    waiting: Vec<LinkTask>,
    linking: HashSet<usize>,
    running: usize,
    /// The dispatcher may still submit work.
    building: bool,
    /// Bumped whenever the queue or a dependency state changes.
    generation: u64,
}

struct Shared {
    state: Mutex<LinkState>,
    changed: Condvar,
    schedule: Arc<Schedule>,
    pool: WorkerPool,
    ctx: TaskContext,
    events: Sender<Event>,
}

pub struct LinkScheduler {
    shared: Arc<Shared>,
    consumer: Option<JoinHandle<()>>,
}

impl LinkScheduler {
    pub fn start(
        schedule: Arc<Schedule>,
        workers: usize,
        ctx: TaskContext,
        events: Sender<Event>,
    ) -> Result<Self, BuildError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(LinkState {
                building: true,
                ..Default::default()
            }),
            changed: Condvar::new(),
            schedule,
            pool: WorkerPool::new(workers, "link")?,
            ctx,
            events,
        });
        let consumer_shared = Arc::clone(&shared);
        let consumer = std::thread::Builder::new()
            .name("ccf-link-consumer".to_string())
            .spawn(move || consume(consumer_shared))
            .map_err(|e| BuildError::Pool(e.to_string()))?;
        Ok(Self {
            shared,
            consumer: Some(consumer),
        })
    }

    /// Hand over a project whose compile units all succeeded. It is queued
    /// right away if its dependencies are linked, otherwise it waits.
    pub fn submit(&self, task: LinkTask) {
        let schedule = &self.shared.schedule;
        let mut state = self.shared.state.lock();
        let ready = dependencies_linked(schedule, task.project);
        let next = after_compile(false, 0, ready);
        schedule.projects[task.project].status.lock().advance(next);
        if ready {
            state.queue.push_back(task);
        } else {
            tracing::debug!(
                "{}: waiting for dependencies to link",
                schedule.projects[task.project].key
            );
            state.waiting.push(task);
        }
        state.generation += 1;
        self.shared.changed.notify_all();
    }

    /// Nothing queued and nothing linking.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        let interrupted = self.shared.ctx.interrupt.load(Ordering::SeqCst);
        state.running == 0 && (state.queue.is_empty() || interrupted)
    }

    /// Stop accepting work and wait for running links to finish.
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.building = false;
            self.shared.changed.notify_all();
        }
        if let Some(consumer) = self.consumer.take()
            && consumer.join().is_err()
        {
            tracing::error!("link consumer thread panicked");
        }
    }
}

impl Drop for LinkScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dependencies_linked(schedule: &Schedule, project: usize) -> bool {
    schedule.link_deps[project]
        .iter()
        .all(|&d| schedule.projects[d].state().is_linked())
}

fn consume(shared: Arc<Shared>) {
    let mut seen_generation = u64::MAX;
    loop {
        let batch = {
            let mut state = shared.state.lock();
            loop {
                let interrupted = shared.ctx.interrupt.load(Ordering::SeqCst);
                if (state.queue.is_empty() || interrupted) && !state.building && state.running == 0 {
                    return;
                }
                if !interrupted && !state.queue.is_empty() && state.generation != seen_generation {
                    break;
                }
                shared.changed.wait_for(&mut state, POLL);
            }
            seen_generation = state.generation;
            take_batch(&mut state, &shared.schedule)
        };

        for task in batch {
            let slot = shared.pool.acquire();
            let worker = Arc::clone(&shared);
            shared.pool.spawn(slot, move || worker.link(task));
        }
    }
}

/// Pop every queued project that may link now. A project is deferred while
/// one of its link dependencies is linking or sits in the same batch.
fn take_batch(state: &mut LinkState, schedule: &Schedule) -> Vec<LinkTask> {
    let queued: HashSet<usize> = state.queue.iter().map(|t| t.project).collect();
    let mut launch = Vec::new();
    let mut deferred = VecDeque::new();
    while let Some(task) = state.queue.pop_front() {
        let blocked = schedule.link_deps[task.project]
            .iter()
            .any(|d| state.linking.contains(d) || (*d != task.project && queued.contains(d)));
        if blocked {
            tracing::debug!("{}: link deferred", schedule.projects[task.project].key);
            deferred.push_back(task);
            continue;
        }
        schedule.projects[task.project]
            .status
            .lock()
            .advance(ProjectState::Linking);
        state.linking.insert(task.project);
        state.running += 1;
        launch.push(task);
    }
    state.queue = deferred;
    launch
}

impl Shared {
    fn link(&self, task: LinkTask) {
        let project = &self.schedule.projects[task.project];
        let outcome = perform_link(project, &task.objects, &self.schedule, &self.ctx);
        project.status.lock().advance(after_link(outcome));

        let mut state = self.state.lock();
        state.linking.remove(&task.project);
        state.running = state.running.saturating_sub(1);
        let waiting = std::mem::take(&mut state.waiting);
        for waiter in waiting {
            if dependencies_linked(&self.schedule, waiter.project) {
                self.schedule.projects[waiter.project]
                    .status
                    .lock()
                    .advance(ProjectState::LinkQueued);
                state.queue.push_back(waiter);
            } else {
                state.waiting.push(waiter);
            }
        }
        state.generation += 1;
        // Sent under the lock so an idle link scheduler never has an
        // undelivered completion.
        let _ = self.events.send(Event::Linked {
            project: task.project,
        });
        self.changed.notify_all();
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Whether an existing output has to be produced again although nothing
/// of the project was compiled.
fn needs_relink(project: &Project, inputs: &[PathBuf], schedule: &Schedule, index: usize) -> bool {
    let Some(output_time) = modified(&project.output_path()) else {
        return true;
    };
    let newer = |p: &PathBuf| modified(p).is_some_and(|t| t > output_time);
    if let Some(input) = inputs.iter().find(|p| newer(p)) {
        tracing::info!("{}: relinking, {} is newer", project.key, input.display());
        return true;
    }
    if let Some(lib) = project
        .resolved_libraries
        .values()
        .chain(&project.dependency_outputs)
        .find(|p| newer(p))
    {
        tracing::info!("{}: relinking, {} is newer", project.key, lib.display());
        return true;
    }
    schedule.link_deps[index]
        .iter()
        .any(|&d| schedule.projects[d].state() == ProjectState::Finished)
}

fn link_failed(project: &Project, ctx: &TaskContext, message: String, output: &str) -> LinkOutcome {
    tracing::warn!("{}: {}", project.key, message);
    project
        .status
        .lock()
        .diagnostics
        .push(Diagnostic::error(message.clone()));
    let text = if output.is_empty() { message } else { output.to_string() };
    ctx.reporter.link_done(
        project.name(),
        &project.output_name,
        false,
        &text,
        FeedbackAnalyzer::analyze(output),
    );
    LinkOutcome::Failed
}

pub(crate) fn perform_link(
    project: &Project,
    objects: &[PathBuf],
    schedule: &Schedule,
    ctx: &TaskContext,
) -> LinkOutcome {
    let index = schedule.index_of(&project.key).unwrap_or_default();
    let inputs: Vec<PathBuf> = objects
        .iter()
        .chain(&project.extra_objects)
        .cloned()
        .collect();
    if let Some(missing) = inputs.iter().find(|o| !o.exists()) {
        return link_failed(
            project,
            ctx,
            format!("missing object file {}", missing.display()),
            "",
        );
    }
    if inputs.is_empty() {
        tracing::info!("{}: nothing to link", project.key);
        return LinkOutcome::UpToDate;
    }

    let output = project.output_path();
    let compiled_any = project.status.lock().compiled_any;
    if !compiled_any && !needs_relink(project, &inputs, schedule, index) {
        tracing::info!("{}: {} is up to date", project.key, project.output_name);
        return LinkOutcome::UpToDate;
    }

    if let Some(script) = &project.steps.pre_link {
        match run_step(script, &project.working_dir) {
            Ok(text) if !text.trim().is_empty() => ctx.reporter.println(text.trim_end()),
            Ok(_) => {}
            Err(e) => return link_failed(project, ctx, format!("pre-link step failed: {:#}", e), ""),
        }
    }

    for dir in [&project.output_dir, &project.obj_dir] {
        if let Err(e) = fs::create_dir_all(dir) {
            return link_failed(project, ctx, format!("failed to create {}: {}", dir.display(), e), "");
        }
    }
    if let Err(e) = fs::remove_file(&output)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        return link_failed(project, ctx, format!("failed to remove {}: {}", output.display(), e), "");
    }

    let linker = project.toolchain.linker();
    let command = linker.link_command(project, &output, &inputs);
    ctx.reporter.command(&command.to_string());
    let run = match run_tool(&command, &project.obj_dir, project.toolchain.compiler().interrupt_exit_code()) {
        Ok(run) => run,
        Err(e) => {
            return link_failed(
                project,
                ctx,
                format!("failed to run {}: {}", command.program.display(), e),
                "",
            );
        }
    };
    if run.interrupted {
        ctx.interrupt.store(true, Ordering::SeqCst);
    }
    project
        .status
        .lock()
        .diagnostics
        .extend(linker.parse_output(&run.output));
    if !run.success {
        return link_failed(project, ctx, format!("failed to link {}", project.output_name), &run.output);
    }

    if let Some(script) = &project.steps.post_build {
        match run_step(script, &project.working_dir) {
            Ok(text) if !text.trim().is_empty() => ctx.reporter.println(text.trim_end()),
            Ok(_) => {}
            Err(e) => return link_failed(project, ctx, format!("post-build step failed: {:#}", e), ""),
        }
    }

    ctx.reporter
        .link_done(project.name(), &project.output_name, true, &run.output, None);
    LinkOutcome::Linked
}
