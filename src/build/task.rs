//! Running one compiler or linker process.

use crate::build::feedback::FeedbackAnalyzer;
use crate::diagnostic::Diagnostic;
use crate::project::{FileState, Project};
use crate::toolchain::CommandLine;
use crate::ui::Reporter;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct ToolRun {
    pub success: bool,
    /// The tool died from an interrupt rather than failing on its own.
    pub interrupted: bool,
    /// stdout followed by stderr.
    pub output: String,
}

/// Run `command` in `cwd` and wait for it.
pub fn run_tool(command: &CommandLine, cwd: &Path, interrupt_code: Option<i32>) -> io::Result<ToolRun> {
    let output = command.to_command(cwd).output()?;
    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(ToolRun {
        success: output.status.success(),
        interrupted: was_interrupted(&output.status, interrupt_code),
        output: text,
    })
}

fn was_interrupted(status: &ExitStatus, interrupt_code: Option<i32>) -> bool {
    if interrupt_code.is_some() && status.code() == interrupt_code {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal() == Some(2) {
            return true;
        }
    }
    false
}

/// Shared by every task of a build.
#[derive(Clone)]
pub struct TaskContext {
    pub reporter: Arc<Reporter>,
    pub interrupt: Arc<AtomicBool>,
}

/// A precompiled header or a compile unit, ready to run.
#[derive(Debug, Clone)]
pub struct CompileTask {
    pub project: Arc<Project>,
    pub index: usize,
    pub label: String,
    /// Sources whose file state follows this task. Empty for precompiled headers.
    pub sources: Vec<PathBuf>,
    pub output: PathBuf,
    pub command: CommandLine,
}

impl CompileTask {
    /// Run the task, record file states and diagnostics on the project and
    /// print the result. Returns whether it succeeded.
    pub fn run(&self, ctx: &TaskContext) -> bool {
        let project = &self.project;
        {
            let mut status = project.status.lock();
            for source in &self.sources {
                status.set_file_state(source, FileState::Building);
            }
        }
        ctx.reporter.command(&self.command.to_string());

        let compiler = project.toolchain.compiler();
        let (run, diagnostics) = match self.execute(compiler.interrupt_exit_code()) {
            Ok(run) => {
                let diagnostics = compiler.parse_output(&run.output);
                (run, diagnostics)
            }
            Err(message) => {
                let run = ToolRun {
                    output: message.clone(),
                    ..Default::default()
                };
                (run, vec![Diagnostic::error(message)])
            }
        };
        if run.interrupted {
            ctx.interrupt.store(true, Ordering::SeqCst);
        }

        {
            let mut status = project.status.lock();
            status.diagnostics.extend(diagnostics);
            status.compiled_any = true;
            let next = if run.success {
                FileState::Finished
            } else {
                FileState::Failed
            };
            for source in &self.sources {
                status.set_file_state(source, next);
            }
        }

        let hint = if run.success {
            None
        } else {
            FeedbackAnalyzer::analyze(&run.output)
        };
        ctx.reporter
            .task_done(project.name(), &self.label, run.success, &run.output, hint);
        tracing::debug!(
            "{}: {} {}",
            project.key,
            self.label,
            if run.success { "done" } else { "failed" }
        );
        run.success
    }

    fn execute(&self, interrupt_code: Option<i32>) -> Result<ToolRun, String> {
        if let Some(parent) = self.output.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }
        run_tool(&self.command, &self.project.working_dir, interrupt_code).map_err(|e| {
            format!(
                "failed to run {}: {}",
                self.command.program.display(),
                e
            )
        })
    }
}
