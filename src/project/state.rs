//! Per-project and per-file build state machines.
//!
//! Project states only ever move forward:
//!
//! ```text
//! PENDING -> BUILDING -> WAITING_FOR_LINK -> LINK_QUEUED -> LINKING -> FINISHED | LINK_FAILED
//!                   \                                            \-> UP_TO_DATE
//!                    \-> FAILED | ABORTED
//! ```
//!
//! Transition targets are computed by the pure functions at the bottom of
//! this module; [`ProjectStatus::advance`] refuses anything that would move
//! backwards or leave a terminal state.

use crate::diagnostic::{Diagnostic, Severity};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectState {
    #[default]
    Pending,
    Building,
    Failed,
    WaitingForLink,
    LinkQueued,
    Linking,
    Finished,
    LinkFailed,
    UpToDate,
    Aborted,
}

impl ProjectState {
    fn rank(self) -> u8 {
        match self {
            ProjectState::Pending => 0,
            ProjectState::Building => 1,
            ProjectState::WaitingForLink => 2,
            ProjectState::LinkQueued => 3,
            ProjectState::Linking => 4,
            ProjectState::Failed
            | ProjectState::Finished
            | ProjectState::LinkFailed
            | ProjectState::UpToDate
            | ProjectState::Aborted => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 5
    }

    /// Linked this run or found up to date: dependents may link against it.
    pub fn is_linked(self) -> bool {
        matches!(self, ProjectState::Finished | ProjectState::UpToDate)
    }

    pub fn is_success(self) -> bool {
        self.is_linked()
    }

    pub fn can_advance_to(self, next: ProjectState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProjectState::Pending => "pending",
            ProjectState::Building => "building",
            ProjectState::Failed => "failed",
            ProjectState::WaitingForLink => "waiting for link",
            ProjectState::LinkQueued => "link queued",
            ProjectState::Linking => "linking",
            ProjectState::Finished => "finished",
            ProjectState::LinkFailed => "link failed",
            ProjectState::UpToDate => "up to date",
            ProjectState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    #[default]
    Pending,
    Building,
    Finished,
    Failed,
    Aborted,
}

impl FileState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FileState::Finished | FileState::Failed | FileState::Aborted
        )
    }

    pub fn can_advance_to(self, next: FileState) -> bool {
        match self {
            FileState::Pending => next != FileState::Pending,
            FileState::Building => next.is_terminal(),
            _ => false,
        }
    }
}

/// Mutable build bookkeeping of one project.
#[derive(Debug, Default)]
pub struct ProjectStatus {
    state: ProjectState,
    files: HashMap<PathBuf, FileState>,
    pub total_units: usize,
    pub completed_units: usize,
    pub aborted_units: usize,
    pub compile_failed: bool,
    /// Something was compiled for this project during the current run.
    pub compiled_any: bool,
    pub diagnostics: Vec<Diagnostic>,
    terminal_file_transitions: usize,
}

impl ProjectStatus {
    pub fn state(&self) -> ProjectState {
        self.state
    }

    /// Move to `next` if the machine allows it. Returns whether it moved.
    pub fn advance(&mut self, next: ProjectState) -> bool {
        let current = self.state();
        if current.can_advance_to(next) {
            self.state = next;
            true
        } else {
            tracing::debug!("ignored project transition {} -> {}", current, next);
            false
        }
    }

    pub fn file_state(&self, path: &Path) -> FileState {
        self.files.get(path).copied().unwrap_or_default()
    }

    pub fn set_file_state(&mut self, path: &Path, next: FileState) -> bool {
        let current = self.file_state(path);
        if !current.can_advance_to(next) {
            tracing::debug!(
                "ignored file transition {:?} -> {:?} for {}",
                current,
                next,
                path.display()
            );
            return false;
        }
        if next.is_terminal() {
            self.terminal_file_transitions += 1;
        }
        self.files.insert(path.to_path_buf(), next);
        true
    }

    pub fn files(&self) -> impl Iterator<Item = (&PathBuf, &FileState)> {
        self.files.iter()
    }

    /// Count of file transitions into FINISHED, FAILED or ABORTED.
    pub fn terminal_file_transitions(&self) -> usize {
        self.terminal_file_transitions
    }

    pub fn compile_complete(&self) -> bool {
        self.completed_units >= self.total_units
    }

    pub fn error_count(&self) -> usize {
        crate::diagnostic::count(&self.diagnostics, Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        crate::diagnostic::count(&self.diagnostics, Severity::Warning)
    }
}

/// Where a project goes once every compile unit is terminal.
pub fn after_compile(
    compile_failed: bool,
    aborted_units: usize,
    dependencies_linked: bool,
) -> ProjectState {
    if compile_failed {
        ProjectState::Failed
    } else if aborted_units > 0 {
        ProjectState::Aborted
    } else if dependencies_linked {
        ProjectState::LinkQueued
    } else {
        ProjectState::WaitingForLink
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    UpToDate,
    Failed,
}

pub fn after_link(outcome: LinkOutcome) -> ProjectState {
    match outcome {
        LinkOutcome::Linked => ProjectState::Finished,
        LinkOutcome::UpToDate => ProjectState::UpToDate,
        LinkOutcome::Failed => ProjectState::LinkFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let mut s = ProjectStatus::default();
        assert_eq!(s.state(), ProjectState::Pending);
        assert!(s.advance(ProjectState::Building));
        assert!(s.advance(ProjectState::WaitingForLink));
        assert!(s.advance(ProjectState::LinkQueued));
        assert!(s.advance(ProjectState::Linking));
        assert!(s.advance(ProjectState::Finished));
    }

    #[test]
    fn test_no_backwards_or_out_of_terminal() {
        let mut s = ProjectStatus::default();
        s.advance(ProjectState::Building);
        s.advance(ProjectState::LinkQueued);
        assert!(!s.advance(ProjectState::WaitingForLink));
        assert!(!s.advance(ProjectState::Building));
        s.advance(ProjectState::LinkFailed);
        assert!(!s.advance(ProjectState::Finished));
        assert_eq!(s.state(), ProjectState::LinkFailed);
    }

    #[test]
    fn test_file_state_machine() {
        let mut s = ProjectStatus::default();
        let f = Path::new("a.cpp");
        assert!(s.set_file_state(f, FileState::Building));
        assert!(!s.set_file_state(f, FileState::Pending));
        assert!(s.set_file_state(f, FileState::Finished));
        assert!(!s.set_file_state(f, FileState::Failed));
        assert_eq!(s.terminal_file_transitions(), 1);
        // Not-yet-started files can be aborted directly.
        assert!(s.set_file_state(Path::new("b.cpp"), FileState::Aborted));
        assert_eq!(s.terminal_file_transitions(), 2);
    }

    #[test]
    fn test_after_compile() {
        assert_eq!(after_compile(true, 0, true), ProjectState::Failed);
        assert_eq!(after_compile(false, 2, true), ProjectState::Aborted);
        assert_eq!(after_compile(false, 0, true), ProjectState::LinkQueued);
        assert_eq!(after_compile(false, 0, false), ProjectState::WaitingForLink);
    }

    #[test]
    fn test_after_link() {
        assert_eq!(after_link(LinkOutcome::Linked), ProjectState::Finished);
        assert_eq!(after_link(LinkOutcome::UpToDate), ProjectState::UpToDate);
        assert_eq!(after_link(LinkOutcome::Failed), ProjectState::LinkFailed);
        assert!(ProjectState::UpToDate.is_linked());
        assert!(!ProjectState::LinkFailed.is_linked());
    }
}
