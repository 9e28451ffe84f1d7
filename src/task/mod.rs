//! One-shot repository tasks
//!
//! Every mutation of a repository is a [`Task`]: build it from a repository
//! handle, optionally attach a progress callback, then execute it once.
//!
//! ## Failure model
//!
//! `execute` returns `Err` for failures that make the whole operation
//! meaningless (a duplicate record, a broken repository); nothing new is
//! persisted then. Failures that concern single files or directories are
//! collected as [`ExceptionInfo`]s, the affected entry is left out of the
//! persisted snapshot, and the task carries on.
//!
//! ## Progress
//!
//! A task emits one indeterminate event when it starts, determinate events
//! with a non-decreasing `completed` count while it works, and exactly one
//! final event with `is_progressing == false`, also when it fails.

mod backup;
mod remove;
mod restore;

pub use backup::{MirroringBackupTask, VersioningBackupTask};
pub use remove::{MirroringRemoveTask, VersioningRemoveTask};
pub use restore::{MirroringRestoreTask, RestoreSource, RestoreTask, VersioningRestoreTask};

use crate::error::{KeepsakeError, Result};
use crate::types::{ExceptionInfo, ProgressCallback, ProgressEvent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a task does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Copies a target into a repository
    Backup,
    /// Removes records from a repository
    Remove,
    /// Copies repository content back out
    Restore,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Backup => write!(f, "backup"),
            TaskKind::Remove => write!(f, "remove"),
            TaskKind::Restore => write!(f, "restore"),
        }
    }
}

/// A repository operation that runs once
pub trait Task: Send {
    /// What this task does
    fn kind(&self) -> TaskKind;

    /// Whether `execute` has been called
    fn is_completed(&self) -> bool;

    /// Receive progress events from now on
    fn set_progress_callback(&mut self, callback: ProgressCallback);

    /// Run the task
    ///
    /// Returns the item-level failures.
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::TaskAlreadyCompleted`] on a second call
    /// - any fatal error of the operation itself
    fn execute(&mut self) -> Result<Vec<ExceptionInfo>>;
}

/// Completion flag and callback shared by every task type
#[derive(Default)]
pub(crate) struct TaskState {
    completed: bool,
    callback: Option<ProgressCallback>,
}

impl fmt::Debug for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskState")
            .field("completed", &self.completed)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl TaskState {
    pub(crate) fn is_completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn set_callback(&mut self, callback: ProgressCallback) {
        self.callback = Some(callback);
    }

    /// Mark the task as run and hand out its reporter
    pub(crate) fn begin(&mut self) -> Result<ProgressReporter> {
        if self.completed {
            return Err(KeepsakeError::TaskAlreadyCompleted);
        }
        self.completed = true;
        Ok(ProgressReporter::new(self.callback.clone()))
    }
}

/// Emits the progress events of one task run
pub(crate) struct ProgressReporter {
    callback: Option<ProgressCallback>,
    total: usize,
    completed: usize,
    finished: bool,
}

impl ProgressReporter {
    pub(crate) fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            total: 0,
            completed: 0,
            finished: false,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    /// Work has started, size unknown
    pub(crate) fn start(&self) {
        self.emit(ProgressEvent::indeterminate());
    }

    /// Size of the work is known
    pub(crate) fn set_total(&mut self, total: usize) {
        self.total = total;
        self.emit(ProgressEvent::determinate(self.total, self.completed, true));
    }

    /// `units` more of the work are done
    pub(crate) fn advance(&mut self, units: usize) {
        self.completed += units;
        self.emit(ProgressEvent::determinate(self.total, self.completed, true));
    }

    /// Final event; later calls do nothing
    pub(crate) fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.emit(ProgressEvent::determinate(self.total, self.completed, false));
    }
}

/// Run `body` as the single execution of a task
///
/// Emits the final progress event whether `body` succeeds or not.
pub(crate) fn run_once<F>(state: &mut TaskState, body: F) -> Result<Vec<ExceptionInfo>>
where
    F: FnOnce(&mut ProgressReporter) -> Result<Vec<ExceptionInfo>>,
{
    let mut reporter = state.begin()?;
    let outcome = body(&mut reporter);
    reporter.finish();
    outcome
}
