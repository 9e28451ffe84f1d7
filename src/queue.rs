//! Serial task queue
//!
//! Tasks from any number of repositories run one after another on a single
//! worker thread, so no two tasks ever touch a repository at the same time.
//! Pending tasks can be reordered or dropped while another task runs; a
//! running task always runs to the end.
//!
//! ```rust,no_run
//! use keepsake::queue::{NoopListener, TaskQueue};
//! use keepsake::{BackupOptions, MirroringBackup, RecordInfo};
//! use std::sync::Arc;
//!
//! # fn main() -> keepsake::Result<()> {
//! let repo = MirroringBackup::open("/backups/docs", BackupOptions::default())?;
//! let mut queue = TaskQueue::new(Arc::new(NoopListener))?;
//! queue.push("nightly docs", Box::new(repo.backup_task("/home/me/docs", RecordInfo::new("docs")?)));
//! queue.wait_idle();
//! for done in queue.completed() {
//!     println!("{}: {} failures", done.label, done.failure_count);
//! }
//! queue.shutdown();
//! # Ok(())
//! # }
//! ```

use crate::error::{KeepsakeError, Result};
use crate::task::{Task, TaskKind};
use crate::types::{ProgressCallback, ProgressEvent};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Identifier of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Pending or running task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Queue identifier
    pub id: TaskId,
    /// Caller-supplied label
    pub label: String,
    /// What the task does
    pub kind: TaskKind,
}

/// Outcome of a finished task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTask {
    /// Queue identifier
    pub id: TaskId,
    /// Caller-supplied label
    pub label: String,
    /// What the task did
    pub kind: TaskKind,
    /// Number of item-level failures
    pub failure_count: usize,
    /// Whether the task stopped on a fatal error
    pub is_faulted: bool,
    /// When it finished
    pub completed_at: DateTime<Utc>,
}

/// Notifications from the queue
///
/// Called from the worker thread, except `on_tasks_changed`, which also fires
/// on the thread that edited the queue. Every method defaults to doing
/// nothing.
pub trait QueueListener: Send + Sync {
    /// Progress of the running task
    fn on_progress(&self, _id: TaskId, _event: ProgressEvent) {}

    /// The running task stopped on a fatal error
    fn on_fault(&self, _id: TaskId, _error: &KeepsakeError) {}

    /// Pending or running tasks changed
    fn on_tasks_changed(&self) {}

    /// A task finished, faulted or not
    fn on_completed(&self, _task: &CompletedTask) {}
}

/// Listener that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl QueueListener for NoopListener {}

struct Entry {
    info: TaskInfo,
    task: Box<dyn Task>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Entry>,
    running: Option<TaskInfo>,
    completed: Vec<CompletedTask>,
    shutdown: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_none()
    }

    fn position(&self, id: TaskId) -> Result<usize> {
        self.pending
            .iter()
            .position(|e| e.info.id == id)
            .ok_or_else(|| KeepsakeError::TaskNotFound(id.to_string()))
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.pending.len() {
            return Err(KeepsakeError::invalid_argument(format!(
                "index {} is out of range for {} pending tasks",
                index,
                self.pending.len()
            )));
        }
        Ok(())
    }
}

struct Shared {
    state: Mutex<QueueState>,
    work_ready: Condvar,
    idle: Condvar,
    listener: Arc<dyn QueueListener>,
}

/// Runs tasks one at a time on a dedicated thread
pub struct TaskQueue {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TaskQueue")
            .field("pending", &state.pending.len())
            .field("running", &state.running)
            .field("completed", &state.completed.len())
            .finish()
    }
}

impl TaskQueue {
    /// Start the worker thread
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::Io`] if the thread cannot be spawned
    pub fn new(listener: Arc<dyn QueueListener>) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            listener,
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("keepsake-queue".into())
            .spawn(move || worker_loop(worker_shared))?;
        debug!("Task queue started");
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Append a task
    ///
    /// After [`shutdown`](Self::shutdown) the task is dropped unrun.
    pub fn push(&self, label: impl Into<String>, task: Box<dyn Task>) -> TaskId {
        let info = TaskInfo {
            id: TaskId::new(),
            label: label.into(),
            kind: task.kind(),
        };
        let id = info.id;
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                warn!("Queue is shut down, dropping {} task {:?} ({})", info.kind, info.label, id);
                return id;
            }
            info!("Queued {} task {:?} ({})", info.kind, info.label, id);
            state.pending.push_back(Entry { info, task });
        }
        self.shared.work_ready.notify_one();
        self.shared.listener.on_tasks_changed();
        id
    }

    /// Move a pending task one place towards the front
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::TaskNotFound`] if `id` is not pending
    pub fn move_up(&self, id: TaskId) -> Result<()> {
        self.edit(|state| {
            let index = state.position(id)?;
            if index > 0 {
                state.pending.swap(index, index - 1);
            }
            Ok(())
        })
    }

    /// Move a pending task one place towards the back
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::TaskNotFound`] if `id` is not pending
    pub fn move_down(&self, id: TaskId) -> Result<()> {
        self.edit(|state| {
            let index = state.position(id)?;
            if index + 1 < state.pending.len() {
                state.pending.swap(index, index + 1);
            }
            Ok(())
        })
    }

    /// Move the pending task at `index` one place towards the front
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::InvalidArgument`] if `index` is out of range
    pub fn move_up_at(&self, index: usize) -> Result<()> {
        self.edit(|state| {
            state.check_index(index)?;
            if index > 0 {
                state.pending.swap(index, index - 1);
            }
            Ok(())
        })
    }

    /// Move the pending task at `index` one place towards the back
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::InvalidArgument`] if `index` is out of range
    pub fn move_down_at(&self, index: usize) -> Result<()> {
        self.edit(|state| {
            state.check_index(index)?;
            if index + 1 < state.pending.len() {
                state.pending.swap(index, index + 1);
            }
            Ok(())
        })
    }

    /// Drop the pending task at `index`
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::InvalidArgument`] if `index` is out of range
    pub fn remove_at(&self, index: usize) -> Result<TaskInfo> {
        self.edit(|state| {
            state.check_index(index)?;
            state
                .pending
                .remove(index)
                .map(|e| e.info)
                .ok_or_else(|| KeepsakeError::internal("pending task vanished"))
        })
    }

    /// Drop a pending task; false if it is not pending
    pub fn remove(&self, id: TaskId) -> bool {
        self.edit(|state| {
            let index = state.position(id)?;
            state.pending.remove(index);
            Ok(())
        })
        .is_ok()
    }

    /// Drop every pending task
    pub fn clear(&self) {
        let _ = self.edit(|state| {
            state.pending.clear();
            Ok(())
        });
    }

    /// Pending tasks in execution order
    pub fn pending(&self) -> Vec<TaskInfo> {
        self.shared.state.lock().pending.iter().map(|e| e.info.clone()).collect()
    }

    /// Task currently executing
    pub fn running(&self) -> Option<TaskInfo> {
        self.shared.state.lock().running.clone()
    }

    /// Finished tasks, oldest first
    ///
    /// The history keeps growing until it is drained.
    pub fn completed(&self) -> Vec<CompletedTask> {
        self.shared.state.lock().completed.clone()
    }

    /// Take the finished tasks, oldest first, and forget them
    pub fn drain_completed(&self) -> Vec<CompletedTask> {
        std::mem::take(&mut self.shared.state.lock().completed)
    }

    /// Whether a task is executing
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running.is_some()
    }

    /// Block until nothing is pending or running
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while !state.is_idle() && !state.shutdown {
            self.shared.idle.wait(&mut state);
        }
    }

    /// Stop the worker after the running task; pending tasks are dropped
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            let dropped = state.pending.len();
            state.pending.clear();
            if dropped > 0 {
                warn!("Dropping {} pending tasks on shutdown", dropped);
            }
        }
        self.shared.work_ready.notify_all();
        self.shared.idle.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Task queue worker panicked");
            }
        }
        debug!("Task queue stopped");
    }

    fn edit<T>(&self, f: impl FnOnce(&mut QueueState) -> Result<T>) -> Result<T> {
        let outcome = {
            let mut state = self.shared.state.lock();
            let outcome = f(&mut state);
            if state.is_idle() {
                self.shared.idle.notify_all();
            }
            outcome
        };
        if outcome.is_ok() {
            self.shared.listener.on_tasks_changed();
        }
        outcome
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let mut entry = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(entry) = state.pending.pop_front() {
                    state.running = Some(entry.info.clone());
                    break entry;
                }
                shared.work_ready.wait(&mut state);
            }
        };
        shared.listener.on_tasks_changed();

        let id = entry.info.id;
        let listener = Arc::clone(&shared.listener);
        let callback: ProgressCallback = Arc::new(move |event: ProgressEvent| listener.on_progress(id, event));
        entry.task.set_progress_callback(callback);

        info!("Running {} task {:?} ({})", entry.info.kind, entry.info.label, id);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry.task.execute()))
            .unwrap_or_else(|_| Err(KeepsakeError::internal("task panicked")));

        let (failure_count, is_faulted) = match outcome {
            Ok(exceptions) => {
                for exception in &exceptions {
                    warn!("Task {:?}: {}", entry.info.label, exception);
                }
                (exceptions.len(), false)
            }
            Err(e) => {
                error!("Task {:?} faulted: {}", entry.info.label, e);
                shared.listener.on_fault(id, &e);
                (0, true)
            }
        };
        let done = CompletedTask {
            id,
            label: entry.info.label.clone(),
            kind: entry.info.kind,
            failure_count,
            is_faulted,
            completed_at: Utc::now(),
        };

        shared.listener.on_completed(&done);
        {
            let mut state = shared.state.lock();
            state.running = None;
            state.completed.push(done);
            if state.is_idle() {
                shared.idle.notify_all();
            }
        }
        shared.listener.on_tasks_changed();
    }
}
