//! # Task Groups
//!
//! A [`TaskGroup`] is a named scheduling domain: a set of tasks sharing a priority, processed
//! by at most one thread at a time.
//!
//! ## Task Storage
//! - Pending tasks wait in a slot arena until their last dependency resolves
//! - Ready tasks scheduled by the thread processing the group go on a local stack owned
//!   by that thread's [`TaskContext`], and are drained last-in first-out
//! - Ready tasks scheduled from anywhere else go through an mpsc queue that the processing
//!   thread drains into the stack whenever the stack runs empty
//!
//! ## Cancellation
//! An asynchronous group stops processing as soon as the worker holds the only strong
//! reference to it: nobody can observe its results anymore. Every group stops when the
//! runtime exits.
//!
//! ## Synchronous Groups
//! Synchronous groups are never seen by the executor. The calling thread processes them
//! with [`TaskGroup::run_synchronously`], which fails if any task is left pending.

use log::info;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use super::priority::TaskPriority;
use super::task::{Task, TaskContext};
use crate::core::error::{VoxelError, VoxelResult};
use crate::core::runtime::{RuntimeState, VoxelRuntime};
use crate::core::sparse_array::{SparseArray, SparseId};
use crate::core::sync::MutexExt;

/// Ready tasks scheduled by the thread processing a group.
pub(crate) type LocalTasks = RefCell<Vec<Task>>;

/// Worker index of a group nobody is processing.
pub(crate) const NO_THREAD: usize = 0;
/// Worker index used while a caller processes a synchronous group.
pub(crate) const SYNCHRONOUS_THREAD: usize = usize::MAX;

/// Id of a task waiting on its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PendingTaskId(SparseId);

/// A scheduling domain for tasks.
pub struct TaskGroup {
    name: String,
    is_synchronous: bool,
    priority: TaskPriority,
    runtime: Arc<RuntimeState>,
    active_thread: AtomicUsize,
    num_ready_tasks: AtomicUsize,
    queue_sender: Sender<Task>,
    queue_receiver: Mutex<Receiver<Task>>,
    pending_tasks: Mutex<SparseArray<Task>>,
    referenced: Mutex<Vec<Arc<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("name", &self.name)
            .field("is_synchronous", &self.is_synchronous)
            .field("num_ready_tasks", &self.num_ready_tasks())
            .field("num_pending_tasks", &self.num_pending_tasks())
            .finish()
    }
}

impl TaskGroup {
    /// Creates an asynchronous group and hands it to the executor.
    ///
    /// # Arguments
    /// * `runtime` - Runtime whose workers will process the group
    /// * `name` - Name used in logs and error messages
    /// * `priority` - Lower values are processed first
    pub fn create(runtime: &VoxelRuntime, name: impl Into<String>, priority: TaskPriority) -> Arc<Self> {
        let group = Arc::new(Self::new(runtime.state().clone(), name.into(), false, priority));
        runtime.executor().add_group(&group);
        group
    }

    /// Creates a group processed only by [`run_synchronously`](Self::run_synchronously).
    pub fn create_synchronous(runtime: &VoxelRuntime, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(
            runtime.state().clone(),
            name.into(),
            true,
            TaskPriority::top(),
        ))
    }

    fn new(runtime: Arc<RuntimeState>, name: String, is_synchronous: bool, priority: TaskPriority) -> Self {
        let (queue_sender, queue_receiver) = mpsc::channel();
        Self {
            name,
            is_synchronous,
            priority,
            runtime,
            active_thread: AtomicUsize::new(NO_THREAD),
            num_ready_tasks: AtomicUsize::new(0),
            queue_sender,
            queue_receiver: Mutex::new(queue_receiver),
            pending_tasks: Mutex::new(SparseArray::new()),
            referenced: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_synchronous(&self) -> bool {
        self.is_synchronous
    }

    pub fn priority(&self) -> &TaskPriority {
        &self.priority
    }

    pub fn runtime(&self) -> &RuntimeState {
        &self.runtime
    }

    /// Context for scheduling tasks on this group from outside of it.
    pub fn context(self: &Arc<Self>) -> TaskContext<'_> {
        TaskContext::external(self)
    }

    /// True if tasks are ready to run.
    pub fn has_tasks(&self) -> bool {
        self.num_ready_tasks() > 0
    }

    pub fn num_ready_tasks(&self) -> usize {
        self.num_ready_tasks.load(Ordering::Acquire)
    }

    pub fn num_pending_tasks(&self) -> usize {
        self.pending_tasks.locked().len()
    }

    /// Keeps `object` alive for as long as the group is.
    pub fn keep_alive(&self, object: Arc<dyn Any + Send + Sync>) {
        self.referenced.locked().push(object);
    }

    /// True once processing should stop.
    pub fn should_exit(self: &Arc<Self>) -> bool {
        if self.runtime.is_exiting() {
            return true;
        }
        !self.is_synchronous && Arc::strong_count(self) == 1
    }

    pub(crate) fn try_claim(&self, thread_index: usize) -> bool {
        self.active_thread
            .compare_exchange(NO_THREAD, thread_index, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_claim(&self, thread_index: usize) {
        let previous = self.active_thread.swap(NO_THREAD, Ordering::AcqRel);
        ensure_voxel!(
            previous == thread_index,
            "task group {} released by thread {} but claimed by {}",
            self.name,
            thread_index,
            previous
        );
    }

    pub(crate) fn add_pending_task(&self, task: Task) -> PendingTaskId {
        PendingTaskId(self.pending_tasks.locked().add(task))
    }

    pub(crate) fn remove_pending_task(&self, id: PendingTaskId) -> Option<Task> {
        self.pending_tasks.locked().remove(id.0)
    }

    pub(crate) fn on_pending_task_ready(self: &Arc<Self>, id: PendingTaskId) {
        let task = self.remove_pending_task(id);
        if !ensure_voxel!(task.is_some(), "ready task missing from group {}", self.name) {
            return;
        }
        if let Some(task) = task {
            self.queue_task(task);
        }
    }

    /// Schedules a ready task from the thread processing this group.
    pub(crate) fn push_task(self: &Arc<Self>, local_tasks: &LocalTasks, task: Task) {
        if self.runtime.config().bypass_task_queue {
            self.execute_inline(task);
            return;
        }
        self.num_ready_tasks.fetch_add(1, Ordering::AcqRel);
        local_tasks.borrow_mut().push(task);
    }

    /// Schedules a ready task from any thread.
    pub(crate) fn queue_task(self: &Arc<Self>, task: Task) {
        if self.runtime.config().bypass_task_queue {
            self.execute_inline(task);
            return;
        }

        self.num_ready_tasks.fetch_add(1, Ordering::AcqRel);
        if let Err(error) = self.queue_sender.send(task) {
            self.num_ready_tasks.fetch_sub(1, Ordering::AcqRel);
            log::error!("Task {} dropped: queue of {} is closed", error.0.name(), self.name);
            return;
        }

        if self.active_thread.load(Ordering::Acquire) == NO_THREAD && !self.is_synchronous {
            self.runtime.event().trigger();
        }
    }

    fn execute_inline(self: &Arc<Self>, task: Task) {
        if self.should_exit() {
            return;
        }
        task.execute(&TaskContext::external(self));
    }

    /// Runs ready tasks until none are left or the group should exit.
    ///
    /// Must only be called by the thread that claimed the group.
    pub(crate) fn process_tasks(self: &Arc<Self>) {
        self.drain_tasks(&LocalTasks::default());
    }

    fn drain_tasks(self: &Arc<Self>, local_tasks: &LocalTasks) {
        let ctx = TaskContext::active(self, local_tasks);

        loop {
            loop {
                if self.should_exit() {
                    self.discard_tasks(local_tasks);
                    return;
                }

                let task = local_tasks.borrow_mut().pop();
                let Some(task) = task else {
                    break;
                };
                self.num_ready_tasks.fetch_sub(1, Ordering::AcqRel);
                task.execute(&ctx);
            }

            let receiver = self.queue_receiver.locked();
            let mut local_tasks = local_tasks.borrow_mut();
            local_tasks.extend(receiver.try_iter());
            if local_tasks.is_empty() {
                return;
            }
        }
    }

    /// Drops the ready tasks left on the local stack. Their outputs resolve to defaults.
    fn discard_tasks(&self, local_tasks: &LocalTasks) {
        let discarded = std::mem::take(&mut *local_tasks.borrow_mut());
        self.num_ready_tasks.fetch_sub(discarded.len(), Ordering::AcqRel);
        drop(discarded);
    }

    /// Processes every ready task on the calling thread.
    pub fn try_run_synchronously(self: &Arc<Self>) -> VoxelResult<()> {
        self.run_synchronously(|_| ())
    }

    /// Runs `lambda` with an active context, then processes every task it scheduled.
    ///
    /// # Returns
    /// The lambda's result, or [`VoxelError::SynchronousEvaluation`] if exit was requested
    /// or tasks are still waiting on dependencies nobody will resolve.
    pub fn run_synchronously<R>(
        self: &Arc<Self>,
        lambda: impl FnOnce(&TaskContext<'_>) -> R,
    ) -> VoxelResult<R> {
        ensure_voxel!(
            self.is_synchronous,
            "run_synchronously called on asynchronous group {}",
            self.name
        );
        if !self.try_claim(SYNCHRONOUS_THREAD) {
            return Err(VoxelError::SynchronousEvaluation(format!(
                "Task group {} is already being processed",
                self.name
            )));
        }

        let local_tasks = LocalTasks::default();
        let result = lambda(&TaskContext::active(self, &local_tasks));
        self.drain_tasks(&local_tasks);
        self.release_claim(SYNCHRONOUS_THREAD);

        if self.runtime.is_exiting() {
            return Err(VoxelError::SynchronousEvaluation(
                "Exit requested".to_string(),
            ));
        }

        let pending_tasks = self.pending_tasks.locked();
        if !pending_tasks.is_empty() {
            let names: Vec<&str> = pending_tasks.iter().map(|(_, task)| task.name()).collect();
            return Err(VoxelError::SynchronousEvaluation(format!(
                "Failed to process tasks synchronously. Tasks left: {}",
                names.join(",")
            )));
        }

        Ok(result)
    }

    /// Logs the group and its pending tasks.
    pub fn log_tasks(&self) {
        info!(
            "{}: {} ready tasks, priority {:.3}",
            self.name,
            self.num_ready_tasks(),
            self.priority.priority_value()
        );
        for (_, task) in self.pending_tasks.locked().iter() {
            info!(
                "\tPending task {}: {} dependencies",
                task.name(),
                task.num_dependencies()
            );
        }
    }
}
