//! # Tasks
//!
//! A [`Task`] is a named closure that runs once all of its dependencies are resolved.
//! Tasks are created through a [`TaskContext`], which ties them to the
//! [`TaskGroup`] they run in:
//!
//! ```ignore
//! let distance = ctx
//!     .task("Distance")
//!     .dependency(&positions)
//!     .execute_value(ValueType::FloatBuffer, move |_ctx| {
//!         compute_distance(positions.value_checked())
//!     });
//! ```
//!
//! ## Dependency Counting
//!
//! Each task carries a [`TaskCounter`]: the number of unresolved dependencies plus a
//! registration flag. Registration raises the count once per dependency before adding
//! the task as a dependent, and lowers it again if the dependency turned out to be
//! resolved already. Clearing the flag at the end of registration and the final
//! release by a dependency race for the task. Only one of them observes the count
//! reaching zero with the flag cleared, and that one schedules it. A task is therefore
//! scheduled exactly once and never before every dependency is resolved.

use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use super::future_value::{FutureValue, FutureValueState};
use super::group::{LocalTasks, PendingTaskId, TaskGroup};
use crate::core::message::MessageSeverity;
use crate::core::runtime::RuntimeState;
use crate::value::{Value, ValueType};

pub(crate) type TaskLambda = Box<dyn FnOnce(&TaskContext<'_>) + Send>;

const REGISTERING: u32 = 1 << 31;
const COUNT_MASK: u32 = !REGISTERING;

/// Dependency count of a task, with a flag set while its dependencies are being registered.
#[derive(Debug)]
pub(crate) struct TaskCounter(AtomicU32);

impl TaskCounter {
    pub(crate) fn registering() -> Self {
        Self(AtomicU32::new(REGISTERING))
    }

    pub(crate) fn ready() -> Self {
        Self(AtomicU32::new(0))
    }

    pub(crate) fn num_dependencies(&self) -> u32 {
        self.0.load(Ordering::Acquire) & COUNT_MASK
    }

    pub(crate) fn is_registering(&self) -> bool {
        self.0.load(Ordering::Acquire) & REGISTERING != 0
    }

    pub(crate) fn add_dependency(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases one dependency.
    ///
    /// # Returns
    /// `true` if this release made the task ready.
    pub(crate) fn release(&self) -> bool {
        let previous = self.0.fetch_sub(1, Ordering::AcqRel);
        ensure_voxel!(
            previous & COUNT_MASK > 0,
            "task dependency released more times than registered"
        );
        previous == 1
    }

    /// Ends registration.
    ///
    /// # Returns
    /// `true` if every dependency was already released, making the task ready.
    pub(crate) fn finish_registration(&self) -> bool {
        let previous = self.0.fetch_and(COUNT_MASK, Ordering::AcqRel);
        ensure_voxel!(
            previous & REGISTERING != 0,
            "task registration finished twice"
        );
        previous & COUNT_MASK == 0
    }
}

/// A unit of work waiting on, or ready to run in, a [`TaskGroup`].
pub struct Task {
    name: String,
    counter: Arc<TaskCounter>,
    lambda: TaskLambda,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("num_dependencies", &self.num_dependencies())
            .finish()
    }
}

impl Task {
    pub(crate) fn new(name: String, counter: Arc<TaskCounter>, lambda: TaskLambda) -> Self {
        Self {
            name,
            counter,
            lambda,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_dependencies(&self) -> u32 {
        self.counter.num_dependencies()
    }

    pub(crate) fn execute(self, ctx: &TaskContext<'_>) {
        ensure_voxel!(
            self.counter.num_dependencies() == 0 && !self.counter.is_registering(),
            "task {} executed with {} unresolved dependencies",
            self.name,
            self.counter.num_dependencies()
        );
        (self.lambda)(ctx);
    }
}

/// Registration of a pending task on one of its dependencies.
pub(crate) struct DependentTask {
    group: Weak<TaskGroup>,
    task_id: PendingTaskId,
    counter: Arc<TaskCounter>,
}

impl DependentTask {
    /// Called once the dependency resolved.
    pub(crate) fn release(self) {
        if !self.counter.release() {
            return;
        }
        if let Some(group) = self.group.upgrade() {
            group.on_pending_task_ready(self.task_id);
        }
    }
}

/// Handle through which running code schedules tasks on a [`TaskGroup`].
///
/// Contexts are borrowed, never stored: a task lambda receives one for the duration of
/// its run. The context of the thread processing the group carries that thread's local
/// stack, so tasks it schedules are pushed without locking. Every other context goes
/// through the group's queue.
#[derive(Clone, Copy)]
pub struct TaskContext<'a> {
    group: &'a Arc<TaskGroup>,
    local_tasks: Option<&'a LocalTasks>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn active(group: &'a Arc<TaskGroup>, local_tasks: &'a LocalTasks) -> Self {
        Self {
            group,
            local_tasks: Some(local_tasks),
        }
    }

    pub(crate) fn external(group: &'a Arc<TaskGroup>) -> Self {
        Self {
            group,
            local_tasks: None,
        }
    }

    pub fn group(&self) -> &'a Arc<TaskGroup> {
        self.group
    }

    pub fn runtime(&self) -> &'a RuntimeState {
        self.group.runtime()
    }

    /// Starts building a task named `name`.
    pub fn task(&self, name: impl Into<String>) -> TaskBuilder<'a> {
        TaskBuilder {
            context: *self,
            name: name.into(),
            dependencies: SmallVec::new(),
        }
    }

    fn schedule_ready(&self, task: Task) {
        match self.local_tasks {
            Some(local_tasks) => self.group.push_task(local_tasks, task),
            None => self.group.queue_task(task),
        }
    }
}

/// Builder returned by [`TaskContext::task`].
pub struct TaskBuilder<'a> {
    context: TaskContext<'a>,
    name: String,
    dependencies: SmallVec<[FutureValue; 4]>,
}

impl<'a> TaskBuilder<'a> {
    /// Delays the task until `future` is resolved.
    pub fn dependency(mut self, future: &FutureValue) -> Self {
        self.dependencies.push(future.clone());
        self
    }

    pub fn dependencies<'f>(mut self, futures: impl IntoIterator<Item = &'f FutureValue>) -> Self {
        self.dependencies.extend(futures.into_iter().cloned());
        self
    }

    /// Schedules a task producing nothing.
    pub fn execute(self, lambda: impl FnOnce(&TaskContext<'_>) + Send + 'static) {
        self.schedule(Box::new(lambda));
    }

    /// Schedules a task producing a value of `value_type`.
    ///
    /// A value of another type is reported and replaced with the type default.
    pub fn execute_value(
        self,
        value_type: ValueType,
        lambda: impl FnOnce(&TaskContext<'_>) -> Value + Send + 'static,
    ) -> FutureValue {
        let state = FutureValueState::new(value_type, self.name.clone());
        let output = state.clone();
        let name = self.name.clone();

        self.schedule(Box::new(move |ctx: &TaskContext<'_>| {
            let value = lambda(ctx);
            output.set_value(check_value_type(ctx.runtime(), &name, value_type, value));
        }));

        FutureValue::from_state(state)
    }

    /// Schedules a task producing another future of `value_type`.
    ///
    /// The returned future resolves when the inner one does. An inner future of another
    /// type is reported and the returned future resolves to the type default.
    pub fn execute_future(
        self,
        value_type: ValueType,
        lambda: impl FnOnce(&TaskContext<'_>) -> FutureValue + Send + 'static,
    ) -> FutureValue {
        let state = FutureValueState::new(value_type, self.name.clone());
        let output = state.clone();
        let name = self.name.clone();

        self.schedule(Box::new(move |ctx: &TaskContext<'_>| {
            let future = lambda(ctx);
            if future.value_type() != value_type {
                report_type_mismatch(ctx.runtime(), &name, value_type, future.value_type());
                output.set_value(value_type.default_value());
                return;
            }
            future.link_into(output);
        }));

        FutureValue::from_state(state)
    }

    fn schedule(self, lambda: TaskLambda) {
        let TaskBuilder {
            context,
            name,
            dependencies,
        } = self;

        let pending: SmallVec<[&FutureValue; 4]> = dependencies
            .iter()
            .filter(|dependency| !dependency.is_complete())
            .collect();

        if pending.is_empty() {
            context.schedule_ready(Task::new(name, Arc::new(TaskCounter::ready()), lambda));
            return;
        }

        let group = context.group();
        let counter = Arc::new(TaskCounter::registering());
        let task_id = group.add_pending_task(Task::new(name, counter.clone(), lambda));

        for dependency in pending {
            counter.add_dependency();
            let dependent = DependentTask {
                group: Arc::downgrade(group),
                task_id,
                counter: counter.clone(),
            };
            if !dependency.try_add_dependent_task(dependent) {
                counter.release();
            }
        }

        if counter.finish_registration() {
            if let Some(task) = group.remove_pending_task(task_id) {
                context.schedule_ready(task);
            }
        }
    }
}

fn report_type_mismatch(runtime: &RuntimeState, name: &str, expected: ValueType, actual: ValueType) {
    runtime.messages().report(
        MessageSeverity::Error,
        format!("{name}: expected {expected}, got {actual}"),
    );
}

/// `value` if it has the expected type, otherwise the reported type default.
pub(crate) fn check_value_type(
    runtime: &RuntimeState,
    name: &str,
    expected: ValueType,
    value: Value,
) -> Value {
    if value.value_type() == expected {
        return value;
    }
    report_type_mismatch(runtime, name, expected, value.value_type());
    expected.default_value()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_registration_without_dependencies() {
        let counter = TaskCounter::registering();
        assert!(counter.is_registering());
        assert!(counter.finish_registration());
        assert_eq!(counter.num_dependencies(), 0);
    }

    #[test]
    fn test_counter_release_during_registration_never_schedules() {
        let counter = TaskCounter::registering();
        counter.add_dependency();
        counter.add_dependency();

        assert!(!counter.release());
        assert!(!counter.release());
        assert!(counter.finish_registration());
    }

    #[test]
    fn test_counter_last_release_after_registration_schedules() {
        let counter = TaskCounter::registering();
        counter.add_dependency();
        counter.add_dependency();
        assert!(!counter.finish_registration());

        assert!(!counter.release());
        assert!(counter.release());
    }

    #[test]
    fn test_counter_races_schedule_exactly_once() {
        for _ in 0..200 {
            let counter = Arc::new(TaskCounter::registering());
            let num_dependencies = 8;
            for _ in 0..num_dependencies {
                counter.add_dependency();
            }

            let releasers: Vec<_> = (0..num_dependencies)
                .map(|_| {
                    let counter = counter.clone();
                    std::thread::spawn(move || counter.release())
                })
                .collect();

            let mut num_scheduled = usize::from(counter.finish_registration());
            for releaser in releasers {
                num_scheduled += usize::from(releaser.join().unwrap());
            }
            assert_eq!(num_scheduled, 1);
        }
    }
}
