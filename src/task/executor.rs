//! # Task Executor
//!
//! The executor owns the worker threads and the list of asynchronous task groups.
//!
//! ## Architecture Overview
//! - Groups are kept as weak references sorted by priority value. New groups are
//!   binary-inserted while the list is short enough to keep sorted
//! - Priorities are recomputed in parallel every `priority_duration_secs`, dead groups are
//!   pruned and the list is re-sorted
//! - Workers sleep on a shared [`WorkerEvent`] with a short timeout, then scan the list in
//!   priority order and claim the first idle group with ready tasks
//!
//! ## Worker Lifecycle
//! 1. Wait for the event, or time out after 10 ms
//! 2. Refresh priorities if they are stale
//! 3. Claim and process groups until none has ready tasks
//! 4. Repeat until the worker is asked to die or the runtime exits
//!
//! ## Performance Considerations
//! - A claimed group is processed by one thread only, so tasks of one group never
//!   contend with each other
//! - Past `max_sorted_tasks` groups the list is appended to unsorted and order degrades
//!   to insertion order until the next refresh fits under the limit

use log::{debug, error, info};
use rayon::prelude::*;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use web_time::{Duration, Instant};

use super::group::TaskGroup;
use super::priority::TaskPriority;
use crate::core::config::{RuntimeConfig, MAX_NUM_THREADS};
use crate::core::runtime::RuntimeState;
use crate::core::sync::{MutexExt, RwLockExt};

/// Longest a worker sleeps before rescanning the groups.
const WORKER_WAIT: Duration = Duration::from_millis(10);

/// Auto-reset event waking idle workers.
#[derive(Default)]
pub struct WorkerEvent {
    triggered: Mutex<bool>,
    condvar: Condvar,
}

impl fmt::Debug for WorkerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerEvent")
            .field("triggered", &*self.triggered.locked())
            .finish()
    }
}

impl WorkerEvent {
    pub fn trigger(&self) {
        *self.triggered.locked() = true;
        self.condvar.notify_all();
    }

    /// Waits for a trigger or the timeout.
    ///
    /// # Returns
    /// `true` if this waiter consumed a trigger.
    pub fn wait(&self, timeout: Duration) -> bool {
        let triggered = self.triggered.locked();
        let (mut triggered, _) = self
            .condvar
            .wait_timeout_while(triggered, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *triggered, false)
    }
}

struct TaskGroupEntry {
    group: Weak<TaskGroup>,
    priority: TaskPriority,
    priority_value: f64,
}

struct TaskGroupList {
    entries: Vec<TaskGroupEntry>,
    is_sorted: bool,
    last_priority_update: Instant,
}

/// Priority-ordered list of asynchronous groups, shared with the workers.
struct TaskGroupArray {
    list: RwLock<TaskGroupList>,
}

impl TaskGroupArray {
    fn new() -> Self {
        Self {
            list: RwLock::new(TaskGroupList {
                entries: Vec::new(),
                is_sorted: true,
                last_priority_update: Instant::now(),
            }),
        }
    }

    fn add(&self, group: &Arc<TaskGroup>, config: &RuntimeConfig) {
        let priority = group.priority().clone();
        let priority_value = priority.priority_value();
        let entry = TaskGroupEntry {
            group: Arc::downgrade(group),
            priority,
            priority_value,
        };

        let mut list = self.list.write_locked();
        if list.entries.len() >= config.max_sorted_tasks {
            list.is_sorted = false;
        }

        if list.is_sorted {
            let index = list
                .entries
                .partition_point(|other| other.priority_value < priority_value);
            list.entries.insert(index, entry);
        } else {
            list.entries.push(entry);
        }
    }

    fn update_priorities(&self, config: &RuntimeConfig) {
        let mut list = self.list.write_locked();
        list.last_priority_update = Instant::now();
        list.entries.retain(|entry| entry.group.strong_count() > 0);

        if list.entries.len() > config.max_sorted_tasks {
            list.is_sorted = false;
            return;
        }

        list.entries.par_iter_mut().for_each(|entry| {
            entry.priority_value = entry.priority.priority_value();
        });
        list.entries
            .sort_by(|a, b| a.priority_value.total_cmp(&b.priority_value));
        list.is_sorted = true;
    }

    fn update_priorities_if_needed(&self, config: &RuntimeConfig) {
        let is_stale = self.list.read_locked().last_priority_update.elapsed()
            >= config.priority_duration();
        if is_stale {
            self.update_priorities(config);
        }
    }

    /// Claims the first idle group with ready tasks.
    fn claim_group(&self, thread_index: usize) -> Option<Arc<TaskGroup>> {
        let list = self.list.read_locked();
        list.entries.iter().find_map(|entry| {
            let group = entry.group.upgrade()?;
            (group.has_tasks() && group.try_claim(thread_index)).then_some(group)
        })
    }

    fn live_groups(&self) -> Vec<Arc<TaskGroup>> {
        let list = self.list.read_locked();
        list.entries
            .iter()
            .filter_map(|entry| entry.group.upgrade())
            .collect()
    }

    fn clear(&self) {
        self.list.write_locked().entries.clear();
    }
}

struct WorkerThread {
    index: usize,
    time_to_die: Arc<AtomicBool>,
    state: Arc<RuntimeState>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.time_to_die.store(true, Ordering::Release);
        self.state.event().trigger();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Voxel Thread {} panicked", self.index);
            }
        }
    }
}

fn run_worker(
    thread_index: usize,
    state: Arc<RuntimeState>,
    groups: Arc<TaskGroupArray>,
    time_to_die: Arc<AtomicBool>,
) {
    debug!("Voxel Thread {thread_index} started");

    let should_stop = || time_to_die.load(Ordering::Acquire) || state.is_exiting();
    while !should_stop() {
        state.event().wait(WORKER_WAIT);
        groups.update_priorities_if_needed(&state.config());

        while let Some(group) = groups.claim_group(thread_index) {
            group.process_tasks();
            group.release_claim(thread_index);

            if should_stop() {
                break;
            }
        }
    }

    debug!("Voxel Thread {thread_index} stopped");
}

#[derive(Debug)]
struct ExecutorActivity {
    was_busy: bool,
    busy_since: Instant,
}

/// Worker pool processing asynchronous task groups.
pub struct TaskExecutor {
    state: Arc<RuntimeState>,
    groups: Arc<TaskGroupArray>,
    threads: Mutex<Vec<WorkerThread>>,
    next_thread_index: AtomicUsize,
    activity: Mutex<ExecutorActivity>,
}

impl TaskExecutor {
    pub(crate) fn new(state: Arc<RuntimeState>) -> Self {
        Self {
            state,
            groups: Arc::new(TaskGroupArray::new()),
            threads: Mutex::new(Vec::new()),
            next_thread_index: AtomicUsize::new(1),
            activity: Mutex::new(ExecutorActivity {
                was_busy: false,
                busy_since: Instant::now(),
            }),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.threads.locked().len()
    }

    /// Registers an asynchronous group and wakes a worker.
    pub(crate) fn add_group(&self, group: &Arc<TaskGroup>) {
        if self.state.is_exiting() {
            return;
        }

        let config = self.state.config();
        if config.log_tasks {
            info!("New task group: {}", group.name());
        }

        self.groups.add(group, &config);
        self.state.event().trigger();
    }

    /// Number of live groups with ready or pending tasks.
    pub fn num_tasks(&self) -> usize {
        self.groups
            .live_groups()
            .iter()
            .filter(|group| group.has_tasks() || group.num_pending_tasks() > 0)
            .count()
    }

    /// Recomputes every group priority and re-sorts the list.
    pub fn update_priorities(&self) {
        self.groups.update_priorities(&self.state.config());
    }

    /// Applies the configured thread count, refreshes stale priorities and logs how long
    /// the last burst of work took.
    pub fn tick(&self) {
        if self.state.is_exiting() {
            return;
        }

        let config = self.state.config();
        self.set_num_threads(config.num_threads);
        self.groups.update_priorities_if_needed(&config);

        let is_busy = self.num_tasks() > 0;
        let mut activity = self.activity.locked();
        if is_busy && !activity.was_busy {
            activity.busy_since = Instant::now();
        }
        if !is_busy && activity.was_busy {
            debug!(
                "Tasks took {:.3}s",
                activity.busy_since.elapsed().as_secs_f64()
            );
        }
        activity.was_busy = is_busy;
    }

    fn set_num_threads(&self, num_threads: usize) {
        let num_threads = num_threads.clamp(1, MAX_NUM_THREADS);
        let mut threads = self.threads.locked();

        while threads.len() > num_threads {
            threads.pop();
        }

        while threads.len() < num_threads {
            let index = self.next_thread_index.fetch_add(1, Ordering::Relaxed);
            let time_to_die = Arc::new(AtomicBool::new(false));

            let state = self.state.clone();
            let groups = self.groups.clone();
            let worker_time_to_die = time_to_die.clone();
            let spawned = thread::Builder::new()
                .name(format!("Voxel Thread {index}"))
                .spawn(move || run_worker(index, state, groups, worker_time_to_die));

            match spawned {
                Ok(handle) => threads.push(WorkerThread {
                    index,
                    time_to_die,
                    state: self.state.clone(),
                    handle: Some(handle),
                }),
                Err(spawn_error) => {
                    error!("Failed to spawn Voxel Thread {index}: {spawn_error}");
                    break;
                }
            }
        }
    }

    /// Logs every live group and its pending tasks.
    pub fn log_all_tasks(&self) {
        let groups = self.groups.live_groups();
        info!("{} task groups", groups.len());
        for group in groups {
            group.log_tasks();
        }
    }

    /// Drops every group and joins the workers.
    pub(crate) fn shutdown(&self) {
        self.groups.clear();
        let threads = std::mem::take(&mut *self.threads.locked());
        drop(threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runtime::VoxelRuntime;
    use crate::task::future_value::Promise;
    use crate::task::priority::CameraPosition;
    use crate::math::{TransformRef, VoxelBox};
    use crate::value::{Value, ValueType};
    use cgmath::Point3;
    use std::sync::mpsc;

    fn test_runtime(num_threads: usize) -> VoxelRuntime {
        VoxelRuntime::new(RuntimeConfig {
            num_threads,
            ..RuntimeConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_event_trigger_wakes_waiter() {
        let event = WorkerEvent::default();
        event.trigger();
        assert!(event.wait(Duration::from_millis(1)));
        assert!(!event.wait(Duration::from_millis(1)));
    }

    #[test]
    fn test_workers_process_async_group() {
        let runtime = test_runtime(2);
        let group = TaskGroup::create(&runtime, "Async", TaskPriority::top());
        let (sender, receiver) = mpsc::channel();

        let ctx = group.context();
        let future = ctx
            .task("Produce")
            .execute_value(ValueType::Float, |_| Value::Float(8.0));
        let result = future.clone();
        ctx.task("Consume").dependency(&future).execute(move |_| {
            let _ = sender.send(result.value_checked());
        });

        let value = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(value, Value::Float(8.0));
    }

    #[test]
    fn test_dependency_resolved_from_outside_wakes_group() {
        let runtime = test_runtime(1);
        let group = TaskGroup::create(&runtime, "External", TaskPriority::top());
        let promise = Promise::new(ValueType::Int32, "External value");
        let (sender, receiver) = mpsc::channel();

        let future = promise.future();
        group
            .context()
            .task("Wait")
            .dependency(&future)
            .execute(move |_| {
                let _ = sender.send(future.value_checked());
            });

        std::thread::sleep(Duration::from_millis(20));
        promise.set_value(Value::Int32(5));

        let value = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(value, Value::Int32(5));
    }

    #[test]
    fn test_groups_are_sorted_by_priority() {
        let runtime = test_runtime(1);
        let camera = CameraPosition::default();
        let transform = TransformRef::identity("World");
        let cube = |offset: f64| {
            VoxelBox::new(
                Point3::new(offset, 0.0, 0.0),
                Point3::new(offset + 1.0, 1.0, 1.0),
            )
        };

        let far = TaskGroup::create(
            &runtime,
            "Far",
            TaskPriority::bounds(cube(100.0), 0.0, &camera, &transform),
        );
        let near = TaskGroup::create(
            &runtime,
            "Near",
            TaskPriority::bounds(cube(5.0), 0.0, &camera, &transform),
        );
        let top = TaskGroup::create(&runtime, "Top", TaskPriority::top());

        let names: Vec<String> = runtime
            .executor()
            .groups
            .live_groups()
            .iter()
            .map(|group| group.name().to_string())
            .collect();
        assert_eq!(names, vec!["Top", "Near", "Far"]);

        camera.set(Point3::new(100.5, 0.5, 0.5));
        runtime.executor().update_priorities();
        let names: Vec<String> = runtime
            .executor()
            .groups
            .live_groups()
            .iter()
            .map(|group| group.name().to_string())
            .collect();
        assert_eq!(names, vec!["Top", "Far", "Near"]);

        drop((far, near, top));
        runtime.executor().update_priorities();
        assert!(runtime.executor().groups.live_groups().is_empty());
    }

    #[test]
    fn test_dropped_group_is_cancelled() {
        let runtime = test_runtime(1);
        let group = TaskGroup::create(&runtime, "Dropped", TaskPriority::top());
        let promise = Promise::new(ValueType::Float, "Gate");
        let (sender, receiver) = mpsc::channel::<()>();

        let gate = promise.future();
        group
            .context()
            .task("Never runs")
            .dependency(&gate)
            .execute(move |_| {
                let _ = sender.send(());
            });

        drop(group);
        promise.set_value(Value::Float(1.0));
        assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
