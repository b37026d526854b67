//! # Task Graph
//!
//! Lock-light dependency-driven task scheduling. Work is expressed as a graph of tasks
//! producing [`FutureValue`]s; a task runs once every future it depends on is resolved.
//!
//! ## Components
//! - [`FutureValue`] / [`Promise`]: single-assignment values, known now or produced later
//! - [`Task`], [`TaskContext`], [`TaskBuilder`]: creating and scheduling work
//! - [`TaskGroup`]: a scheduling domain processed by one thread at a time
//! - [`TaskExecutor`]: the worker pool processing asynchronous groups by priority
//! - [`TaskPriority`]: fixed or camera-distance based group priorities
//! - [`try_run_synchronously`] and [`start_async_task`]: entry points from plain code
//!
//! ## Task Lifecycle
//! 1. A task is built through a context and registered on its unresolved dependencies
//! 2. The last dependency to resolve moves it from the group's pending set to its queue
//! 3. A worker, or the synchronous caller, claims the group and runs the task
//! 4. The task may schedule more tasks on the same group through its own context
//!
//! ## Example Usage
//! ```ignore
//! start_async_task(
//!     &runtime,
//!     "Height query",
//!     TaskPriority::top(),
//!     ValueType::FloatBuffer,
//!     move |ctx| height.get(ctx, &query).value,
//!     |value| log::info!("height: {value:?}"),
//! );
//! ```

pub mod executor;
pub mod future_value;
pub mod group;
pub mod helpers;
pub mod priority;
pub mod task;

pub use executor::TaskExecutor;
pub use future_value::{FutureValue, Promise, WaitFuture};
pub use group::TaskGroup;
pub use helpers::{start_async_task, try_run_synchronously};
pub use priority::{CameraPosition, TaskPriority};
pub use task::{Task, TaskBuilder, TaskContext};
