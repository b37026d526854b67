//! Entry points for running a computation outside of any task.

use std::sync::Arc;

use super::future_value::FutureValue;
use super::group::TaskGroup;
use super::priority::TaskPriority;
use super::task::TaskContext;
use crate::core::error::{VoxelError, VoxelResult};
use crate::core::runtime::VoxelRuntime;
use crate::value::{Value, ValueType};

/// Builds a computation in a fresh synchronous group and runs it to completion on the
/// calling thread.
///
/// # Returns
/// The resolved value, or [`VoxelError::SynchronousEvaluation`] if some task is still
/// waiting on a dependency nobody will resolve.
///
/// # Examples
/// ```ignore
/// let height = try_run_synchronously(&runtime, |ctx| {
///     height_channel.get(ctx, &query).value
/// })?;
/// ```
pub fn try_run_synchronously(
    runtime: &VoxelRuntime,
    compute: impl FnOnce(&TaskContext<'_>) -> FutureValue,
) -> VoxelResult<Value> {
    let group = TaskGroup::create_synchronous(runtime, "TryRunSynchronously");
    let future = group.run_synchronously(compute)?;

    future.value().ok_or_else(|| {
        VoxelError::SynchronousEvaluation(format!(
            "Result of type {} depends on work outside the synchronous group",
            future.value_type()
        ))
    })
}

/// Runs a computation on the worker threads and hands its value to `callback`.
///
/// The group keeps itself alive until the callback ran, so the caller doesn't need to
/// hold on to anything.
///
/// # Arguments
/// * `runtime` - Runtime whose workers run the computation
/// * `name` - Name of the group and its tasks
/// * `priority` - Priority of the group
/// * `value_type` - Type `compute` resolves to
/// * `compute` - Builds the computation
/// * `callback` - Receives the resolved value on a worker thread
pub fn start_async_task(
    runtime: &VoxelRuntime,
    name: impl Into<String>,
    priority: TaskPriority,
    value_type: ValueType,
    compute: impl FnOnce(&TaskContext<'_>) -> FutureValue + Send + 'static,
    callback: impl FnOnce(Value) + Send + 'static,
) {
    let name = name.into();
    let group = TaskGroup::create(runtime, name.clone(), priority);
    let keep_alive: Arc<TaskGroup> = group.clone();

    let ctx = group.context();
    let future = ctx.task(name.clone()).execute_future(value_type, compute);
    let result = future.clone();
    ctx.task(format!("{name} callback"))
        .dependency(&future)
        .execute(move |_| {
            let _group = keep_alive;
            callback(result.value_checked());
        });
}
