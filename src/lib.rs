#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Voxel Graph Core
//!
//! The evaluation core of a voxel graph runtime: a dependency-driven task graph, spatial
//! dependency tracking, chunked value buffers and prioritized brush compositing over
//! named channels.
//!
//! ## Key Modules
//!
//! * `core` - Configuration, errors, messages and the [`VoxelRuntime`] context
//! * `task` - Futures, tasks, task groups and the worker pool
//! * `dependency` - Invalidation sources and the trackers queries record them in
//! * `buffer` - Chunked buffers, gather/scatter and surfaces
//! * `query` - Query parameters and the [`Query`](query::Query) bundle
//! * `channel` - Channel definitions, brushes and the compositing evaluator
//! * `math` - Bounds and observable transforms
//!
//! ## Architecture
//!
//! Queries flow through the crate as follows:
//! * A caller builds a query holding positions, parameters and a dependency tracker
//! * The channel evaluator collects the brushes overlapping the query and folds them in
//!   priority order, one task per brush
//! * Tasks run on the worker threads, or on the calling thread for synchronous groups
//! * Brush or transform changes invalidate the trackers of every query they affect
//!
//! ## Usage
//!
//! ```ignore
//! voxel_graph_core::init_logger();
//!
//! let runtime = VoxelRuntime::new(RuntimeConfig::default())?;
//! runtime.channel_registry().register_channel(ChannelDefinition::new(
//!     "Height",
//!     ValueType::FloatBuffer,
//!     Value::constant_float_buffer(0.0),
//! )?)?;
//!
//! let world = runtime.create_world();
//! let cache = RuntimeChannelCache::new(TransformRef::identity("Landscape"));
//! let height = world.find_runtime_channel("Height", &cache).ok_or(...)?;
//! let value = try_run_synchronously(&runtime, |ctx| height.get(ctx, &query).value)?;
//! ```
//!
//! ## Performance Considerations
//!
//! * Buffers are stored in fixed-size chunks and constants are never expanded
//! * Brushes only run on the query positions inside their bounds
//! * Task groups are claimed by one thread at a time and drained without locking the
//!   group for every task
//! * Priorities are recomputed in parallel and only periodically

#[macro_use]
pub mod core;

pub mod buffer;
pub mod channel;
pub mod dependency;
pub mod math;
pub mod query;
pub mod task;
pub mod value;

pub use crate::core::{RuntimeConfig, VoxelError, VoxelResult, VoxelRuntime};

use log::info;

/// Initializes logging to stdout, filtered by `RUST_LOG`. Does nothing if a logger is
/// already installed.
pub fn init_logger() {
    let mut log_builder = env_logger::Builder::new();
    let result = log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .try_init();

    if result.is_ok() {
        info!("Logger initialized");
    }
}
