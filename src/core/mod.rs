//! # Core Module
//!
//! Foundation shared by every other module of the crate.
//!
//! ## Components
//! - `check`: the `ensure_voxel!` consistency check
//! - `config`: [`RuntimeConfig`] and its console variables
//! - `error`: [`VoxelError`] and [`VoxelResult`]
//! - `message`: the [`MessageLog`] diagnostics sink
//! - `runtime`: the [`VoxelRuntime`] context object
//! - `sparse_array`: generation-checked slot storage
//! - `sync`: poison-tolerant lock helpers

#[macro_use]
pub mod check;
pub mod config;
pub mod error;
pub mod message;
pub mod runtime;
pub mod sparse_array;
pub mod sync;

pub use config::RuntimeConfig;
pub use error::{VoxelError, VoxelResult};
pub use message::{MessageLog, MessageSeverity, VoxelMessage};
pub use runtime::{RuntimeState, VoxelRuntime};
pub use sparse_array::{SparseArray, SparseId};
