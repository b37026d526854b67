//! # Channels
//!
//! Named, typed values defined over space, composited from prioritized brushes.
//!
//! ## Components
//! - [`ChannelDefinition`] / [`ChannelRegistry`]: channel names, types and defaults
//! - [`WorldChannelManager`]: the channels of one world
//! - [`WorldChannel`]: the live brushes of a channel, handed out as [`BrushRef`]s
//! - [`RuntimeChannel`]: a channel seen from one runtime instance, with cached brush
//!   bounds and the dependency queries register on
//! - [`ChannelEvaluator`]: the compositing fold run by [`RuntimeChannel::get`]
//! - [`BrushPriority`]: the deterministic compositing order
//!
//! ## Example Usage
//! ```ignore
//! let world = runtime.create_world();
//! let _brush = register_brush(&world, "Height", Brush::new(
//!     "Plateau",
//!     BrushPriority::full(1, "/Graphs/Plateau", None, "/Level/Plateau_0"),
//!     plateau_bounds,
//!     plateau_transform.clone(),
//!     |ctx, query| compute_plateau(ctx, query),
//! ), None)?;
//!
//! let cache = RuntimeChannelCache::new(landscape_transform);
//! let height = world.find_runtime_channel("Height", &cache).ok_or(...)?;
//! let value = try_run_synchronously(&runtime, |ctx| height.get(ctx, &query).value)?;
//! ```

pub mod brush;
pub mod definition;
pub mod evaluator;
pub mod manager;
pub mod priority;
pub mod runtime_channel;
pub mod world_channel;

#[cfg(test)]
mod tests;

pub use brush::{Brush, BrushCompute, BrushId, BrushRef};
pub use definition::{ChannelDefinition, ChannelRegistry};
pub use evaluator::ChannelEvaluator;
pub use manager::{register_brush, WorldChannelManager};
pub use priority::BrushPriority;
pub use runtime_channel::{ChannelFuture, RuntimeChannel, RuntimeChannelCache};
pub use world_channel::WorldChannel;
