//! # Math Module
//!
//! Double-precision bounds and shared transforms used to place brushes and queries in
//! the world.

pub mod bounds;
pub mod transform;

pub use bounds::{VoxelBox, INFINITE_EXTENT};
pub use transform::{TransformListener, TransformRef};
