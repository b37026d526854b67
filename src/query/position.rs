//! Query positions and bounds-based position filtering.

use bitvec::prelude::*;
use std::sync::OnceLock;

use super::parameters::QueryParameter;
use crate::buffer::{Int32Buffer, VectorBuffer};
use crate::math::VoxelBox;

/// Tolerance applied to filter bounds so positions on a brush boundary are never lost
/// to float rounding.
const FILTER_TOLERANCE: f64 = 1e-4;

/// Positions a query evaluates at, in query space.
#[derive(Debug)]
pub struct PositionQueryParameter {
    positions: VectorBuffer,
    bounds: OnceLock<VoxelBox>,
}

impl QueryParameter for PositionQueryParameter {}

/// Positions inside some bounds, with their indices in the queried buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFilter {
    pub indices: Int32Buffer,
    pub positions: VectorBuffer,
}

impl PositionFilter {
    pub fn num(&self) -> usize {
        self.indices.num()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl PositionQueryParameter {
    pub fn new(positions: VectorBuffer) -> Self {
        Self {
            positions,
            bounds: OnceLock::new(),
        }
    }

    pub fn positions(&self) -> &VectorBuffer {
        &self.positions
    }

    pub fn num(&self) -> usize {
        self.positions.num()
    }

    /// Bounds of every position, computed once. Empty positions give a degenerate box at
    /// the origin.
    pub fn bounds(&self) -> VoxelBox {
        *self.bounds.get_or_init(|| {
            self.positions
                .bounds()
                .unwrap_or_else(|| VoxelBox::from_point(cgmath::Point3::new(0.0, 0.0, 0.0)))
        })
    }

    /// Positions inside `bounds`.
    ///
    /// # Returns
    /// - `None` if `bounds` contains every position, so no filtering is needed
    /// - An empty filter if `bounds` misses every position
    /// - Otherwise the indices and positions inside `bounds`
    pub fn try_filter(&self, bounds: &VoxelBox) -> Option<PositionFilter> {
        let all_bounds = self.bounds();
        if !bounds.intersect(&all_bounds) {
            return Some(PositionFilter {
                indices: Int32Buffer::new(),
                positions: VectorBuffer::default(),
            });
        }
        if bounds.contains(&all_bounds) {
            return None;
        }

        let bounds = bounds.extend(FILTER_TOLERANCE);
        let num = self.positions.num();

        let mut inside = bitvec![0; num];
        for index in 0..num {
            if bounds.contains_point(self.positions.point(index)) {
                inside.set(index, true);
            }
        }

        let mut filter = PositionFilter {
            indices: Int32Buffer::new(),
            positions: VectorBuffer::default(),
        };
        for index in inside.iter_ones() {
            filter.indices.push(index as i32);
            filter.positions.push(self.positions.get(index));
        }
        Some(filter)
    }
}
