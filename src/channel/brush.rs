//! Brushes: prioritized, bounded contributions to a channel.

use std::fmt;
use std::sync::{Arc, Weak};

use super::priority::BrushPriority;
use super::world_channel::WorldChannel;
use crate::core::sparse_array::SparseId;
use crate::math::{TransformRef, VoxelBox};
use crate::query::Query;
use crate::task::{FutureValue, TaskContext};

/// Computes a brush's value for a query. Receives the value below the brush through
/// [`PreviousChannelValueQueryParameter`](crate::query::PreviousChannelValueQueryParameter).
pub type BrushCompute = dyn Fn(&TaskContext<'_>, &Query) -> FutureValue + Send + Sync;

/// One contribution to a channel.
///
/// A brush only affects positions inside its bounds. Brushes with a higher priority run
/// after, and see the output of, brushes with a lower one.
pub struct Brush {
    debug_name: String,
    priority: BrushPriority,
    local_bounds: VoxelBox,
    local_to_world: TransformRef,
    compute: Arc<BrushCompute>,
}

impl fmt::Debug for Brush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Brush")
            .field("debug_name", &self.debug_name)
            .field("priority", &self.priority)
            .field("local_bounds", &self.local_bounds)
            .finish()
    }
}

impl Brush {
    /// # Arguments
    /// * `debug_name` - Name used in task names and logs
    /// * `priority` - Position of the brush in the compositing order
    /// * `local_bounds` - Region the brush affects, in its local space
    /// * `local_to_world` - Transform of the brush
    /// * `compute` - Produces the brush value for a query in the query's space
    pub fn new(
        debug_name: impl Into<String>,
        priority: BrushPriority,
        local_bounds: VoxelBox,
        local_to_world: TransformRef,
        compute: impl Fn(&TaskContext<'_>, &Query) -> FutureValue + Send + Sync + 'static,
    ) -> Self {
        Self {
            debug_name: debug_name.into(),
            priority,
            local_bounds,
            local_to_world,
            compute: Arc::new(compute),
        }
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn priority(&self) -> BrushPriority {
        self.priority
    }

    pub fn local_bounds(&self) -> &VoxelBox {
        &self.local_bounds
    }

    pub fn local_to_world(&self) -> &TransformRef {
        &self.local_to_world
    }

    pub fn compute(&self, ctx: &TaskContext<'_>, query: &Query) -> FutureValue {
        (self.compute)(ctx, query)
    }
}

/// Stable id of a brush within its world channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrushId(pub(crate) SparseId);

/// Registration handle of a brush. Dropping it removes the brush.
#[must_use = "dropping a BrushRef removes the brush"]
pub struct BrushRef {
    channel: Weak<WorldChannel>,
    id: Option<BrushId>,
}

impl fmt::Debug for BrushRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrushRef").field("id", &self.id).finish()
    }
}

impl BrushRef {
    pub(crate) fn new(channel: &Arc<WorldChannel>, id: BrushId) -> Self {
        Self {
            channel: Arc::downgrade(channel),
            id: Some(id),
        }
    }

    pub fn id(&self) -> Option<BrushId> {
        self.id
    }

    /// True if the handle belongs to `channel`.
    pub(crate) fn is_for(&self, channel: &Arc<WorldChannel>) -> bool {
        Weak::ptr_eq(&self.channel, &Arc::downgrade(channel))
    }

    /// Disarms the handle, leaving removal to the caller.
    pub(crate) fn release(mut self) -> Option<BrushId> {
        self.id.take()
    }
}

impl Drop for BrushRef {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        if let Some(channel) = self.channel.upgrade() {
            channel.remove_brush(id);
        }
    }
}
