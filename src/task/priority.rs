//! Task group priorities.
//!
//! Groups are processed in ascending priority value. [`TaskPriority::top`] always comes
//! first. A bounds-based priority is the squared distance from the camera to the bounds,
//! plus a signed squared offset that lets callers push work ahead of or behind its
//! neighbors.

use cgmath::{EuclideanSpace, Point3};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::core::sync::RwLockExt;
use crate::math::{TransformRef, VoxelBox};

/// Shared world-space camera position.
#[derive(Clone)]
pub struct CameraPosition(Arc<RwLock<Point3<f64>>>);

impl Default for CameraPosition {
    fn default() -> Self {
        Self(Arc::new(RwLock::new(Point3::origin())))
    }
}

impl fmt::Debug for CameraPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CameraPosition").field(&self.get()).finish()
    }
}

impl CameraPosition {
    pub fn get(&self) -> Point3<f64> {
        *self.0.read_locked()
    }

    pub fn set(&self, position: Point3<f64>) {
        *self.0.write_locked() = position;
    }
}

#[derive(Clone, Debug)]
struct BoundsPriority {
    bounds: VoxelBox,
    offset: f64,
    camera: CameraPosition,
    local_to_world: TransformRef,
}

/// Priority of a task group. Lower values run first.
#[derive(Clone, Debug, Default)]
pub struct TaskPriority {
    bounds: Option<BoundsPriority>,
}

impl TaskPriority {
    /// Highest priority, ahead of every bounds-based one.
    pub fn top() -> Self {
        Self::default()
    }

    /// Priority decreasing with the camera's distance to `bounds`.
    ///
    /// # Arguments
    /// * `bounds` - Region the group computes, in the space of `local_to_world`
    /// * `offset` - Signed bias added as `offset * |offset|`
    /// * `camera` - Camera position, re-read every time priorities are refreshed
    /// * `local_to_world` - Transform of the space `bounds` is expressed in
    pub fn bounds(
        bounds: VoxelBox,
        offset: f64,
        camera: &CameraPosition,
        local_to_world: &TransformRef,
    ) -> Self {
        Self {
            bounds: Some(BoundsPriority {
                bounds,
                offset,
                camera: camera.clone(),
                local_to_world: local_to_world.clone(),
            }),
        }
    }

    pub fn priority_value(&self) -> f64 {
        let Some(priority) = &self.bounds else {
            return -1.0;
        };

        let camera = priority
            .local_to_world
            .inverse_transform_point(priority.camera.get());
        priority.bounds.squared_distance_to_point(camera) + priority.offset * priority.offset.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Matrix4, Vector3};

    #[test]
    fn test_top_priority_is_negative() {
        assert_eq!(TaskPriority::top().priority_value(), -1.0);
    }

    #[test]
    fn test_bounds_priority_follows_camera() {
        let camera = CameraPosition::default();
        let transform = TransformRef::identity("World");
        let bounds = VoxelBox::new(Point3::new(10.0, 0.0, 0.0), Point3::new(11.0, 1.0, 1.0));

        let priority = TaskPriority::bounds(bounds, 0.0, &camera, &transform);
        assert_eq!(priority.priority_value(), 100.0);

        camera.set(Point3::new(10.5, 0.5, 0.5));
        assert_eq!(priority.priority_value(), 0.0);

        let behind = TaskPriority::bounds(bounds, -2.0, &camera, &transform);
        assert_eq!(behind.priority_value(), -4.0);
    }

    #[test]
    fn test_bounds_priority_uses_local_space() {
        let camera = CameraPosition::default();
        let transform = TransformRef::new(
            "Shifted",
            Matrix4::from_translation(Vector3::new(-10.0, 0.0, 0.0)),
        );
        let bounds = VoxelBox::new(Point3::new(10.0, 0.0, 0.0), Point3::new(11.0, 1.0, 1.0));

        let priority = TaskPriority::bounds(bounds, 0.0, &camera, &transform);
        assert_eq!(priority.priority_value(), 0.0);
    }
}
