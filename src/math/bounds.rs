//! # Axis-Aligned Bounds
//!
//! [`VoxelBox`] is the double-precision box every spatial decision in the crate is made
//! with: brush culling, position filtering, invalidation regions and task priorities.
//!
//! ## Infinite Boxes
//!
//! A box spanning `±INFINITE_EXTENT` on every axis is treated as infinite. Infinite boxes
//! survive `extend` and `transform_by` unchanged, so an infinite brush stays infinite no
//! matter which transform it is placed under.

use cgmath::{EuclideanSpace, Matrix4, Point3, Transform};

/// Half-size of an infinite box.
pub const INFINITE_EXTENT: f64 = 1e30;

/// Axis-aligned box with inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelBox {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl VoxelBox {
    /// The box containing everything.
    pub const INFINITE: VoxelBox = VoxelBox {
        min: Point3 {
            x: -INFINITE_EXTENT,
            y: -INFINITE_EXTENT,
            z: -INFINITE_EXTENT,
        },
        max: Point3 {
            x: INFINITE_EXTENT,
            y: INFINITE_EXTENT,
            z: INFINITE_EXTENT,
        },
    };

    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Degenerate box around a single point.
    pub fn from_point(point: Point3<f64>) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// Smallest box containing every point, or `None` for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = Point3<f64>>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = Self::from_point(points.next()?);
        Some(points.fold(first, |bounds, point| bounds.union(&Self::from_point(point))))
    }

    pub fn is_infinite(&self) -> bool {
        self.min.x <= -INFINITE_EXTENT
            && self.min.y <= -INFINITE_EXTENT
            && self.min.z <= -INFINITE_EXTENT
            && self.max.x >= INFINITE_EXTENT
            && self.max.y >= INFINITE_EXTENT
            && self.max.z >= INFINITE_EXTENT
    }

    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    pub fn size(&self) -> cgmath::Vector3<f64> {
        self.max - self.min
    }

    pub fn center(&self) -> Point3<f64> {
        self.min.midpoint(self.max)
    }

    /// True if the boxes overlap. Touching faces count as overlapping.
    pub fn intersect(&self, other: &VoxelBox) -> bool {
        !(self.min.x > other.max.x
            || other.min.x > self.max.x
            || self.min.y > other.max.y
            || other.min.y > self.max.y
            || self.min.z > other.max.z
            || other.min.z > self.max.z)
    }

    /// True if `other` lies entirely inside this box.
    pub fn contains(&self, other: &VoxelBox) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && other.max.x <= self.max.x
            && other.max.y <= self.max.y
            && other.max.z <= self.max.z
    }

    pub fn contains_point(&self, point: Point3<f64>) -> bool {
        self.min.x <= point.x
            && point.x <= self.max.x
            && self.min.y <= point.y
            && point.y <= self.max.y
            && self.min.z <= point.z
            && point.z <= self.max.z
    }

    /// Grows the box by `amount` on every side. Infinite boxes are returned unchanged.
    pub fn extend(&self, amount: f64) -> Self {
        if self.is_infinite() {
            return *self;
        }
        Self {
            min: Point3::new(self.min.x - amount, self.min.y - amount, self.min.z - amount),
            max: Point3::new(self.max.x + amount, self.max.y + amount, self.max.z + amount),
        }
    }

    pub fn union(&self, other: &VoxelBox) -> Self {
        Self {
            min: Point3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Point3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }

    /// Bounds of this box after applying `transform` to its eight corners.
    pub fn transform_by(&self, transform: &Matrix4<f64>) -> Self {
        if self.is_infinite() {
            return *self;
        }

        let corners = (0..8).map(|corner| {
            let point = Point3::new(
                if corner & 1 == 0 { self.min.x } else { self.max.x },
                if corner & 2 == 0 { self.min.y } else { self.max.y },
                if corner & 4 == 0 { self.min.z } else { self.max.z },
            );
            transform.transform_point(point)
        });

        Self::from_points(corners).unwrap_or(*self)
    }

    /// Squared distance from `point` to the closest point of the box. Zero inside.
    pub fn squared_distance_to_point(&self, point: Point3<f64>) -> f64 {
        let axis = |value: f64, min: f64, max: f64| {
            if value < min {
                min - value
            } else if value > max {
                value - max
            } else {
                0.0
            }
        };

        let dx = axis(point.x, self.min.x, self.max.x);
        let dy = axis(point.y, self.min.y, self.max.y);
        let dz = axis(point.z, self.min.z, self.max.z);
        dx * dx + dy * dy + dz * dz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Vector3;

    fn unit_box() -> VoxelBox {
        VoxelBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_intersect_and_contains() {
        let a = unit_box();
        let b = VoxelBox::new(Point3::new(0.5, 0.5, 0.5), Point3::new(2.0, 2.0, 2.0));
        let far = VoxelBox::new(Point3::new(5.0, 5.0, 5.0), Point3::new(6.0, 6.0, 6.0));

        assert!(a.intersect(&b));
        assert!(!a.intersect(&far));
        assert!(!a.contains(&b));
        assert!(VoxelBox::INFINITE.contains(&b));
        assert!(a.contains_point(Point3::new(1.0, 0.0, 0.5)));
    }

    #[test]
    fn test_infinite_box_survives_extend_and_transform() {
        let translation = Matrix4::from_translation(Vector3::new(100.0, 0.0, 0.0));
        assert!(VoxelBox::INFINITE.extend(10.0).is_infinite());
        assert!(VoxelBox::INFINITE.transform_by(&translation).is_infinite());
    }

    #[test]
    fn test_transform_by_translation_and_scale() {
        let transform = Matrix4::from_translation(Vector3::new(10.0, 0.0, 0.0))
            * Matrix4::from_scale(2.0);
        let moved = unit_box().transform_by(&transform);
        assert_eq!(moved.min, Point3::new(10.0, 0.0, 0.0));
        assert_eq!(moved.max, Point3::new(12.0, 2.0, 2.0));
    }

    #[test]
    fn test_squared_distance() {
        let bounds = unit_box();
        assert_eq!(bounds.squared_distance_to_point(Point3::new(0.5, 0.5, 0.5)), 0.0);
        assert_eq!(bounds.squared_distance_to_point(Point3::new(3.0, 0.5, 0.5)), 4.0);
        assert_eq!(bounds.squared_distance_to_point(Point3::new(-1.0, 2.0, 0.5)), 2.0);
    }

    #[test]
    fn test_from_points_and_union() {
        let bounds = VoxelBox::from_points([
            Point3::new(1.0, -2.0, 3.0),
            Point3::new(-1.0, 4.0, 0.0),
        ])
        .unwrap();
        assert_eq!(bounds.min, Point3::new(-1.0, -2.0, 0.0));
        assert_eq!(bounds.max, Point3::new(1.0, 4.0, 3.0));
        assert!(VoxelBox::from_points(std::iter::empty()).is_none());

        let union = unit_box().union(&bounds);
        assert!(union.contains(&unit_box()));
        assert!(union.contains(&bounds));
    }
}
