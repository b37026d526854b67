//! Typed buffers built on [`BufferStorage`].

use cgmath::{Point3, Vector3};

use super::gather_scatter::{gather, scatter};
use super::storage::BufferStorage;
use crate::math::VoxelBox;
use crate::value::{Value, ValueType};

pub type FloatBuffer = BufferStorage<f32>;
pub type Int32Buffer = BufferStorage<i32>;

/// Structure-of-arrays vector buffer. Each component may be constant on its own.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VectorBuffer {
    pub x: FloatBuffer,
    pub y: FloatBuffer,
    pub z: FloatBuffer,
}

impl VectorBuffer {
    pub fn new(x: FloatBuffer, y: FloatBuffer, z: FloatBuffer) -> Self {
        let vector = Self { x, y, z };
        ensure_voxel!(
            [&vector.x, &vector.y, &vector.z]
                .iter()
                .all(|component| component.is_constant() || component.num() == vector.num()),
            "vector buffer components have mismatched sizes {}, {}, {}",
            vector.x.num(),
            vector.y.num(),
            vector.z.num()
        );
        vector
    }

    pub fn constant(value: Vector3<f32>) -> Self {
        Self {
            x: FloatBuffer::constant(value.x),
            y: FloatBuffer::constant(value.y),
            z: FloatBuffer::constant(value.z),
        }
    }

    pub fn from_points(points: &[Point3<f32>]) -> Self {
        Self {
            x: points.iter().map(|point| point.x).collect(),
            y: points.iter().map(|point| point.y).collect(),
            z: points.iter().map(|point| point.z).collect(),
        }
    }

    pub fn num(&self) -> usize {
        self.x.num().max(self.y.num()).max(self.z.num())
    }

    pub fn is_constant(&self) -> bool {
        self.x.is_constant() && self.y.is_constant() && self.z.is_constant()
    }

    pub fn get(&self, index: usize) -> Vector3<f32> {
        Vector3::new(self.x[index], self.y[index], self.z[index])
    }

    pub fn point(&self, index: usize) -> Point3<f64> {
        Point3::new(
            self.x[index] as f64,
            self.y[index] as f64,
            self.z[index] as f64,
        )
    }

    pub fn push(&mut self, value: Vector3<f32>) -> usize {
        self.x.push(value.x);
        self.y.push(value.y);
        self.z.push(value.z)
    }

    /// Bounds of every position, `None` when empty.
    pub fn bounds(&self) -> Option<VoxelBox> {
        VoxelBox::from_points((0..self.num()).map(|index| self.point(index)))
    }

    pub fn gather(&self, indices: &Int32Buffer) -> Self {
        Self {
            x: gather(&self.x, indices),
            y: gather(&self.y, indices),
            z: gather(&self.z, indices),
        }
    }

    pub fn scatter(&self, num: usize, filtered: &VectorBuffer, indices: &Int32Buffer) -> Self {
        Self {
            x: scatter(&self.x, num, &filtered.x, indices),
            y: scatter(&self.y, num, &filtered.y, indices),
            z: scatter(&self.z, num, &filtered.z, indices),
        }
    }
}

/// A buffer of any supported element type.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    Float(FloatBuffer),
    Int32(Int32Buffer),
    Vector(VectorBuffer),
}

impl Buffer {
    /// Constant buffer broadcasting a scalar value.
    pub fn constant(value: &Value) -> Option<Self> {
        match value {
            Value::Float(value) => Some(Buffer::Float(FloatBuffer::constant(*value))),
            Value::Int32(value) => Some(Buffer::Int32(Int32Buffer::constant(*value))),
            Value::Vector(value) => Some(Buffer::Vector(VectorBuffer::constant(*value))),
            _ => None,
        }
    }

    /// Constant zero buffer of the given element type.
    pub fn zero(inner_type: ValueType) -> Option<Self> {
        match inner_type {
            ValueType::Float => Some(Buffer::Float(FloatBuffer::constant(0.0))),
            ValueType::Int32 => Some(Buffer::Int32(Int32Buffer::constant(0))),
            ValueType::Vector => Some(Buffer::Vector(VectorBuffer::constant(Vector3::new(
                0.0, 0.0, 0.0,
            )))),
            _ => None,
        }
    }

    pub fn num(&self) -> usize {
        match self {
            Buffer::Float(buffer) => buffer.num(),
            Buffer::Int32(buffer) => buffer.num(),
            Buffer::Vector(buffer) => buffer.num(),
        }
    }

    pub fn is_constant(&self) -> bool {
        match self {
            Buffer::Float(buffer) => buffer.is_constant(),
            Buffer::Int32(buffer) => buffer.is_constant(),
            Buffer::Vector(buffer) => buffer.is_constant(),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Buffer::Float(_) => ValueType::FloatBuffer,
            Buffer::Int32(_) => ValueType::Int32Buffer,
            Buffer::Vector(_) => ValueType::VectorBuffer,
        }
    }

    pub fn inner_type(&self) -> ValueType {
        match self {
            Buffer::Float(_) => ValueType::Float,
            Buffer::Int32(_) => ValueType::Int32,
            Buffer::Vector(_) => ValueType::Vector,
        }
    }

    pub fn as_float(&self) -> Option<&FloatBuffer> {
        match self {
            Buffer::Float(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_int32(&self) -> Option<&Int32Buffer> {
        match self {
            Buffer::Int32(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&VectorBuffer> {
        match self {
            Buffer::Vector(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Selects the elements at `indices`. A constant buffer stays constant.
    pub fn gather(&self, indices: &Int32Buffer) -> Self {
        match self {
            Buffer::Float(buffer) => Buffer::Float(gather(buffer, indices)),
            Buffer::Int32(buffer) => Buffer::Int32(gather(buffer, indices)),
            Buffer::Vector(buffer) => Buffer::Vector(buffer.gather(indices)),
        }
    }

    /// Writes `filtered` back at `indices` over a copy of this buffer expanded to `num`.
    ///
    /// # Returns
    /// `None` if `filtered` holds a different element type.
    pub fn scatter(&self, num: usize, filtered: &Buffer, indices: &Int32Buffer) -> Option<Self> {
        Some(match (self, filtered) {
            (Buffer::Float(base), Buffer::Float(filtered)) => {
                Buffer::Float(scatter(base, num, filtered, indices))
            }
            (Buffer::Int32(base), Buffer::Int32(filtered)) => {
                Buffer::Int32(scatter(base, num, filtered, indices))
            }
            (Buffer::Vector(base), Buffer::Vector(filtered)) => {
                Buffer::Vector(base.scatter(num, filtered, indices))
            }
            _ => return None,
        })
    }

    /// True if a float component holds a NaN or an infinity.
    pub fn has_non_finite(&self) -> bool {
        let non_finite = |buffer: &FloatBuffer| buffer.iter().any(|value| !value.is_finite());
        match self {
            Buffer::Float(buffer) => non_finite(buffer),
            Buffer::Int32(_) => false,
            Buffer::Vector(buffer) => {
                non_finite(&buffer.x) || non_finite(&buffer.y) || non_finite(&buffer.z)
            }
        }
    }
}
