//! Typed values flowing through the task graph.
//!
//! Every [`FutureValue`](crate::task::FutureValue) resolves to a [`Value`]. Buffers and
//! surfaces are shared behind `Arc`, so copying a value between tasks never copies data.

use cgmath::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::buffer::{Buffer, FloatBuffer, Int32Buffer, Surface, VectorBuffer};

/// Runtime type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Float,
    Int32,
    Vector,
    FloatBuffer,
    Int32Buffer,
    VectorBuffer,
    Surface,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Float => "Float",
            ValueType::Int32 => "Int32",
            ValueType::Vector => "Vector",
            ValueType::FloatBuffer => "FloatBuffer",
            ValueType::Int32Buffer => "Int32Buffer",
            ValueType::VectorBuffer => "VectorBuffer",
            ValueType::Surface => "Surface",
        };
        f.write_str(name)
    }
}

impl ValueType {
    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            ValueType::FloatBuffer | ValueType::Int32Buffer | ValueType::VectorBuffer
        )
    }

    /// Buffer type holding elements of this scalar type.
    pub fn buffer_type(self) -> Option<ValueType> {
        match self {
            ValueType::Float => Some(ValueType::FloatBuffer),
            ValueType::Int32 => Some(ValueType::Int32Buffer),
            ValueType::Vector => Some(ValueType::VectorBuffer),
            _ => None,
        }
    }

    /// Element type of this buffer type.
    pub fn inner_type(self) -> Option<ValueType> {
        match self {
            ValueType::FloatBuffer => Some(ValueType::Float),
            ValueType::Int32Buffer => Some(ValueType::Int32),
            ValueType::VectorBuffer => Some(ValueType::Vector),
            _ => None,
        }
    }

    /// Zero for scalars, a constant zero for buffers and an empty surface.
    pub fn default_value(self) -> Value {
        match self {
            ValueType::Float => Value::Float(0.0),
            ValueType::Int32 => Value::Int32(0),
            ValueType::Vector => Value::Vector(Vector3::new(0.0, 0.0, 0.0)),
            ValueType::FloatBuffer => Buffer::Float(FloatBuffer::constant(0.0)).into(),
            ValueType::Int32Buffer => Buffer::Int32(Int32Buffer::constant(0)).into(),
            ValueType::VectorBuffer => {
                Buffer::Vector(VectorBuffer::constant(Vector3::new(0.0, 0.0, 0.0))).into()
            }
            ValueType::Surface => Surface::default().into(),
        }
    }
}

/// A resolved value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f32),
    Int32(i32),
    Vector(Vector3<f32>),
    Buffer(Arc<Buffer>),
    Surface(Arc<Surface>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Float(_) => ValueType::Float,
            Value::Int32(_) => ValueType::Int32,
            Value::Vector(_) => ValueType::Vector,
            Value::Buffer(buffer) => buffer.value_type(),
            Value::Surface(_) => ValueType::Surface,
        }
    }

    /// Constant float buffer, the usual shape of a channel default.
    pub fn constant_float_buffer(value: f32) -> Self {
        Buffer::Float(FloatBuffer::constant(value)).into()
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Arc<Buffer>> {
        match self {
            Value::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_float_buffer(&self) -> Option<&FloatBuffer> {
        self.as_buffer().and_then(|buffer| buffer.as_float())
    }

    pub fn as_surface(&self) -> Option<&Arc<Surface>> {
        match self {
            Value::Surface(surface) => Some(surface),
            _ => None,
        }
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<Buffer> for Value {
    fn from(buffer: Buffer) -> Self {
        Value::Buffer(Arc::new(buffer))
    }
}

impl From<FloatBuffer> for Value {
    fn from(buffer: FloatBuffer) -> Self {
        Buffer::Float(buffer).into()
    }
}

impl From<Surface> for Value {
    fn from(surface: Surface) -> Self {
        Value::Surface(Arc::new(surface))
    }
}
