//! Surfaces: bounded bundles of named attribute buffers.
//!
//! A surface channel carries one buffer per attribute (distance, height, material...)
//! evaluated at the query positions. Brushes on a surface channel only override the
//! attributes they output.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::typed::{Buffer, FloatBuffer, Int32Buffer};
use crate::math::VoxelBox;
use crate::value::ValueType;

pub const DISTANCE: &str = "Distance";
pub const HEIGHT: &str = "Height";
pub const MATERIAL: &str = "Material";

/// Named attribute buffers over a region.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    bounds: VoxelBox,
    attributes: BTreeMap<String, Arc<Buffer>>,
}

impl Default for Surface {
    fn default() -> Self {
        Self::new(VoxelBox::INFINITE)
    }
}

impl Surface {
    pub fn new(bounds: VoxelBox) -> Self {
        Self {
            bounds,
            attributes: BTreeMap::new(),
        }
    }

    pub fn bounds(&self) -> &VoxelBox {
        &self.bounds
    }

    pub fn set_bounds(&mut self, bounds: VoxelBox) {
        self.bounds = bounds;
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Buffer>> {
        self.attributes.get(name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn set(&mut self, name: impl Into<String>, buffer: impl Into<Arc<Buffer>>) {
        self.attributes.insert(name.into(), buffer.into());
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Arc<Buffer>)> {
        self.attributes
            .iter()
            .map(|(name, buffer)| (name.as_str(), buffer))
    }

    pub fn num_attributes(&self) -> usize {
        self.attributes.len()
    }

    /// Value of an attribute nobody wrote yet: `+inf` distance, `-inf` height, zero otherwise.
    pub fn default_attribute(name: &str, inner_type: ValueType) -> Buffer {
        match (name, inner_type) {
            (DISTANCE, ValueType::Float) => Buffer::Float(FloatBuffer::constant(f32::INFINITY)),
            (HEIGHT, ValueType::Float) => Buffer::Float(FloatBuffer::constant(f32::NEG_INFINITY)),
            _ => Buffer::zero(inner_type).unwrap_or(Buffer::Float(FloatBuffer::constant(0.0))),
        }
    }

    /// The attribute, or its default if this surface doesn't have it.
    pub fn get_or_default(&self, name: &str, inner_type: ValueType) -> Arc<Buffer> {
        self.get(name)
            .cloned()
            .unwrap_or_else(|| Arc::new(Self::default_attribute(name, inner_type)))
    }

    /// Surface with every attribute gathered at `indices`.
    pub fn gather(&self, indices: &Int32Buffer) -> Surface {
        Surface {
            bounds: self.bounds,
            attributes: self
                .attributes
                .iter()
                .map(|(name, buffer)| (name.clone(), Arc::new(buffer.gather(indices))))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_attributes() {
        let distance = Surface::default_attribute(DISTANCE, ValueType::Float);
        assert_eq!(distance.as_float().unwrap()[0], f32::INFINITY);

        let height = Surface::default_attribute(HEIGHT, ValueType::Float);
        assert_eq!(height.as_float().unwrap()[0], f32::NEG_INFINITY);

        let material = Surface::default_attribute("Material", ValueType::Int32);
        assert_eq!(material.as_int32().unwrap()[0], 0);
    }

    #[test]
    fn test_gather_applies_to_every_attribute() {
        let mut surface = Surface::default();
        surface.set(DISTANCE, Buffer::Float(FloatBuffer::from_slice(&[1.0, 2.0, 3.0])));
        surface.set("Material", Buffer::Int32(Int32Buffer::constant(4)));

        let gathered = surface.gather(&Int32Buffer::from_slice(&[2, 0]));
        assert_eq!(
            gathered.get(DISTANCE).unwrap().as_float().unwrap().to_vec(),
            vec![3.0, 1.0]
        );
        assert!(gathered.get("Material").unwrap().is_constant());
        assert!(surface.get_or_default(HEIGHT, ValueType::Float).is_constant());
    }
}
