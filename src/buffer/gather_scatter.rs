//! Index-based gather and scatter over [`BufferStorage`].
//!
//! Brushes are evaluated on the subset of positions inside their bounds. The evaluator
//! gathers the running channel value at those positions, lets the brush compute on the
//! subset, then scatters the brush result back over the full-size value.

use super::storage::{BufferElement, BufferStorage};
use super::typed::Int32Buffer;

/// Elements of `storage` at `indices`, in index order. Constants are returned as is.
pub fn gather<T: BufferElement>(storage: &BufferStorage<T>, indices: &Int32Buffer) -> BufferStorage<T> {
    if storage.is_constant() {
        return storage.clone();
    }

    let mut result = BufferStorage::new();
    result.allocate(indices.num(), false);

    for chunk in indices.chunks() {
        let chunk_indices = indices.raw_view(chunk);
        for (output, index) in result.raw_view_mut(chunk).iter_mut().zip(chunk_indices) {
            *output = storage[*index as usize];
        }
    }
    result
}

/// `base` expanded to `num` elements with `filtered[i]` written at `indices[i]`.
///
/// A constant `filtered` is broadcast to every index. If both inputs are the same
/// constant the base is returned unchanged.
pub fn scatter<T: BufferElement>(
    base: &BufferStorage<T>,
    num: usize,
    filtered: &BufferStorage<T>,
    indices: &Int32Buffer,
) -> BufferStorage<T> {
    if let (Some(base_value), Some(filtered_value)) =
        (base.constant_value(), filtered.constant_value())
    {
        if bytemuck::bytes_of(&base_value) == bytemuck::bytes_of(&filtered_value) {
            return base.clone();
        }
    }

    if !ensure_voxel!(
        base.is_constant() || base.num() == num,
        "scatter base holds {} elements, expected {}",
        base.num(),
        num
    ) {
        return base.clone();
    }
    if !ensure_voxel!(
        filtered.is_constant() || filtered.num() == indices.num(),
        "scatter of {} values onto {} indices",
        filtered.num(),
        indices.num()
    ) {
        return base.clone();
    }

    let mut result = BufferStorage::new();
    result.allocate(num, false);

    for chunk in result.chunks() {
        match base.constant_value() {
            Some(value) => result.raw_view_mut(chunk).fill(value),
            None => result.raw_view_mut(chunk).copy_from_slice(base.raw_view(chunk)),
        }
    }

    for index in 0..indices.num() {
        result[indices[index] as usize] = filtered[index];
    }
    result
}
