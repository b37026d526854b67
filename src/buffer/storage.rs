//! # Chunked Buffer Storage
//!
//! [`BufferStorage`] is the backing store of every buffer value. Elements live in fixed-size
//! chunks of [`NUM_PER_CHUNK`] so growing a buffer never moves what was already written,
//! and a storage holding exactly one element is a *constant*: it stands for that value
//! broadcast over any number of positions.
//!
//! ## Layout
//! - Growable storages allocate every chunk at full size
//! - Storages allocated without growth size their last chunk to fit exactly
//! - Element `i` lives at `chunks[i >> NUM_PER_CHUNK_LOG2][i & CHUNK_MASK]`
//!
//! ## Constant Storages
//! Indexing a constant storage always reads element 0, whatever the index. This lets code
//! treat "one value everywhere" and "one value per position" uniformly.
//!
//! ## Performance Considerations
//! - Chunks are processed through [`BufferIterator`], which yields one contiguous span per
//!   chunk, so inner loops run over plain slices
//! - [`BufferStorage::try_reduce_into_constant`] scans chunks in parallel with `rayon`

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use std::fmt;
use std::ops::{Index, IndexMut};

/// Element types a [`BufferStorage`] can hold.
pub trait BufferElement: Pod + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T: Pod + PartialEq + fmt::Debug + Send + Sync + 'static> BufferElement for T {}

pub const NUM_PER_CHUNK_LOG2: usize = 12;
pub const NUM_PER_CHUNK: usize = 1 << NUM_PER_CHUNK_LOG2;
pub const CHUNK_MASK: usize = NUM_PER_CHUNK - 1;

#[inline]
pub const fn chunk_index(index: usize) -> usize {
    index >> NUM_PER_CHUNK_LOG2
}

#[inline]
pub const fn chunk_offset(index: usize) -> usize {
    index & CHUNK_MASK
}

/// One contiguous span of a buffer, never crossing a chunk boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferChunk {
    /// Logical index of the first element.
    pub index: usize,
    /// Number of elements in the span.
    pub num: usize,
}

impl BufferChunk {
    pub fn chunk_index(&self) -> usize {
        chunk_index(self.index)
    }

    pub fn chunk_offset(&self) -> usize {
        chunk_offset(self.index)
    }

    pub fn end(&self) -> usize {
        self.index + self.num
    }
}

/// Splits `0..total_num` into per-chunk spans.
///
/// ```ignore
/// for chunk in BufferIterator::new(storage.num()) {
///     let values = storage.raw_view(chunk);
///     // values.len() == chunk.num
/// }
/// ```
#[derive(Debug, Clone)]
pub struct BufferIterator {
    total_num: usize,
    index: usize,
}

impl BufferIterator {
    pub fn new(total_num: usize) -> Self {
        Self {
            total_num,
            index: 0,
        }
    }
}

impl Iterator for BufferIterator {
    type Item = BufferChunk;

    fn next(&mut self) -> Option<BufferChunk> {
        if self.index >= self.total_num {
            return None;
        }

        let num = (NUM_PER_CHUNK - chunk_offset(self.index)).min(self.total_num - self.index);
        let chunk = BufferChunk {
            index: self.index,
            num,
        };
        self.index += num;
        Some(chunk)
    }
}

/// Chunked element storage.
#[derive(Clone)]
pub struct BufferStorage<T: BufferElement> {
    num: usize,
    can_grow: bool,
    chunks: Vec<Box<[T]>>,
}

impl<T: BufferElement> Default for BufferStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: BufferElement> fmt::Debug for BufferStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferStorage")
            .field("num", &self.num)
            .field("values", &self.iter().take(16).collect::<Vec<_>>())
            .finish()
    }
}

impl<T: BufferElement> PartialEq for BufferStorage<T> {
    fn eq(&self, other: &Self) -> bool {
        self.num == other.num && self.iter().eq(other.iter())
    }
}

impl<T: BufferElement> FromIterator<T> for BufferStorage<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut storage = Self::new();
        for value in iter {
            storage.push(value);
        }
        storage
    }
}

impl<T: BufferElement> BufferStorage<T> {
    /// Empty, growable storage.
    pub fn new() -> Self {
        Self {
            num: 0,
            can_grow: true,
            chunks: Vec::new(),
        }
    }

    /// Constant storage broadcasting `value`.
    pub fn constant(value: T) -> Self {
        let mut storage = Self::new();
        storage.set_constant(value);
        storage
    }

    /// Storage holding a copy of `values`, sized exactly.
    pub fn from_slice(values: &[T]) -> Self {
        let mut storage = Self::new();
        storage.allocate(values.len(), false);
        for chunk in BufferIterator::new(values.len()) {
            storage
                .raw_view_mut(chunk)
                .copy_from_slice(&values[chunk.index..chunk.end()]);
        }
        storage
    }

    #[inline]
    pub fn num(&self) -> usize {
        self.num
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num == 0
    }

    /// A storage with exactly one element stands for that element everywhere.
    #[inline]
    pub fn is_constant(&self) -> bool {
        self.num == 1
    }

    pub fn can_grow(&self) -> bool {
        self.can_grow
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn constant_value(&self) -> Option<T> {
        self.is_constant().then(|| self.chunks[0][0])
    }

    /// Bytes held by element chunks.
    pub fn allocated_size(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.len()).sum::<usize>() * std::mem::size_of::<T>()
    }

    /// Allocates zeroed room for `num` elements.
    ///
    /// # Arguments
    /// * `num` - Number of elements
    /// * `allow_growth` - Whether the storage may be grown later. When false the last chunk
    ///   is sized to fit exactly
    pub fn allocate(&mut self, num: usize, allow_growth: bool) {
        if !ensure_voxel!(
            self.chunks.is_empty(),
            "allocate called on a storage that already holds {} elements",
            self.num
        ) {
            self.empty();
        }

        self.can_grow = allow_growth;
        if num == 0 {
            return;
        }

        let num_chunks = num.div_ceil(NUM_PER_CHUNK);
        self.chunks.reserve_exact(num_chunks);
        for chunk in 0..num_chunks {
            let chunk_num = if allow_growth {
                NUM_PER_CHUNK
            } else {
                (num - chunk * NUM_PER_CHUNK).min(NUM_PER_CHUNK)
            };
            self.chunks.push(allocate_chunk(chunk_num));
        }
        self.num = num;
    }

    /// Turns this storage into a constant.
    pub fn set_constant(&mut self, value: T) {
        self.empty();
        self.allocate(1, false);
        self.chunks[0][0] = value;
    }

    /// Frees every chunk.
    pub fn empty(&mut self) {
        self.chunks = Vec::new();
        self.num = 0;
        self.can_grow = true;
    }

    /// Shrinks the last chunk to fit. The storage stops being growable.
    pub fn shrink(&mut self) {
        if self.num == 0 {
            self.empty();
            return;
        }

        let last_num = self.num - (self.chunks.len() - 1) * NUM_PER_CHUNK;
        if let Some(last) = self.chunks.last_mut() {
            if last.len() > last_num {
                *last = last[..last_num].to_vec().into_boxed_slice();
            }
        }
        self.chunks.shrink_to_fit();
        self.can_grow = false;
    }

    /// Zeroes every element.
    pub fn memzero(&mut self) {
        for chunk in &mut self.chunks {
            chunk.fill(T::zeroed());
        }
    }

    /// Appends `num_to_add` zeroed elements.
    ///
    /// # Returns
    /// Index of the first added element.
    pub fn add_zeroed(&mut self, num_to_add: usize) -> usize {
        let old_num = self.num;
        if num_to_add == 0 {
            return old_num;
        }

        self.make_growable();

        let new_num = old_num + num_to_add;
        let capacity = self.chunks.len() * NUM_PER_CHUNK;

        // Elements past `num` in the last chunk may hold stale data from a previous shrink
        let stale_end = new_num.min(capacity);
        if old_num < stale_end {
            let offset = chunk_offset(old_num);
            self.chunks[chunk_index(old_num)][offset..offset + (stale_end - old_num)]
                .fill(T::zeroed());
        }

        while self.chunks.len() * NUM_PER_CHUNK < new_num {
            self.chunks.push(allocate_chunk(NUM_PER_CHUNK));
        }

        self.num = new_num;
        old_num
    }

    /// Appends one element and returns its index.
    pub fn push(&mut self, value: T) -> usize {
        let index = self.add_zeroed(1);
        self.chunks[chunk_index(index)][chunk_offset(index)] = value;
        index
    }

    /// Appends `other_num` elements of `other`. A constant `other` is broadcast.
    pub fn append(&mut self, other: &BufferStorage<T>, other_num: usize) {
        ensure_voxel!(
            other.is_constant() || other.num() == other_num,
            "append of {} elements from a storage holding {}",
            other_num,
            other.num()
        );

        let num_to_copy = if other.is_constant() {
            other_num
        } else {
            other_num.min(other.num())
        };
        let start = self.add_zeroed(num_to_copy);
        for index in 0..num_to_copy {
            self[start + index] = other[index];
        }
    }

    /// Resizes to `new_num`. New elements are zeroed, chunks past the end are freed.
    pub fn set_num_zeroed(&mut self, new_num: usize) {
        if new_num == 0 {
            self.empty();
            return;
        }
        if new_num > self.num {
            self.add_zeroed(new_num - self.num);
            return;
        }

        self.num = new_num;
        self.chunks.truncate(new_num.div_ceil(NUM_PER_CHUNK));
    }

    /// Replaces the storage with a constant if every element is bitwise identical.
    ///
    /// # Returns
    /// `true` if the storage is constant afterwards.
    pub fn try_reduce_into_constant(&mut self) -> bool {
        if self.num == 0 {
            return false;
        }
        if self.is_constant() {
            return true;
        }

        let constant = self.chunks[0][0];
        let constant_bytes = bytemuck::bytes_of(&constant);
        let spans: Vec<BufferChunk> = BufferIterator::new(self.num).collect();
        let all_equal = spans.par_iter().all(|chunk| {
            self.raw_view(*chunk)
                .iter()
                .all(|value| bytemuck::bytes_of(value) == constant_bytes)
        });

        if !all_equal {
            return false;
        }

        self.set_constant(constant);
        true
    }

    /// Contiguous elements of `chunk`.
    pub fn raw_view(&self, chunk: BufferChunk) -> &[T] {
        let offset = chunk.chunk_offset();
        &self.chunks[chunk.chunk_index()][offset..offset + chunk.num]
    }

    pub fn raw_view_mut(&mut self, chunk: BufferChunk) -> &mut [T] {
        let offset = chunk.chunk_offset();
        &mut self.chunks[chunk.chunk_index()][offset..offset + chunk.num]
    }

    /// Per-chunk spans covering the whole storage.
    pub fn chunks(&self) -> BufferIterator {
        BufferIterator::new(self.num)
    }

    /// Iterates the stored elements. A constant yields its single element.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.chunks()
            .flat_map(move |chunk| self.raw_view(chunk).iter().copied())
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    #[inline]
    fn physical_index(&self, index: usize) -> usize {
        let constant_mask = if self.is_constant() { 0 } else { usize::MAX };
        let index = index & constant_mask;
        debug_assert!(index < self.num, "index {index} out of range ({})", self.num);
        index
    }

    fn make_growable(&mut self) {
        if self.can_grow {
            return;
        }

        if let Some(last) = self.chunks.last_mut() {
            if last.len() < NUM_PER_CHUNK {
                let mut full = vec![T::zeroed(); NUM_PER_CHUNK];
                full[..last.len()].copy_from_slice(last);
                *last = full.into_boxed_slice();
            }
        }
        self.can_grow = true;
    }
}

impl<T: BufferElement> Index<usize> for BufferStorage<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: usize) -> &T {
        let index = self.physical_index(index);
        &self.chunks[chunk_index(index)][chunk_offset(index)]
    }
}

impl<T: BufferElement> IndexMut<usize> for BufferStorage<T> {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut T {
        let index = self.physical_index(index);
        &mut self.chunks[chunk_index(index)][chunk_offset(index)]
    }
}

fn allocate_chunk<T: BufferElement>(num: usize) -> Box<[T]> {
    vec![T::zeroed(); num].into_boxed_slice()
}
