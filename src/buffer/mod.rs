//! # Buffer Module
//!
//! Chunked, SIMD-friendly buffers that carry one value per query position.
//!
//! ## Components
//! - `storage`: [`BufferStorage`], the chunked element store with constant broadcasting
//! - `typed`: [`FloatBuffer`], [`Int32Buffer`], [`VectorBuffer`] and the [`Buffer`] enum
//! - `gather_scatter`: moving values between full-size buffers and filtered subsets
//! - `surface`: [`Surface`], named attribute buffers over a region

pub mod gather_scatter;
pub mod storage;
pub mod surface;
pub mod typed;

pub use storage::{BufferChunk, BufferElement, BufferIterator, BufferStorage, NUM_PER_CHUNK};
pub use surface::Surface;
pub use typed::{Buffer, FloatBuffer, Int32Buffer, VectorBuffer};
