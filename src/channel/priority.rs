//! Composite brush priorities.
//!
//! A [`BrushPriority`] packs four 16-bit fields into a `u64`, compared as an unsigned
//! integer:
//!
//! | Bits  | Field         |
//! |-------|---------------|
//! | 48-63 | base priority |
//! | 32-47 | graph hash    |
//! | 16-31 | instance hash |
//! | 0-15  | node hash     |
//!
//! The base priority decides, the hashes break ties deterministically so the same scene
//! always composites its brushes in the same order.

use std::fmt;

/// Ordering key of a brush within its channel. Higher priorities are applied last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BrushPriority(u64);

const FIELD_MASK: u64 = 0xFFFF;
const BASE_SHIFT: u32 = 48;
const GRAPH_SHIFT: u32 = 32;
const INSTANCE_SHIFT: u32 = 16;

/// Declared priorities are centered on this value before being clamped to 16 bits.
const BASE_OFFSET: i64 = (u16::MAX / 2) as i64;

impl BrushPriority {
    /// Ceiling above every brush.
    pub const MAX: BrushPriority = BrushPriority(u64::MAX);

    pub const fn new(
        base_priority: u16,
        graph_hash: u16,
        instance_hash: u16,
        node_hash: u16,
    ) -> Self {
        Self(
            (base_priority as u64) << BASE_SHIFT
                | (graph_hash as u64) << GRAPH_SHIFT
                | (instance_hash as u64) << INSTANCE_SHIFT
                | node_hash as u64,
        )
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Priority from a declared integer alone. Every hash is `0xFFFF`, so it sorts after
    /// any hashed priority of the same base.
    pub fn from_base(priority: i32) -> Self {
        Self::new(clamp_base(priority), u16::MAX, u16::MAX, u16::MAX)
    }

    /// Priority from a declared integer, tie-broken by where the brush comes from.
    ///
    /// # Arguments
    /// * `priority` - Declared priority, centered on zero
    /// * `graph_path` - Path of the graph producing the brush
    /// * `node_id` - Node inside the graph, if the brush comes from a node
    /// * `instance_path` - Path of the instance the graph runs on
    pub fn full(priority: i32, graph_path: &str, node_id: Option<&str>, instance_path: &str) -> Self {
        Self::new(
            clamp_base(priority),
            hash16(graph_path),
            hash16(instance_path),
            node_id.map_or(0, hash16),
        )
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn base_priority(self) -> u16 {
        (self.0 >> BASE_SHIFT) as u16
    }

    pub const fn graph_hash(self) -> u16 {
        ((self.0 >> GRAPH_SHIFT) & FIELD_MASK) as u16
    }

    pub const fn instance_hash(self) -> u16 {
        ((self.0 >> INSTANCE_SHIFT) & FIELD_MASK) as u16
    }

    pub const fn node_hash(self) -> u16 {
        (self.0 & FIELD_MASK) as u16
    }
}

impl fmt::Display for BrushPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:04x}:{:04x}:{:04x})",
            i64::from(self.base_priority()) - BASE_OFFSET,
            self.graph_hash(),
            self.instance_hash(),
            self.node_hash()
        )
    }
}

fn clamp_base(priority: i32) -> u16 {
    (i64::from(priority) + BASE_OFFSET).clamp(0, i64::from(u16::MAX) - 1) as u16
}

/// Murmur3 32-bit finalizer.
fn fmix32(mut hash: u32) -> u32 {
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^= hash >> 16;
    hash
}

fn hash16(text: &str) -> u16 {
    fmix32(crc32fast::hash(text.as_bytes())) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_round_trip() {
        let priority = BrushPriority::new(1, 2, 3, 4);
        assert_eq!(priority.base_priority(), 1);
        assert_eq!(priority.graph_hash(), 2);
        assert_eq!(priority.instance_hash(), 3);
        assert_eq!(priority.node_hash(), 4);
        assert_eq!(priority.raw(), 0x0001_0002_0003_0004);
    }

    #[test]
    fn test_base_priority_dominates() {
        let low = BrushPriority::new(1, u16::MAX, u16::MAX, u16::MAX);
        let high = BrushPriority::new(2, 0, 0, 0);
        assert!(low < high);
        assert!(high < BrushPriority::MAX);
    }

    #[test]
    fn test_base_priority_is_centered_and_clamped() {
        assert_eq!(BrushPriority::from_base(0).base_priority(), 32767);
        assert_eq!(BrushPriority::from_base(-1).base_priority(), 32766);
        assert_eq!(BrushPriority::from_base(i32::MIN).base_priority(), 0);
        assert_eq!(BrushPriority::from_base(i32::MAX).base_priority(), u16::MAX - 1);
        assert!(BrushPriority::from_base(i32::MAX) < BrushPriority::MAX);
    }

    #[test]
    fn test_full_priority_is_deterministic() {
        let a = BrushPriority::full(5, "/Game/Graph", Some("Node_1"), "/Game/Level.Actor");
        let b = BrushPriority::full(5, "/Game/Graph", Some("Node_1"), "/Game/Level.Actor");
        assert_eq!(a, b);
        assert_eq!(a.node_hash(), hash16("Node_1"));

        let without_node = BrushPriority::full(5, "/Game/Graph", None, "/Game/Level.Actor");
        assert_eq!(without_node.node_hash(), 0);
        assert_eq!(without_node.graph_hash(), a.graph_hash());
    }

    #[test]
    fn test_full_priority_is_stable_across_builds() {
        // Changing any of these values reorders the brushes of every existing scene
        assert_eq!(crc32fast::hash(b"/Game/Graph"), 0x23a1_ffcd);
        assert_eq!(fmix32(1), 0x514e_28b7);
        assert_eq!(hash16("/Game/Graph"), 0xa981);
        assert_eq!(hash16("/Game/Level.Actor"), 0x2914);
        assert_eq!(hash16("Node_1"), 0x56de);

        let priority = BrushPriority::full(5, "/Game/Graph", Some("Node_1"), "/Game/Level.Actor");
        assert_eq!(priority.raw(), 0x8004_a981_2914_56de);
    }

    #[test]
    fn test_fmix32_mixes() {
        assert_eq!(fmix32(0), 0);
        assert_ne!(fmix32(1), 1);
        assert_ne!(fmix32(1), fmix32(2));
    }
}
