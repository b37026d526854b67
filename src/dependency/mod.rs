//! # Dependency Tracking
//!
//! Cache invalidation for everything a query reads. A [`Dependency`] is an invalidation
//! source, such as a channel or a transform. A [`DependencyTracker`] belongs to a single
//! query and records every dependency the query read, optionally narrowed by bounds and
//! a priority tag.
//!
//! ## Invalidation Lifecycle
//! 1. A query creates a tracker and hands it to the channel evaluator
//! 2. The evaluator registers the channel dependency with the query bounds and the
//!    priority ceiling it evaluated under
//! 3. The caller installs an on-invalidated callback on the tracker
//! 4. A brush change invalidates the channel dependency with the changed bounds and the
//!    brush priority
//! 5. Every registration whose bounds overlap and whose tag admits the brush priority is
//!    removed, and its tracker fires once
//!
//! ## Matching Rules
//! A registration matches [`InvalidationParameters`] when:
//! - either side has no bounds, or the bounds intersect
//! - either side has no tag, or the invalidation tag is less than or equal to the
//!   registration tag
//!
//! Trackers record the highest priority they are sensitive to, so a change to a brush
//! above that ceiling leaves them alone.
//!
//! ## Lock Discipline
//! Callbacks never run while a dependency lock is held. Matching trackers are collected
//! into an [`InvalidationScope`] and fired when the scope is dropped, after the caller
//! has released its own locks.

mod invalidation;
mod tracker;

pub use invalidation::InvalidationScope;
pub use tracker::DependencyTracker;

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::core::sparse_array::{SparseArray, SparseId};
use crate::core::sync::MutexExt;
use crate::math::VoxelBox;

/// Region and priority narrowing an invalidation. `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InvalidationParameters {
    pub bounds: Option<VoxelBox>,
    pub less_or_equal_tag: Option<u64>,
}

struct TrackerRef {
    tracker: Weak<DependencyTracker>,
    bounds: Option<VoxelBox>,
    tag: Option<u64>,
}

impl TrackerRef {
    fn matches(&self, parameters: &InvalidationParameters) -> bool {
        if let (Some(bounds), Some(invalidated_bounds)) = (&self.bounds, &parameters.bounds) {
            if !bounds.intersect(invalidated_bounds) {
                return false;
            }
        }

        if let (Some(tag), Some(invalidated_tag)) = (self.tag, parameters.less_or_equal_tag) {
            if invalidated_tag > tag {
                return false;
            }
        }

        true
    }
}

/// A named invalidation source.
pub struct Dependency {
    class_name: String,
    instance_name: String,
    tracker_refs: Mutex<SparseArray<TrackerRef>>,
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("class_name", &self.class_name)
            .field("instance_name", &self.instance_name)
            .field("num_trackers", &self.num_trackers())
            .finish()
    }
}

impl Dependency {
    pub fn new(class_name: impl Into<String>, instance_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            class_name: class_name.into(),
            instance_name: instance_name.into(),
            tracker_refs: Mutex::new(SparseArray::new()),
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Number of live tracker registrations.
    pub fn num_trackers(&self) -> usize {
        self.tracker_refs.locked().len()
    }

    pub(crate) fn add_tracker(
        &self,
        tracker: Weak<DependencyTracker>,
        bounds: Option<VoxelBox>,
        tag: Option<u64>,
    ) -> SparseId {
        self.tracker_refs.locked().add(TrackerRef {
            tracker,
            bounds,
            tag,
        })
    }

    pub(crate) fn remove_tracker(&self, id: SparseId) {
        self.tracker_refs.locked().remove(id);
    }

    /// Invalidates every matching tracker.
    pub fn invalidate(&self, parameters: InvalidationParameters) {
        let mut scope = InvalidationScope::new();
        self.invalidate_in(parameters, &mut scope);
    }

    /// Removes every matching registration and defers its tracker to `scope`.
    ///
    /// Callers holding their own locks declare the scope before taking them, so the
    /// trackers fire only once those locks are released.
    pub fn invalidate_in(&self, parameters: InvalidationParameters, scope: &mut InvalidationScope) {
        let mut tracker_refs = self.tracker_refs.locked();
        tracker_refs.retain(
            |tracker_ref| {
                tracker_ref.tracker.strong_count() > 0 && !tracker_ref.matches(&parameters)
            },
            |tracker_ref| scope.defer(tracker_ref.tracker),
        );
    }
}
