//! Per-query dependency tracker.

use log::trace;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::Dependency;
use crate::core::sparse_array::SparseId;
use crate::core::sync::MutexExt;
use crate::math::VoxelBox;

type InvalidatedCallback = Box<dyn FnOnce() + Send>;

/// Records the dependencies one query read and fires once when any of them changes.
///
/// Once invalidated a tracker stays invalidated; callers recompute with a fresh tracker.
pub struct DependencyTracker {
    name: String,
    weak_self: Weak<DependencyTracker>,
    is_invalidated: AtomicBool,
    on_invalidated: Mutex<Option<InvalidatedCallback>>,
    registrations: Mutex<Vec<(Weak<Dependency>, SparseId)>>,
}

impl fmt::Debug for DependencyTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyTracker")
            .field("name", &self.name)
            .field("is_invalidated", &self.is_invalidated())
            .finish()
    }
}

impl DependencyTracker {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak_self| Self {
            name,
            weak_self: weak_self.clone(),
            is_invalidated: AtomicBool::new(false),
            on_invalidated: Mutex::new(None),
            registrations: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_invalidated(&self) -> bool {
        self.is_invalidated.load(Ordering::Acquire)
    }

    pub fn num_dependencies(&self) -> usize {
        self.registrations.locked().len()
    }

    /// Registers this tracker on `dependency`.
    ///
    /// # Arguments
    /// * `dependency` - The invalidation source that was read
    /// * `bounds` - Region that was read, `None` for everywhere
    /// * `tag` - Highest invalidation tag this read is sensitive to, `None` for all
    pub fn add_dependency(
        &self,
        dependency: &Arc<Dependency>,
        bounds: Option<VoxelBox>,
        tag: Option<u64>,
    ) {
        if self.is_invalidated() {
            return;
        }

        let id = dependency.add_tracker(self.weak_self.clone(), bounds, tag);
        self.registrations
            .locked()
            .push((Arc::downgrade(dependency), id));
    }

    /// Installs the callback fired on invalidation.
    ///
    /// Setting the callback and invalidating are serialized, so no invalidation can slip
    /// in between. If the tracker is already invalidated the callback runs immediately.
    ///
    /// # Returns
    /// `false` if the tracker was already invalidated and the callback ran inline.
    pub fn set_on_invalidated(&self, callback: impl FnOnce() + Send + 'static) -> bool {
        let mut slot = self.on_invalidated.locked();
        if self.is_invalidated() {
            drop(slot);
            callback();
            return false;
        }

        ensure_voxel!(
            slot.is_none(),
            "on-invalidated callback set twice on tracker {}",
            self.name
        );
        *slot = Some(Box::new(callback));
        true
    }

    pub(crate) fn invalidate(&self) {
        let callback = {
            let mut slot = self.on_invalidated.locked();
            if self.is_invalidated.swap(true, Ordering::AcqRel) {
                return;
            }
            slot.take()
        };

        trace!("Dependency tracker {} invalidated", self.name);
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Drop for DependencyTracker {
    fn drop(&mut self) {
        let registrations = std::mem::take(&mut *self.registrations.locked());
        for (dependency, id) in registrations {
            if let Some(dependency) = dependency.upgrade() {
                dependency.remove_tracker(id);
            }
        }
    }
}
