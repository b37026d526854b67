//! Deferred tracker notification.

use std::sync::{Arc, Weak};

use super::DependencyTracker;

/// Batches tracker invalidations and fires them when dropped.
///
/// ```ignore
/// let mut scope = InvalidationScope::new();
/// {
///     let _brushes = channel.lock();
///     dependency.invalidate_in(parameters, &mut scope);
/// }
/// // scope drops here, after the lock, and fires the trackers
/// ```
#[derive(Default)]
pub struct InvalidationScope {
    trackers: Vec<Weak<DependencyTracker>>,
}

impl InvalidationScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn defer(&mut self, tracker: Weak<DependencyTracker>) {
        self.trackers.push(tracker);
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Fires every deferred tracker now.
    pub fn flush(&mut self) {
        let trackers: Vec<Arc<DependencyTracker>> = self
            .trackers
            .drain(..)
            .filter_map(|tracker| tracker.upgrade())
            .collect();

        for tracker in trackers {
            tracker.invalidate();
        }
    }
}

impl Drop for InvalidationScope {
    fn drop(&mut self) {
        self.flush();
    }
}
