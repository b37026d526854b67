//! Shared, observable local-to-world transforms.
//!
//! A [`TransformRef`] is shared by everything placed in the same frame: a brush, a runtime
//! channel or a query. Reading it through [`TransformRef::get`] registers a dependency on
//! the caller's tracker so cached results are invalidated when the transform moves.
//! Runtime channels subscribe with [`TransformRef::add_on_changed`] to re-place their brushes.

use cgmath::{Matrix4, Point3, SquareMatrix, Transform};
use log::warn;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::core::sync::{MutexExt, RwLockExt};
use crate::dependency::{Dependency, DependencyTracker, InvalidationParameters};

/// Callback fired with the new matrix after a transform changed.
pub type TransformListener = dyn Fn(&Matrix4<f64>) + Send + Sync;

struct TransformState {
    name: String,
    matrix: RwLock<Matrix4<f64>>,
    dependency: Arc<Dependency>,
    listeners: Mutex<Vec<Weak<TransformListener>>>,
}

/// Reference-counted handle to a mutable local-to-world matrix.
#[derive(Clone)]
pub struct TransformRef {
    state: Arc<TransformState>,
}

impl fmt::Debug for TransformRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRef")
            .field("name", &self.state.name)
            .field("matrix", &self.matrix())
            .finish()
    }
}

impl TransformRef {
    pub fn new(name: impl Into<String>, matrix: Matrix4<f64>) -> Self {
        let name = name.into();
        Self {
            state: Arc::new(TransformState {
                dependency: Dependency::new("Transform", name.clone()),
                name,
                matrix: RwLock::new(matrix),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn identity(name: impl Into<String>) -> Self {
        Self::new(name, Matrix4::identity())
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Current matrix, without registering a dependency.
    pub fn matrix(&self) -> Matrix4<f64> {
        *self.state.matrix.read_locked()
    }

    /// Current matrix. `tracker` is invalidated the next time the transform changes.
    pub fn get(&self, tracker: &DependencyTracker) -> Matrix4<f64> {
        tracker.add_dependency(&self.state.dependency, None, None);
        self.matrix()
    }

    /// Replaces the matrix, invalidates readers and notifies listeners.
    pub fn set(&self, matrix: Matrix4<f64>) {
        *self.state.matrix.write_locked() = matrix;

        let listeners: Vec<Arc<TransformListener>> = {
            let mut listeners = self.state.listeners.locked();
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        self.state
            .dependency
            .invalidate(InvalidationParameters::default());

        for listener in listeners {
            listener(&matrix);
        }
    }

    /// Subscribes `listener` to changes. Only a weak reference is kept, so the
    /// subscription ends when the caller drops its `Arc`.
    pub fn add_on_changed(&self, listener: &Arc<TransformListener>) {
        self.state.listeners.locked().push(Arc::downgrade(listener));
    }

    /// Matrix taking points from this transform's local space into `other`'s local space.
    pub fn relative_to(&self, other: &TransformRef) -> Matrix4<f64> {
        relative_matrix(&self.matrix(), &other.matrix(), self.name())
    }

    /// Same as [`relative_to`](Self::relative_to), registering both transforms on `tracker`.
    pub fn get_relative_to(
        &self,
        other: &TransformRef,
        tracker: &DependencyTracker,
    ) -> Matrix4<f64> {
        relative_matrix(&self.get(tracker), &other.get(tracker), self.name())
    }

    /// Takes a world-space point into this transform's local space.
    pub fn inverse_transform_point(&self, point: Point3<f64>) -> Point3<f64> {
        match self.matrix().invert() {
            Some(inverse) => inverse.transform_point(point),
            None => point,
        }
    }

    pub fn ptr_eq(&self, other: &TransformRef) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

fn relative_matrix(local: &Matrix4<f64>, other: &Matrix4<f64>, name: &str) -> Matrix4<f64> {
    match other.invert() {
        Some(inverse) => inverse * local,
        None => {
            warn!("Transform relative to {name} is not invertible, using identity");
            *local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Vector3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_relative_to_cancels_shared_translation() {
        let brush = TransformRef::new(
            "Brush",
            Matrix4::from_translation(Vector3::new(10.0, 0.0, 0.0)),
        );
        let runtime = TransformRef::new(
            "Runtime",
            Matrix4::from_translation(Vector3::new(4.0, 0.0, 0.0)),
        );

        let relative = brush.relative_to(&runtime);
        let point = relative.transform_point(Point3::new(0.0, 0.0, 0.0));
        assert_eq!(point, Point3::new(6.0, 0.0, 0.0));
    }

    #[test]
    fn test_set_invalidates_trackers_and_notifies_listeners() {
        let transform = TransformRef::identity("Brush");
        let tracker = DependencyTracker::new("Query");
        transform.get(&tracker);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let listener: Arc<TransformListener> = Arc::new(move |_matrix: &Matrix4<f64>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        transform.add_on_changed(&listener);

        transform.set(Matrix4::from_scale(2.0));
        assert!(tracker.is_invalidated());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(listener);
        transform.set(Matrix4::identity());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inverse_transform_point() {
        let transform = TransformRef::new(
            "Runtime",
            Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0)),
        );
        assert_eq!(
            transform.inverse_transform_point(Point3::new(1.0, 2.0, 3.0)),
            Point3::new(0.0, 0.0, 0.0)
        );
    }
}
