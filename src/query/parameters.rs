//! # Query Parameters
//!
//! A type-keyed bag of query inputs. Each parameter type appears at most once; brushes
//! and evaluators look parameters up by type:
//!
//! ```ignore
//! let mut parameters = QueryParameters::new();
//! parameters.add(LodQueryParameter { lod: 2 });
//!
//! let lod = parameters.find::<LodQueryParameter>().map_or(0, |parameter| parameter.lod);
//! ```
//!
//! Parameters are stored behind `Arc`, so cloning the bag to derive a sub-query is cheap.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::channel::BrushPriority;
use crate::value::Value;

/// Marker for types that can be stored in [`QueryParameters`].
pub trait QueryParameter: Any + Send + Sync {}

/// Type-keyed query inputs.
#[derive(Clone, Default)]
pub struct QueryParameters {
    parameters: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for QueryParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryParameters")
            .field("num_parameters", &self.parameters.len())
            .finish()
    }
}

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `parameter`, replacing any parameter of the same type.
    pub fn add<T: QueryParameter>(&mut self, parameter: T) -> &mut Self {
        self.parameters
            .insert(TypeId::of::<T>(), Arc::new(parameter));
        self
    }

    pub fn find<T: QueryParameter>(&self) -> Option<&T> {
        self.parameters
            .get(&TypeId::of::<T>())
            .and_then(|parameter| parameter.downcast_ref::<T>())
    }

    /// Shared handle to a parameter, for moving it into a task.
    pub fn find_shared<T: QueryParameter>(&self) -> Option<Arc<T>> {
        let parameter = self.parameters.get(&TypeId::of::<T>())?.clone();
        parameter.downcast::<T>().ok()
    }

    pub fn remove<T: QueryParameter>(&mut self) -> bool {
        self.parameters.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn contains<T: QueryParameter>(&self) -> bool {
        self.parameters.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// Level of detail of the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LodQueryParameter {
    pub lod: i32,
}

impl QueryParameter for LodQueryParameter {}

/// Step used when brushes compute gradients by finite differences.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientStepQueryParameter {
    pub step: f32,
}

impl QueryParameter for GradientStepQueryParameter {}

/// Distance past the query bounds within which brushes must still be evaluated exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinExactDistanceQueryParameter {
    pub min_exact_distance: f32,
}

impl QueryParameter for MinExactDistanceQueryParameter {}

/// Per-channel priority ceiling: only brushes strictly below it are evaluated.
///
/// A brush reading its own channel sets this so it only sees what lies beneath it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrushPriorityQueryParameter {
    pub channel_to_priority: HashMap<String, BrushPriority>,
}

impl QueryParameter for BrushPriorityQueryParameter {}

/// The channel value below the brush currently being evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviousChannelValueQueryParameter {
    /// True while no brush has written the value yet.
    pub is_default: bool,
    pub value: Value,
}

impl QueryParameter for PreviousChannelValueQueryParameter {}

/// Surface attributes the caller needs. Brushes may skip the others.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceQueryParameter {
    pub attributes: HashSet<String>,
}

impl SurfaceQueryParameter {
    pub fn needs(&self, attribute: &str) -> bool {
        self.attributes.is_empty() || self.attributes.contains(attribute)
    }
}

impl QueryParameter for SurfaceQueryParameter {}
