//! # Queries
//!
//! A [`Query`] bundles what a channel evaluation needs: the typed parameter bag, the
//! dependency tracker recording what was read, and the transform of the query space.

pub mod parameters;
pub mod position;

pub use parameters::{
    BrushPriorityQueryParameter, GradientStepQueryParameter, LodQueryParameter,
    MinExactDistanceQueryParameter, PreviousChannelValueQueryParameter, QueryParameter,
    QueryParameters, SurfaceQueryParameter,
};
pub use position::{PositionFilter, PositionQueryParameter};

use std::sync::Arc;

use crate::dependency::DependencyTracker;
use crate::math::TransformRef;

/// Parameters, dependency tracker and space of one evaluation.
#[derive(Debug, Clone)]
pub struct Query {
    parameters: Arc<QueryParameters>,
    tracker: Arc<DependencyTracker>,
    local_to_world: TransformRef,
}

impl Query {
    pub fn new(
        parameters: QueryParameters,
        tracker: Arc<DependencyTracker>,
        local_to_world: TransformRef,
    ) -> Self {
        Self {
            parameters: Arc::new(parameters),
            tracker,
            local_to_world,
        }
    }

    pub fn parameters(&self) -> &QueryParameters {
        &self.parameters
    }

    /// Copy of the parameters, to derive a sub-query from.
    pub fn clone_parameters(&self) -> QueryParameters {
        (*self.parameters).clone()
    }

    /// Same tracker and space, different parameters.
    pub fn make_new_query(&self, parameters: QueryParameters) -> Query {
        Query {
            parameters: Arc::new(parameters),
            tracker: self.tracker.clone(),
            local_to_world: self.local_to_world.clone(),
        }
    }

    pub fn dependency_tracker(&self) -> &Arc<DependencyTracker> {
        &self.tracker
    }

    pub fn local_to_world(&self) -> &TransformRef {
        &self.local_to_world
    }
}
