//! # Channel Evaluator
//!
//! Composites the brushes of a runtime channel for one query.
//!
//! ## Algorithm
//!
//! 1. Read the query positions and their bounds, grown by the min exact distance
//! 2. Register the query's tracker on the channel and collect the brushes below the
//!    query's priority ceiling whose bounds intersect the query bounds
//! 3. With no brush, resolve to the channel default right away
//! 4. Otherwise fold the brushes in ascending priority order: each brush receives the
//!    value produced by the ones below it and its output feeds the next brush
//!
//! ## Positional Filtering
//!
//! For buffer and surface channels, a brush is only evaluated at the query positions
//! inside its bounds. The previous value is gathered at those positions, the brush runs
//! on the subset and its output is scattered back over the previous value. A brush
//! covering none of the positions is skipped and the previous value passes through
//! untouched. Surfaces are filtered per attribute, and attributes the brush didn't
//! output keep their previous buffer.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use super::brush::Brush;
use super::priority::BrushPriority;
use super::runtime_channel::{ChannelFuture, RuntimeChannel};
use crate::buffer::{Buffer, Surface};
use crate::query::{
    BrushPriorityQueryParameter, MinExactDistanceQueryParameter, PositionFilter,
    PositionQueryParameter, PreviousChannelValueQueryParameter, Query,
};
use crate::task::{FutureValue, Promise, TaskContext};
use crate::value::{Value, ValueType};

/// State of one compositing pass, shared by the tasks of its fold.
pub struct ChannelEvaluator {
    channel: Arc<RuntimeChannel>,
    query: Query,
    positions: Arc<PositionQueryParameter>,
    min_exact_distance: f64,
    brushes: Vec<Arc<Brush>>,
    is_default: Arc<OnceLock<bool>>,
}

impl ChannelEvaluator {
    /// Starts compositing `channel` for `query`.
    ///
    /// # Returns
    /// The composited value. A query without positions is reported and resolves to the
    /// channel default.
    pub fn compute(
        channel: &Arc<RuntimeChannel>,
        ctx: &TaskContext<'_>,
        query: &Query,
    ) -> ChannelFuture {
        let definition = channel.definition();
        let default_value = FutureValue::from_value(definition.default_value.clone());

        let Some(positions) = query.parameters().find_shared::<PositionQueryParameter>() else {
            ctx.runtime().messages().error(format!(
                "{}: query has no position parameter",
                definition.name
            ));
            return ChannelFuture::from_default(default_value);
        };

        let min_exact_distance = query
            .parameters()
            .find::<MinExactDistanceQueryParameter>()
            .map_or(0.0, |parameter| f64::from(parameter.min_exact_distance));

        let ceiling = query
            .parameters()
            .find::<BrushPriorityQueryParameter>()
            .and_then(|parameter| parameter.channel_to_priority.get(&definition.name).copied())
            .unwrap_or(BrushPriority::MAX);

        let bounds = positions.bounds().extend(min_exact_distance);
        let mut brushes = channel.gather_brushes(query.dependency_tracker(), bounds, ceiling);
        if brushes.is_empty() {
            return ChannelFuture::from_default(default_value);
        }
        brushes.sort_by_key(|brush| brush.priority());

        let evaluator = Arc::new(Self {
            channel: channel.clone(),
            query: query.clone(),
            positions,
            min_exact_distance,
            brushes,
            is_default: Arc::new(OnceLock::new()),
        });

        let promise = Promise::new(definition.value_type, format!("{} channel", definition.name));
        let result = ChannelFuture::new(promise.future(), evaluator.is_default.clone());
        evaluator.compute_next(ctx, promise, true, definition.default_value.clone(), 0);
        result
    }

    fn value_type(&self) -> ValueType {
        self.channel.definition().value_type
    }

    fn channel_name(&self) -> &str {
        &self.channel.definition().name
    }

    fn compute_next(
        self: &Arc<Self>,
        ctx: &TaskContext<'_>,
        promise: Promise,
        is_previous_default: bool,
        previous: Value,
        brush_index: usize,
    ) {
        let Some(brush) = self.brushes.get(brush_index).cloned() else {
            let _ = self.is_default.set(is_previous_default);
            promise.set_value(previous);
            return;
        };

        let future = self.get_brush_value(ctx, is_previous_default, previous, &brush);

        let evaluator = self.clone();
        let brush_value = future.clone();
        ctx.task(format!("{} {}", self.channel_name(), brush.debug_name()))
            .dependency(&future)
            .execute(move |ctx| {
                let value = brush_value.value_checked();
                evaluator.check_nans(ctx, &brush, &value);
                evaluator.compute_next(ctx, promise, false, value, brush_index + 1);
            });
    }

    fn check_nans(&self, ctx: &TaskContext<'_>, brush: &Brush, value: &Value) {
        if !ctx.runtime().config().check_nans {
            return;
        }
        let has_non_finite = match value {
            Value::Float(value) => !value.is_finite(),
            Value::Buffer(buffer) => buffer.has_non_finite(),
            _ => false,
        };
        if has_non_finite {
            ctx.runtime().messages().warning(format!(
                "{}: brush {} produced NaN or infinite values",
                self.channel_name(),
                brush.debug_name()
            ));
        }
    }

    fn get_brush_value(
        self: &Arc<Self>,
        ctx: &TaskContext<'_>,
        is_previous_default: bool,
        previous: Value,
        brush: &Arc<Brush>,
    ) -> FutureValue {
        let filtered = match &previous {
            Value::Buffer(buffer) => {
                self.try_get_brush_value_buffer(ctx, is_previous_default, buffer, brush)
            }
            Value::Surface(surface) => {
                self.try_get_brush_value_surface(ctx, is_previous_default, surface, brush)
            }
            _ => None,
        };
        if let Some(future) = filtered {
            return future;
        }

        let evaluator = self.clone();
        let brush = brush.clone();
        ctx.task(brush.debug_name().to_string())
            .execute_future(self.value_type(), move |ctx| {
                let mut parameters = evaluator.query.clone_parameters();
                parameters.add(PreviousChannelValueQueryParameter {
                    is_default: is_previous_default,
                    value: previous,
                });
                brush.compute(ctx, &evaluator.query.make_new_query(parameters))
            })
    }

    /// Query positions inside the brush bounds, `None` if the brush covers them all.
    fn try_filter(&self, brush: &Brush) -> Option<PositionFilter> {
        let brush_to_query = brush
            .local_to_world()
            .get_relative_to(self.query.local_to_world(), self.query.dependency_tracker());
        let brush_bounds = brush
            .local_bounds()
            .transform_by(&brush_to_query)
            .extend(self.min_exact_distance);

        self.positions.try_filter(&brush_bounds)
    }

    /// Runs `brush` on the filtered positions with `filtered_previous` as the value below.
    fn compute_filtered(
        self: &Arc<Self>,
        ctx: &TaskContext<'_>,
        brush: &Arc<Brush>,
        is_previous_default: bool,
        filtered_previous: Value,
        filter: &PositionFilter,
    ) -> FutureValue {
        let evaluator = self.clone();
        let brush = brush.clone();
        let filtered_positions = filter.positions.clone();
        ctx.task(format!("{} (filtered)", brush.debug_name()))
            .execute_future(self.value_type(), move |ctx| {
                let mut parameters = evaluator.query.clone_parameters();
                parameters.add(PositionQueryParameter::new(filtered_positions));
                parameters.add(PreviousChannelValueQueryParameter {
                    is_default: is_previous_default,
                    value: filtered_previous,
                });
                brush.compute(ctx, &evaluator.query.make_new_query(parameters))
            })
    }

    fn try_get_brush_value_buffer(
        self: &Arc<Self>,
        ctx: &TaskContext<'_>,
        is_previous_default: bool,
        previous: &Arc<Buffer>,
        brush: &Arc<Brush>,
    ) -> Option<FutureValue> {
        let filter = self.try_filter(brush)?;
        if filter.is_empty() {
            return Some(FutureValue::from_value(Value::Buffer(previous.clone())));
        }

        let filtered_previous = Value::Buffer(Arc::new(previous.gather(&filter.indices)));
        let filtered_future =
            self.compute_filtered(ctx, brush, is_previous_default, filtered_previous, &filter);

        let num = self.positions.num();
        let previous = previous.clone();
        let filtered_value = filtered_future.clone();
        let indices = filter.indices;
        Some(
            ctx.task(format!("{} scatter", brush.debug_name()))
                .dependency(&filtered_future)
                .execute_value(self.value_type(), move |_| {
                    let filtered = filtered_value.value_checked();
                    let scattered = filtered
                        .as_buffer()
                        .and_then(|filtered| previous.scatter(num, filtered, &indices));
                    match scattered {
                        Some(buffer) => Value::Buffer(Arc::new(buffer)),
                        None => Value::Buffer(previous),
                    }
                }),
        )
    }

    fn try_get_brush_value_surface(
        self: &Arc<Self>,
        ctx: &TaskContext<'_>,
        is_previous_default: bool,
        previous: &Arc<Surface>,
        brush: &Arc<Brush>,
    ) -> Option<FutureValue> {
        let filter = self.try_filter(brush)?;
        if filter.is_empty() {
            return Some(FutureValue::from_value(Value::Surface(previous.clone())));
        }

        let filtered_previous = Value::Surface(Arc::new(previous.gather(&filter.indices)));
        let filtered_future =
            self.compute_filtered(ctx, brush, is_previous_default, filtered_previous, &filter);

        let num = self.positions.num();
        let previous = previous.clone();
        let filtered_value = filtered_future.clone();
        let indices = filter.indices;
        Some(
            ctx.task(format!("{} scatter", brush.debug_name()))
                .dependency(&filtered_future)
                .execute_value(self.value_type(), move |_| {
                    let filtered = filtered_value.value_checked();
                    let Some(filtered) = filtered.as_surface() else {
                        return Value::Surface(previous);
                    };
                    Value::Surface(Arc::new(scatter_surface(&previous, num, filtered, &indices)))
                }),
        )
    }
}

/// Writes every attribute of `filtered` back over `previous`.
///
/// Attributes missing from `previous` start from their default. Attributes missing from
/// `filtered` keep the previous buffer.
fn scatter_surface(
    previous: &Surface,
    num: usize,
    filtered: &Surface,
    indices: &crate::buffer::Int32Buffer,
) -> Surface {
    let mut result = filtered.clone();

    let names: BTreeSet<&str> = previous
        .attributes()
        .chain(filtered.attributes())
        .map(|(name, _)| name)
        .collect();

    for name in names {
        let Some(filtered_buffer) = filtered.get(name) else {
            if let Some(previous_buffer) = previous.get(name) {
                result.set(name, previous_buffer.clone());
            }
            continue;
        };

        let base = previous
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::new(Surface::default_attribute(name, filtered_buffer.inner_type())));

        match base.scatter(num, filtered_buffer, indices) {
            Some(buffer) => result.set(name, buffer),
            None => result.set(name, base),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{FloatBuffer, Int32Buffer};
    use crate::buffer::surface::{DISTANCE, HEIGHT, MATERIAL};

    #[test]
    fn test_scatter_surface_merges_attributes() {
        let mut previous = Surface::default();
        previous.set(DISTANCE, Buffer::Float(FloatBuffer::from_slice(&[1.0, 2.0, 3.0])));
        previous.set(MATERIAL, Buffer::Int32(Int32Buffer::from_slice(&[7, 7, 7])));

        let mut filtered = Surface::default();
        filtered.set(DISTANCE, Buffer::Float(FloatBuffer::from_slice(&[-5.0])));
        filtered.set(HEIGHT, Buffer::Float(FloatBuffer::from_slice(&[4.0])));

        let indices = Int32Buffer::from_slice(&[1]);
        let result = scatter_surface(&previous, 3, &filtered, &indices);

        assert_eq!(
            result.get(DISTANCE).unwrap().as_float().unwrap().to_vec(),
            vec![1.0, -5.0, 3.0]
        );
        assert_eq!(
            result.get(HEIGHT).unwrap().as_float().unwrap().to_vec(),
            vec![f32::NEG_INFINITY, 4.0, f32::NEG_INFINITY]
        );
        assert!(Arc::ptr_eq(
            result.get(MATERIAL).unwrap(),
            previous.get(MATERIAL).unwrap()
        ));
    }
}
