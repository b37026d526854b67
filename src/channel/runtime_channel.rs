//! # Runtime Channels
//!
//! A [`RuntimeChannel`] is the view of a world channel from one runtime instance. It keeps
//! every brush's bounds converted into the instance's local space and owns the
//! [`Dependency`] queries register on when they read the channel.
//!
//! ## Bounds Tracking
//!
//! Each brush subscribes to both its own transform and the instance transform. When
//! either changes its runtime bounds are recomputed, and the channel dependency is
//! invalidated over the union of the old and new bounds, tagged with the brush priority.
//! Removing a brush invalidates its last known bounds. Infinite brush bounds stay
//! infinite in every space.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use super::brush::{Brush, BrushId};
use super::definition::ChannelDefinition;
use super::evaluator::ChannelEvaluator;
use super::priority::BrushPriority;
use super::world_channel::WorldChannel;
use crate::core::sync::MutexExt;
use crate::dependency::{Dependency, DependencyTracker, InvalidationParameters, InvalidationScope};
use crate::math::{TransformListener, TransformRef, VoxelBox};
use crate::query::Query;
use crate::task::{FutureValue, TaskContext};

struct RuntimeBrush {
    brush: Arc<Brush>,
    runtime_bounds: Option<VoxelBox>,
    _listener: Arc<TransformListener>,
}

/// Brushes of a channel as seen from one runtime instance.
pub struct RuntimeChannel {
    world_channel: Weak<WorldChannel>,
    definition: ChannelDefinition,
    runtime_local_to_world: TransformRef,
    dependency: Arc<Dependency>,
    weak_self: Weak<RuntimeChannel>,
    brushes: Mutex<HashMap<BrushId, RuntimeBrush>>,
}

impl fmt::Debug for RuntimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeChannel")
            .field("name", &self.definition.name)
            .field("runtime", &self.runtime_local_to_world.name())
            .field("num_brushes", &self.num_brushes())
            .finish()
    }
}

impl RuntimeChannel {
    pub(crate) fn new(
        world_channel: Weak<WorldChannel>,
        definition: ChannelDefinition,
        runtime_local_to_world: TransformRef,
    ) -> Arc<Self> {
        let dependency = Dependency::new("Channel", definition.name.clone());
        Arc::new_cyclic(|weak_self| Self {
            world_channel,
            definition,
            runtime_local_to_world,
            dependency,
            weak_self: weak_self.clone(),
            brushes: Mutex::new(HashMap::new()),
        })
    }

    pub fn definition(&self) -> &ChannelDefinition {
        &self.definition
    }

    pub fn world_channel(&self) -> Option<Arc<WorldChannel>> {
        self.world_channel.upgrade()
    }

    pub fn runtime_local_to_world(&self) -> &TransformRef {
        &self.runtime_local_to_world
    }

    pub fn dependency(&self) -> &Arc<Dependency> {
        &self.dependency
    }

    pub fn num_brushes(&self) -> usize {
        self.brushes.locked().len()
    }

    /// Runtime-space bounds of a brush, once computed.
    pub fn brush_bounds(&self, id: BrushId) -> Option<VoxelBox> {
        self.brushes
            .locked()
            .get(&id)
            .and_then(|brush| brush.runtime_bounds)
    }

    /// Composites every brush of the channel for `query`.
    pub fn get(self: &Arc<Self>, ctx: &TaskContext<'_>, query: &Query) -> ChannelFuture {
        ChannelEvaluator::compute(self, ctx, query)
    }

    pub(crate) fn add_brush(&self, id: BrushId, brush: Arc<Brush>, scope: &mut InvalidationScope) {
        let weak_self = self.weak_self.clone();
        let listener: Arc<TransformListener> = Arc::new(move |_matrix: &cgmath::Matrix4<f64>| {
            if let Some(runtime_channel) = weak_self.upgrade() {
                runtime_channel.update_brush_bounds(id);
            }
        });
        brush.local_to_world().add_on_changed(&listener);
        self.runtime_local_to_world.add_on_changed(&listener);

        let mut brushes = self.brushes.locked();
        brushes.insert(
            id,
            RuntimeBrush {
                brush,
                runtime_bounds: None,
                _listener: listener,
            },
        );
        if let Some(runtime_brush) = brushes.get_mut(&id) {
            self.refresh_bounds(runtime_brush, scope);
        }
    }

    pub(crate) fn remove_brush(&self, id: BrushId, scope: &mut InvalidationScope) {
        let Some(runtime_brush) = self.brushes.locked().remove(&id) else {
            return;
        };
        if let Some(bounds) = runtime_brush.runtime_bounds {
            self.invalidate(bounds, runtime_brush.brush.priority(), scope);
        }
    }

    fn update_brush_bounds(&self, id: BrushId) {
        let mut scope = InvalidationScope::new();
        let mut brushes = self.brushes.locked();
        if let Some(runtime_brush) = brushes.get_mut(&id) {
            self.refresh_bounds(runtime_brush, &mut scope);
        }
    }

    fn refresh_bounds(&self, runtime_brush: &mut RuntimeBrush, scope: &mut InvalidationScope) {
        let brush = &runtime_brush.brush;
        let new_bounds = if brush.local_bounds().is_infinite() {
            VoxelBox::INFINITE
        } else {
            let brush_to_runtime = brush
                .local_to_world()
                .relative_to(&self.runtime_local_to_world);
            brush.local_bounds().transform_by(&brush_to_runtime)
        };

        let invalidated = match runtime_brush.runtime_bounds {
            Some(old_bounds) => old_bounds.union(&new_bounds),
            None => new_bounds,
        };
        runtime_brush.runtime_bounds = Some(new_bounds);
        self.invalidate(invalidated, brush.priority(), scope);
    }

    fn invalidate(&self, bounds: VoxelBox, priority: BrushPriority, scope: &mut InvalidationScope) {
        self.dependency.invalidate_in(
            InvalidationParameters {
                bounds: Some(bounds),
                less_or_equal_tag: Some(priority.raw()),
            },
            scope,
        );
    }

    /// Brushes strictly below `ceiling` whose runtime bounds intersect `bounds`.
    ///
    /// Registers `tracker` on the channel first, so a brush change racing with the read
    /// still invalidates it.
    pub(crate) fn gather_brushes(
        &self,
        tracker: &DependencyTracker,
        bounds: VoxelBox,
        ceiling: BrushPriority,
    ) -> Vec<Arc<Brush>> {
        tracker.add_dependency(&self.dependency, Some(bounds), Some(ceiling.raw()));

        self.brushes
            .locked()
            .values()
            .filter(|runtime_brush| runtime_brush.brush.priority() < ceiling)
            .filter(|runtime_brush| {
                runtime_brush
                    .runtime_bounds
                    .is_some_and(|brush_bounds| brush_bounds.intersect(&bounds))
            })
            .map(|runtime_brush| runtime_brush.brush.clone())
            .collect()
    }
}

/// Result of [`RuntimeChannel::get`].
#[derive(Debug, Clone)]
pub struct ChannelFuture {
    pub value: FutureValue,
    is_default: Arc<OnceLock<bool>>,
}

impl ChannelFuture {
    pub(crate) fn new(value: FutureValue, is_default: Arc<OnceLock<bool>>) -> Self {
        Self { value, is_default }
    }

    pub(crate) fn from_default(value: FutureValue) -> Self {
        let is_default = OnceLock::new();
        let _ = is_default.set(true);
        Self {
            value,
            is_default: Arc::new(is_default),
        }
    }

    /// Whether no brush wrote the value. `None` until compositing finished.
    pub fn is_default(&self) -> Option<bool> {
        self.is_default.get().copied()
    }
}

/// Runtime channels of one runtime instance, by channel name.
pub struct RuntimeChannelCache {
    local_to_world: TransformRef,
    channels: Mutex<HashMap<String, Arc<RuntimeChannel>>>,
}

impl fmt::Debug for RuntimeChannelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeChannelCache")
            .field("local_to_world", &self.local_to_world.name())
            .field("num_channels", &self.channels.locked().len())
            .finish()
    }
}

impl RuntimeChannelCache {
    pub fn new(local_to_world: TransformRef) -> Self {
        Self {
            local_to_world,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_to_world(&self) -> &TransformRef {
        &self.local_to_world
    }

    pub fn len(&self) -> usize {
        self.channels.locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.locked().is_empty()
    }

    pub(crate) fn get_or_create(
        &self,
        name: &str,
        create: impl FnOnce() -> Arc<RuntimeChannel>,
    ) -> Arc<RuntimeChannel> {
        let mut channels = self.channels.locked();
        if let Some(channel) = channels.get(name) {
            return channel.clone();
        }
        let channel = create();
        channels.insert(name.to_string(), channel.clone());
        channel
    }
}
