//! # World Channels
//!
//! A [`WorldChannel`] owns the live brushes of one channel in one world. Every runtime
//! instance evaluating the channel gets its own [`RuntimeChannel`], which caches the
//! brush bounds in that instance's space.
//!
//! ## Architecture
//!
//! - Brushes live in a [`SparseArray`], so a [`BrushId`] stays valid until its brush is
//!   removed and is never reused for another brush
//! - Runtime channels are held weakly and compacted whenever brushes are fanned out
//! - Additions and removals are applied to every runtime channel under the world
//!   channel's lock, so a runtime channel never misses or double-applies one
//!
//! Lock order is world channel, then runtime channel. Invalidations collected while
//! these locks are held fire after they are released.

use log::info;
use std::sync::{Arc, Mutex, Weak};

use super::brush::{Brush, BrushId, BrushRef};
use super::definition::ChannelDefinition;
use super::runtime_channel::{RuntimeChannel, RuntimeChannelCache};
use crate::core::sparse_array::SparseArray;
use crate::core::sync::MutexExt;
use crate::dependency::InvalidationScope;

#[derive(Default)]
struct WorldChannelState {
    brushes: SparseArray<Arc<Brush>>,
    runtime_channels: Vec<Weak<RuntimeChannel>>,
}

impl WorldChannelState {
    fn live_runtime_channels(&mut self) -> Vec<Arc<RuntimeChannel>> {
        self.runtime_channels
            .retain(|runtime_channel| runtime_channel.strong_count() > 0);
        self.runtime_channels
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

/// Brushes of one channel in one world.
pub struct WorldChannel {
    definition: ChannelDefinition,
    state: Mutex<WorldChannelState>,
}

impl std::fmt::Debug for WorldChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldChannel")
            .field("name", &self.definition.name)
            .field("num_brushes", &self.num_brushes())
            .finish()
    }
}

impl WorldChannel {
    pub fn new(definition: ChannelDefinition) -> Arc<Self> {
        Arc::new(Self {
            definition,
            state: Mutex::new(WorldChannelState::default()),
        })
    }

    pub fn definition(&self) -> &ChannelDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn num_brushes(&self) -> usize {
        self.state.locked().brushes.len()
    }

    /// Registers `brush` and applies it to every runtime channel.
    ///
    /// # Arguments
    /// * `brush` - The new brush
    /// * `previous` - Registration this brush replaces. It is removed under the same lock
    ///   the new brush is added with, so evaluations never see both
    ///
    /// # Returns
    /// The handle keeping the brush registered.
    pub fn add_brush(self: &Arc<Self>, brush: Brush, previous: Option<BrushRef>) -> BrushRef {
        let previous_id = match previous {
            Some(previous) if previous.is_for(self) => previous.release(),
            Some(previous) => {
                drop(previous);
                None
            }
            None => None,
        };

        let brush = Arc::new(brush);
        let mut scope = InvalidationScope::new();
        let id = {
            let mut state = self.state.locked();
            let runtime_channels = state.live_runtime_channels();

            if let Some(previous_id) = previous_id {
                if state.brushes.remove(previous_id.0).is_some() {
                    for runtime_channel in &runtime_channels {
                        runtime_channel.remove_brush(previous_id, &mut scope);
                    }
                }
            }

            let id = BrushId(state.brushes.add(brush.clone()));
            for runtime_channel in &runtime_channels {
                runtime_channel.add_brush(id, brush.clone(), &mut scope);
            }
            id
        };

        BrushRef::new(self, id)
    }

    /// Unregisters a brush from the world and every runtime channel.
    pub fn remove_brush(&self, id: BrushId) {
        let mut scope = InvalidationScope::new();
        let mut state = self.state.locked();
        if state.brushes.remove(id.0).is_none() {
            return;
        }
        for runtime_channel in state.live_runtime_channels() {
            runtime_channel.remove_brush(id, &mut scope);
        }
    }

    /// The runtime channel of this channel for the runtime instance owning `cache`,
    /// created with every current brush on first use.
    pub fn get_runtime_channel(self: &Arc<Self>, cache: &RuntimeChannelCache) -> Arc<RuntimeChannel> {
        cache.get_or_create(&self.definition.name, || {
            let runtime_channel = RuntimeChannel::new(
                Arc::downgrade(self),
                self.definition.clone(),
                cache.local_to_world().clone(),
            );

            let mut scope = InvalidationScope::new();
            let mut state = self.state.locked();
            for (id, brush) in state.brushes.iter() {
                runtime_channel.add_brush(BrushId(id), brush.clone(), &mut scope);
            }
            state.runtime_channels.push(Arc::downgrade(&runtime_channel));
            runtime_channel
        })
    }

    /// Logs every brush with its priority and bounds.
    pub fn log_brushes(&self) {
        let state = self.state.locked();
        info!(
            "Channel {} ({}): {} brushes",
            self.definition.name,
            self.definition.value_type,
            state.brushes.len()
        );
        let mut brushes: Vec<&Arc<Brush>> = state.brushes.iter().map(|(_, brush)| brush).collect();
        brushes.sort_by_key(|brush| brush.priority());
        for brush in brushes {
            info!(
                "\t{} priority {} bounds {:?}",
                brush.debug_name(),
                brush.priority(),
                brush.local_bounds()
            );
        }
    }
}

impl Drop for WorldChannel {
    fn drop(&mut self) {
        let mut scope = InvalidationScope::new();
        let state = self.state.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner);
        let ids: Vec<BrushId> = state.brushes.iter().map(|(id, _)| BrushId(id)).collect();
        for runtime_channel in state.live_runtime_channels() {
            for id in &ids {
                runtime_channel.remove_brush(*id, &mut scope);
            }
        }
    }
}
