//! Per-world channel lookup.

use log::info;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use super::brush::{Brush, BrushRef};
use super::definition::{ChannelDefinition, ChannelRegistry};
use super::runtime_channel::{RuntimeChannel, RuntimeChannelCache};
use super::world_channel::WorldChannel;
use crate::core::error::{VoxelError, VoxelResult};
use crate::core::sync::RwLockExt;

/// The channels of one world.
///
/// Channels come from two places: definitions registered in this world only, and the
/// global [`ChannelRegistry`]. Global channels are instantiated the first time they are
/// looked up.
///
/// # Examples
///
/// ```ignore
/// let world = runtime.create_world();
/// world.register_channel(ChannelDefinition::with_type_default("Mask", ValueType::FloatBuffer))?;
///
/// let cache = RuntimeChannelCache::new(TransformRef::identity("Landscape"));
/// let mask = world.find_runtime_channel("Mask", &cache).ok_or(...)?;
/// ```
#[derive(Debug)]
pub struct WorldChannelManager {
    registry: Arc<ChannelRegistry>,
    channels: RwLock<HashMap<String, Arc<WorldChannel>>>,
}

impl WorldChannelManager {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self {
            registry,
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Adds a channel visible to this world only.
    ///
    /// # Returns
    /// The new channel, or [`VoxelError::ChannelAlreadyRegistered`] if the name is taken
    /// globally or in this world.
    pub fn register_channel(&self, definition: ChannelDefinition) -> VoxelResult<Arc<WorldChannel>> {
        if self.registry.contains(&definition.name) {
            return Err(VoxelError::ChannelAlreadyRegistered(definition.name));
        }

        let mut channels = self.channels.write_locked();
        if channels.contains_key(&definition.name) {
            return Err(VoxelError::ChannelAlreadyRegistered(definition.name));
        }

        info!("Registered world channel {}", definition.name);
        let channel = WorldChannel::new(definition);
        channels.insert(channel.name().to_string(), channel.clone());
        Ok(channel)
    }

    /// The channel named `name`, instantiating a global channel on first use.
    pub fn find_channel(&self, name: &str) -> Option<Arc<WorldChannel>> {
        if let Some(channel) = self.channels.read_locked().get(name) {
            return Some(channel.clone());
        }

        let definition = self.registry.find_channel_definition(name)?;
        let mut channels = self.channels.write_locked();
        let channel = channels
            .entry(name.to_string())
            .or_insert_with(|| WorldChannel::new(definition));
        Some(channel.clone())
    }

    /// Names of every channel usable in this world, sorted.
    pub fn get_valid_channel_names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.registry.channel_names().into_iter().collect();
        names.extend(self.channels.read_locked().keys().cloned());
        names.into_iter().collect()
    }

    /// The runtime channel of `name` for the runtime instance owning `cache`.
    pub fn find_runtime_channel(
        &self,
        name: &str,
        cache: &RuntimeChannelCache,
    ) -> Option<Arc<RuntimeChannel>> {
        Some(self.find_channel(name)?.get_runtime_channel(cache))
    }

    /// Logs every global channel, then the brushes of every channel of this world.
    pub fn log_all_channels(&self) {
        self.registry.log_all_channels();
        self.log_all_brushes();
    }

    pub fn log_all_brushes(&self) {
        let mut channels: Vec<Arc<WorldChannel>> =
            self.channels.read_locked().values().cloned().collect();
        channels.sort_by(|a, b| a.name().cmp(b.name()));
        for channel in channels {
            channel.log_brushes();
        }
    }
}

/// Registers `brush` on the channel named `channel_name`.
///
/// # Arguments
/// * `world` - World the brush belongs to
/// * `channel_name` - Channel the brush writes
/// * `brush` - The brush
/// * `previous` - Registration this brush replaces, if any
///
/// # Returns
/// The handle keeping the brush registered, or [`VoxelError::UnknownChannel`].
pub fn register_brush(
    world: &WorldChannelManager,
    channel_name: &str,
    brush: Brush,
    previous: Option<BrushRef>,
) -> VoxelResult<BrushRef> {
    let channel = world
        .find_channel(channel_name)
        .ok_or_else(|| VoxelError::UnknownChannel(channel_name.to_string()))?;
    Ok(channel.add_brush(brush, previous))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{TransformRef, VoxelBox};
    use crate::channel::BrushPriority;
    use crate::task::FutureValue;
    use crate::value::{Value, ValueType};

    fn manager() -> WorldChannelManager {
        let registry = Arc::new(ChannelRegistry::new());
        registry
            .register_channel(ChannelDefinition::with_type_default("Global", ValueType::Float))
            .unwrap();
        WorldChannelManager::new(registry)
    }

    fn constant_brush(value: f32) -> Brush {
        Brush::new(
            "Constant",
            BrushPriority::from_base(0),
            VoxelBox::INFINITE,
            TransformRef::identity("Brush"),
            move |_, _| FutureValue::from_value(Value::Float(value)),
        )
    }

    #[test]
    fn test_register_channel_conflicts() {
        let world = manager();
        assert!(matches!(
            world.register_channel(ChannelDefinition::with_type_default("Global", ValueType::Float)),
            Err(VoxelError::ChannelAlreadyRegistered(_))
        ));

        world
            .register_channel(ChannelDefinition::with_type_default("Local", ValueType::Int32))
            .unwrap();
        assert!(matches!(
            world.register_channel(ChannelDefinition::with_type_default("Local", ValueType::Int32)),
            Err(VoxelError::ChannelAlreadyRegistered(_))
        ));

        assert_eq!(
            world.get_valid_channel_names(),
            vec!["Global".to_string(), "Local".to_string()]
        );
    }

    #[test]
    fn test_find_channel_instantiates_global_once() {
        let world = manager();
        let a = world.find_channel("Global").unwrap();
        let b = world.find_channel("Global").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(world.find_channel("Missing").is_none());
    }

    #[test]
    fn test_brush_ref_lifetime() {
        let world = manager();
        let brush_ref = register_brush(&world, "Global", constant_brush(1.0), None).unwrap();
        let channel = world.find_channel("Global").unwrap();
        assert_eq!(channel.num_brushes(), 1);

        let replacement =
            register_brush(&world, "Global", constant_brush(2.0), Some(brush_ref)).unwrap();
        assert_eq!(channel.num_brushes(), 1);

        drop(replacement);
        assert_eq!(channel.num_brushes(), 0);

        assert!(matches!(
            register_brush(&world, "Missing", constant_brush(1.0), None),
            Err(VoxelError::UnknownChannel(_))
        ));
    }

    #[test]
    fn test_runtime_channel_is_cached_and_sees_brushes() {
        let world = manager();
        let _before = register_brush(&world, "Global", constant_brush(1.0), None).unwrap();

        let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
        let runtime_channel = world.find_runtime_channel("Global", &cache).unwrap();
        assert_eq!(runtime_channel.num_brushes(), 1);
        assert!(Arc::ptr_eq(
            &runtime_channel,
            &world.find_runtime_channel("Global", &cache).unwrap()
        ));

        let after = register_brush(&world, "Global", constant_brush(2.0), None).unwrap();
        assert_eq!(runtime_channel.num_brushes(), 2);
        let bounds = runtime_channel.brush_bounds(after.id().unwrap()).unwrap();
        assert!(bounds.is_infinite());

        drop(after);
        assert_eq!(runtime_channel.num_brushes(), 1);
    }
}
