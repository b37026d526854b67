//! Channel definitions and the global registry they live in.

use log::info;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::core::error::{VoxelError, VoxelResult};
use crate::core::sync::RwLockExt;
use crate::value::{Value, ValueType};

/// Name, type and default value of a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDefinition {
    pub name: String,
    pub value_type: ValueType,
    pub default_value: Value,
}

impl ChannelDefinition {
    /// Creates a definition, checking that the default has the channel's type.
    ///
    /// # Arguments
    /// * `name` - Unique channel name
    /// * `value_type` - Type every brush on the channel must produce
    /// * `default_value` - Value of the channel where no brush applies
    pub fn new(
        name: impl Into<String>,
        value_type: ValueType,
        default_value: Value,
    ) -> VoxelResult<Self> {
        if default_value.value_type() != value_type {
            return Err(VoxelError::TypeMismatch {
                expected: value_type,
                actual: default_value.value_type(),
            });
        }
        Ok(Self {
            name: name.into(),
            value_type,
            default_value,
        })
    }

    /// Definition defaulting to the zero value of `value_type`.
    pub fn with_type_default(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            default_value: value_type.default_value(),
        }
    }
}

/// Channel definitions visible to every world.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    definitions: RwLock<HashMap<String, ChannelDefinition>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition. Names are unique.
    pub fn register_channel(&self, definition: ChannelDefinition) -> VoxelResult<()> {
        let mut definitions = self.definitions.write_locked();
        if definitions.contains_key(&definition.name) {
            return Err(VoxelError::ChannelAlreadyRegistered(definition.name));
        }
        info!(
            "Registered channel {} of type {}",
            definition.name, definition.value_type
        );
        definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn find_channel_definition(&self, name: &str) -> Option<ChannelDefinition> {
        self.definitions.read_locked().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.read_locked().contains_key(name)
    }

    /// Every registered name, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.read_locked().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn log_all_channels(&self) {
        let definitions = self.definitions.read_locked();
        info!("{} global channels", definitions.len());
        let mut sorted: Vec<&ChannelDefinition> = definitions.values().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        for definition in sorted {
            info!(
                "\t{}: {} (default {:?})",
                definition.name, definition.value_type, definition.default_value
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_rejects_mismatched_default() {
        let result = ChannelDefinition::new("Height", ValueType::FloatBuffer, Value::Int32(1));
        assert!(matches!(result, Err(VoxelError::TypeMismatch { .. })));

        let definition =
            ChannelDefinition::new("Height", ValueType::Float, Value::Float(1.0)).unwrap();
        assert_eq!(definition.default_value, Value::Float(1.0));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let registry = ChannelRegistry::new();
        registry
            .register_channel(ChannelDefinition::with_type_default("B", ValueType::Float))
            .unwrap();
        registry
            .register_channel(ChannelDefinition::with_type_default("A", ValueType::Int32))
            .unwrap();

        let result =
            registry.register_channel(ChannelDefinition::with_type_default("B", ValueType::Float));
        assert!(matches!(result, Err(VoxelError::ChannelAlreadyRegistered(name)) if name == "B"));

        assert_eq!(registry.channel_names(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(
            registry.find_channel_definition("A").unwrap().value_type,
            ValueType::Int32
        );
        assert!(registry.find_channel_definition("C").is_none());
    }
}
