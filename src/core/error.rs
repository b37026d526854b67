//! Error types shared across the crate.

use thiserror::Error;

use crate::value::ValueType;

/// Errors surfaced by the voxel runtime.
///
/// Recoverable per-query problems (a brush returning the wrong type, NaNs in a buffer) are
/// reported through the [`MessageLog`](crate::core::MessageLog) instead and never show up
/// here. These variants cover configuration and API misuse that the caller must handle.
#[derive(Debug, Error)]
pub enum VoxelError {
    #[error("invalid value for {name}: {reason}")]
    InvalidConfig { name: &'static str, reason: String },

    #[error("unknown console variable: {0}")]
    UnknownVariable(String),

    #[error("invalid value '{value}' for console variable {name}")]
    InvalidVariableValue { name: String, value: String },

    #[error("failed to parse runtime configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("{0}")]
    SynchronousEvaluation(String),

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("channel already registered: {0}")]
    ChannelAlreadyRegistered(String),

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: ValueType, actual: ValueType },
}

/// Convenience alias used by fallible runtime operations.
pub type VoxelResult<T> = Result<T, VoxelError>;
