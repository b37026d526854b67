//! # Runtime Configuration
//!
//! Tunables for the task executor and channel evaluation. A [`RuntimeConfig`] can be built
//! in code, deserialized from JSON, or adjusted at runtime through named console variables.
//!
//! ## Console Variables
//!
//! | Name                               | Field                    |
//! |------------------------------------|--------------------------|
//! | `voxel.threading.NumThreads`       | `num_threads`            |
//! | `voxel.BypassTaskQueue`            | `bypass_task_queue`      |
//! | `voxel.threading.MaxSortedTasks`   | `max_sorted_tasks`       |
//! | `voxel.threading.PriorityDuration` | `priority_duration_secs` |
//! | `voxel.LogTasks`                   | `log_tasks`              |
//! | `voxel.CheckNaNs`                  | `check_nans`             |
//!
//! Thread count changes take effect on the next [`VoxelRuntime::tick`](crate::core::VoxelRuntime::tick).

use phf::phf_map;
use serde::{Deserialize, Serialize};
use std::thread;
use web_time::Duration;

use super::error::{VoxelError, VoxelResult};

/// Upper bound on worker threads.
pub const MAX_NUM_THREADS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleVariable {
    NumThreads,
    BypassTaskQueue,
    MaxSortedTasks,
    PriorityDuration,
    LogTasks,
    CheckNaNs,
}

static CONSOLE_VARIABLES: phf::Map<&'static str, ConsoleVariable> = phf_map! {
    "voxel.threading.NumThreads" => ConsoleVariable::NumThreads,
    "voxel.BypassTaskQueue" => ConsoleVariable::BypassTaskQueue,
    "voxel.threading.MaxSortedTasks" => ConsoleVariable::MaxSortedTasks,
    "voxel.threading.PriorityDuration" => ConsoleVariable::PriorityDuration,
    "voxel.LogTasks" => ConsoleVariable::LogTasks,
    "voxel.CheckNaNs" => ConsoleVariable::CheckNaNs,
};

/// Runtime tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads, clamped to `1..=128`.
    pub num_threads: usize,
    /// Execute ready tasks inline on the scheduling thread instead of queueing them.
    pub bypass_task_queue: bool,
    /// Above this many live task groups the executor stops keeping them sorted by priority.
    pub max_sorted_tasks: usize,
    /// Seconds between priority recomputations.
    pub priority_duration_secs: f64,
    /// Log every new task group.
    pub log_tasks: bool,
    /// Report non-finite floats in channel results.
    pub check_nans: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let available = thread::available_parallelism()
            .map(|parallelism| parallelism.get())
            .unwrap_or(1);

        Self {
            num_threads: available.saturating_sub(2).clamp(1, MAX_NUM_THREADS),
            bypass_task_queue: false,
            max_sorted_tasks: 4096,
            priority_duration_secs: 0.5,
            log_tasks: false,
            check_nans: false,
        }
    }
}

impl RuntimeConfig {
    /// Parses a configuration from JSON. Missing fields take their default value.
    pub fn from_json(json: &str) -> VoxelResult<Self> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()
    }

    /// Clamps the thread count and rejects values the executor can't work with.
    ///
    /// # Returns
    /// The validated configuration, or [`VoxelError::InvalidConfig`] naming the bad field.
    pub fn validate(mut self) -> VoxelResult<Self> {
        self.num_threads = self.num_threads.clamp(1, MAX_NUM_THREADS);

        if !self.priority_duration_secs.is_finite() || self.priority_duration_secs < 0.0 {
            return Err(VoxelError::InvalidConfig {
                name: "priority_duration_secs",
                reason: format!(
                    "expected a non-negative number of seconds, got {}",
                    self.priority_duration_secs
                ),
            });
        }

        Ok(self)
    }

    /// Time between two priority recomputations.
    pub fn priority_duration(&self) -> Duration {
        Duration::from_secs_f64(self.priority_duration_secs)
    }

    /// Names of every console variable.
    pub fn variable_names() -> impl Iterator<Item = &'static str> {
        CONSOLE_VARIABLES.keys().copied()
    }

    /// Sets a console variable from its string form.
    ///
    /// # Arguments
    /// * `name` - Console variable name, e.g. `voxel.threading.NumThreads`
    /// * `value` - New value. Booleans accept `0`/`1` as well as `true`/`false`
    pub fn set_variable(&mut self, name: &str, value: &str) -> VoxelResult<()> {
        let variable = CONSOLE_VARIABLES
            .get(name)
            .copied()
            .ok_or_else(|| VoxelError::UnknownVariable(name.to_string()))?;

        let invalid = || VoxelError::InvalidVariableValue {
            name: name.to_string(),
            value: value.to_string(),
        };

        let mut updated = *self;
        match variable {
            ConsoleVariable::NumThreads => {
                updated.num_threads = value.trim().parse().map_err(|_| invalid())?
            }
            ConsoleVariable::BypassTaskQueue => {
                updated.bypass_task_queue = parse_bool(value).ok_or_else(invalid)?
            }
            ConsoleVariable::MaxSortedTasks => {
                updated.max_sorted_tasks = value.trim().parse().map_err(|_| invalid())?
            }
            ConsoleVariable::PriorityDuration => {
                updated.priority_duration_secs = value.trim().parse().map_err(|_| invalid())?
            }
            ConsoleVariable::LogTasks => updated.log_tasks = parse_bool(value).ok_or_else(invalid)?,
            ConsoleVariable::CheckNaNs => {
                updated.check_nans = parse_bool(value).ok_or_else(invalid)?
            }
        }

        *self = updated.validate()?;
        Ok(())
    }

    /// Reads a console variable as a string.
    pub fn get_variable(&self, name: &str) -> VoxelResult<String> {
        let variable = CONSOLE_VARIABLES
            .get(name)
            .copied()
            .ok_or_else(|| VoxelError::UnknownVariable(name.to_string()))?;

        Ok(match variable {
            ConsoleVariable::NumThreads => self.num_threads.to_string(),
            ConsoleVariable::BypassTaskQueue => self.bypass_task_queue.to_string(),
            ConsoleVariable::MaxSortedTasks => self.max_sorted_tasks.to_string(),
            ConsoleVariable::PriorityDuration => self.priority_duration_secs.to_string(),
            ConsoleVariable::LogTasks => self.log_tasks.to_string(),
            ConsoleVariable::CheckNaNs => self.check_nans.to_string(),
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "True" => Some(true),
        "0" | "false" | "False" => Some(false),
        _ => None,
    }
}
