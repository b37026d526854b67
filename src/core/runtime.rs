//! # Voxel Runtime
//!
//! [`VoxelRuntime`] is the explicit context object that owns everything the task graph and
//! the channel system share: the configuration, the message log, the worker pool, the
//! global channel registry and the camera position used for task priorities.
//!
//! ## Architecture
//!
//! The runtime splits into two halves:
//! - [`RuntimeState`]: shared, reference-counted state that task groups hold on to. It never
//!   owns a thread, so a group keeping it alive can't keep the worker pool alive.
//! - [`VoxelRuntime`]: the owner handle. Dropping it requests exit, stops the worker
//!   threads and joins them.
//!
//! ## Example Usage
//! ```ignore
//! let runtime = VoxelRuntime::new(RuntimeConfig::default())?;
//! runtime.set_variable("voxel.threading.NumThreads", "4")?;
//!
//! // Called periodically by the host application
//! runtime.tick();
//! ```

use cgmath::Point3;
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::config::RuntimeConfig;
use super::error::VoxelResult;
use super::message::MessageLog;
use super::sync::RwLockExt;
use crate::channel::{ChannelRegistry, WorldChannelManager};
use crate::task::executor::{TaskExecutor, WorkerEvent};
use crate::task::priority::CameraPosition;

/// State shared between the runtime, its worker threads and every task group.
#[derive(Debug)]
pub struct RuntimeState {
    config: RwLock<RuntimeConfig>,
    messages: MessageLog,
    camera: CameraPosition,
    event: WorkerEvent,
    is_exiting: AtomicBool,
}

impl RuntimeState {
    pub(crate) fn new(config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            messages: MessageLog::new(),
            camera: CameraPosition::default(),
            event: WorkerEvent::default(),
            is_exiting: AtomicBool::new(false),
        })
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> RuntimeConfig {
        *self.config.read_locked()
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn camera(&self) -> &CameraPosition {
        &self.camera
    }

    /// True once shutdown was requested. Task groups stop processing as soon as they see it.
    pub fn is_exiting(&self) -> bool {
        self.is_exiting.load(Ordering::Acquire)
    }

    pub(crate) fn event(&self) -> &WorkerEvent {
        &self.event
    }

    fn request_exit(&self) -> bool {
        !self.is_exiting.swap(true, Ordering::AcqRel)
    }
}

/// Owner of the voxel runtime.
pub struct VoxelRuntime {
    state: Arc<RuntimeState>,
    executor: TaskExecutor,
    channel_registry: Arc<ChannelRegistry>,
}

impl VoxelRuntime {
    /// Creates a runtime and starts its worker threads.
    ///
    /// # Arguments
    /// * `config` - Runtime tunables, validated before use
    ///
    /// # Returns
    /// The runtime, or the validation error of `config`.
    pub fn new(config: RuntimeConfig) -> VoxelResult<Self> {
        let config = config.validate()?;
        let state = RuntimeState::new(config);
        let executor = TaskExecutor::new(state.clone());

        let runtime = Self {
            state,
            executor,
            channel_registry: Arc::new(ChannelRegistry::new()),
        };
        runtime.executor.tick();

        info!(
            "Voxel runtime started with {} worker threads",
            runtime.executor.num_threads()
        );
        Ok(runtime)
    }

    pub fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn config(&self) -> RuntimeConfig {
        self.state.config()
    }

    pub fn messages(&self) -> &MessageLog {
        self.state.messages()
    }

    /// Global channel definitions shared by every world.
    pub fn channel_registry(&self) -> &Arc<ChannelRegistry> {
        &self.channel_registry
    }

    /// Creates an empty world whose channels can be looked up from the global registry.
    pub fn create_world(&self) -> Arc<WorldChannelManager> {
        Arc::new(WorldChannelManager::new(self.channel_registry.clone()))
    }

    /// Sets a console variable. See [`RuntimeConfig::set_variable`].
    pub fn set_variable(&self, name: &str, value: &str) -> VoxelResult<()> {
        self.state.config.write_locked().set_variable(name, value)
    }

    pub fn get_variable(&self, name: &str) -> VoxelResult<String> {
        self.state.config().get_variable(name)
    }

    /// Updates the world-space camera position that bounds-based priorities measure from.
    pub fn set_camera_position(&self, position: Point3<f64>) {
        self.state.camera.set(position);
    }

    /// Periodic maintenance: applies the thread count and refreshes group priorities.
    pub fn tick(&self) {
        self.executor.tick();
    }

    /// Requests exit and joins the worker threads. Idempotent.
    pub fn shutdown(&self) {
        if !self.state.request_exit() {
            return;
        }
        info!("Voxel runtime shutting down");
        self.state.event.trigger();
        self.executor.shutdown();
    }
}

impl Drop for VoxelRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RuntimeConfig {
        RuntimeConfig {
            num_threads: 2,
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn test_runtime_starts_and_shuts_down() {
        let runtime = VoxelRuntime::new(test_config()).unwrap();
        assert_eq!(runtime.executor().num_threads(), 2);
        assert!(!runtime.state().is_exiting());

        runtime.shutdown();
        assert!(runtime.state().is_exiting());
        assert_eq!(runtime.executor().num_threads(), 0);

        runtime.shutdown();
    }

    #[test]
    fn test_thread_count_applies_on_tick() {
        let runtime = VoxelRuntime::new(test_config()).unwrap();
        runtime.set_variable("voxel.threading.NumThreads", "3").unwrap();
        assert_eq!(runtime.executor().num_threads(), 2);

        runtime.tick();
        assert_eq!(runtime.executor().num_threads(), 3);
        assert_eq!(runtime.get_variable("voxel.threading.NumThreads").unwrap(), "3");
    }

    #[test]
    fn test_camera_position_is_shared() {
        let runtime = VoxelRuntime::new(test_config()).unwrap();
        runtime.set_camera_position(Point3::new(1.0, 2.0, 3.0));
        assert_eq!(runtime.state().camera().get(), Point3::new(1.0, 2.0, 3.0));
    }
}
