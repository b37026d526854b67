//! Single-assignment values produced by tasks.
//!
//! A [`FutureValue`] is either an already-known [`Value`] or a handle to a shared
//! [`FutureValueState`] that a task will resolve later. Tasks waiting on a state are
//! registered as dependents and released when the value arrives. Linked states are
//! resolved with the same value, and async wakers are woken.

use log::trace;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock};
use std::task::{Context, Poll, Waker};

use super::task::DependentTask;
use crate::core::sync::MutexExt;
use crate::value::{Value, ValueType};

#[derive(Default)]
struct PendingWork {
    dependent_tasks: Vec<DependentTask>,
    linked_states: Vec<Arc<FutureValueState>>,
    wakers: Vec<Waker>,
}

/// Shared state behind a pending [`FutureValue`].
pub struct FutureValueState {
    value_type: ValueType,
    name: String,
    value: OnceLock<Value>,
    pending: Mutex<PendingWork>,
}

impl fmt::Debug for FutureValueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureValueState")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("is_complete", &self.is_complete())
            .finish()
    }
}

impl FutureValueState {
    pub(crate) fn new(value_type: ValueType, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            value_type,
            name: name.into(),
            value: OnceLock::new(),
            pending: Mutex::new(PendingWork::default()),
        })
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_complete(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.get()
    }

    /// Registers a task to release once the value is set.
    ///
    /// # Returns
    /// `false` if the value is already set. The check and the registration happen under
    /// the same lock `set_value` takes, so a dependent is never lost.
    pub(crate) fn try_add_dependent_task(&self, task: DependentTask) -> bool {
        let mut pending = self.pending.locked();
        if self.is_complete() {
            return false;
        }
        pending.dependent_tasks.push(task);
        true
    }

    /// Resolves `state` with this state's value, now or once it is set.
    pub(crate) fn add_linked_state(&self, state: Arc<FutureValueState>) {
        let value = {
            let mut pending = self.pending.locked();
            match self.value.get() {
                Some(value) => value.clone(),
                None => {
                    pending.linked_states.push(state);
                    return;
                }
            }
        };
        state.set_value(value);
    }

    fn register_waker(&self, waker: &Waker) -> bool {
        let mut pending = self.pending.locked();
        if self.is_complete() {
            return false;
        }
        if !pending.wakers.iter().any(|existing| existing.will_wake(waker)) {
            pending.wakers.push(waker.clone());
        }
        true
    }

    /// Sets the value and releases everything waiting on it. Must be called once.
    pub(crate) fn set_value(&self, value: Value) {
        ensure_voxel!(
            value.value_type() == self.value_type,
            "future {} expects {}, got {}",
            self.name,
            self.value_type,
            value.value_type()
        );

        let pending = {
            let mut pending = self.pending.locked();
            if self.value.set(value.clone()).is_err() {
                None
            } else {
                Some(std::mem::take(&mut *pending))
            }
        };

        let Some(pending) = pending else {
            ensure_voxel!(false, "value of future {} set twice", self.name);
            return;
        };

        for task in pending.dependent_tasks {
            task.release();
        }
        for state in pending.linked_states {
            state.set_value(value.clone());
        }
        for waker in pending.wakers {
            waker.wake();
        }
    }
}

impl Drop for FutureValueState {
    fn drop(&mut self) {
        if self.is_complete() {
            return;
        }
        trace!(
            "Future {} dropped before completion, resolving with default {}",
            self.name,
            self.value_type
        );
        self.set_value(self.value_type.default_value());
    }
}

#[derive(Clone)]
enum FutureRepr {
    Value(Value),
    State(Arc<FutureValueState>),
}

/// A value that is known now or will be produced by a task.
#[derive(Clone)]
pub struct FutureValue {
    repr: FutureRepr,
}

impl fmt::Debug for FutureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            FutureRepr::Value(value) => f.debug_tuple("FutureValue").field(value).finish(),
            FutureRepr::State(state) => f.debug_tuple("FutureValue").field(state).finish(),
        }
    }
}

impl From<Value> for FutureValue {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

impl FutureValue {
    /// An already-resolved future.
    pub fn from_value(value: Value) -> Self {
        Self {
            repr: FutureRepr::Value(value),
        }
    }

    pub(crate) fn from_state(state: Arc<FutureValueState>) -> Self {
        Self {
            repr: FutureRepr::State(state),
        }
    }

    pub fn is_complete(&self) -> bool {
        match &self.repr {
            FutureRepr::Value(_) => true,
            FutureRepr::State(state) => state.is_complete(),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match &self.repr {
            FutureRepr::Value(value) => value.value_type(),
            FutureRepr::State(state) => state.value_type(),
        }
    }

    /// The value, if resolved.
    pub fn value(&self) -> Option<Value> {
        match &self.repr {
            FutureRepr::Value(value) => Some(value.clone()),
            FutureRepr::State(state) => state.value().cloned(),
        }
    }

    /// The value of a future that must already be resolved, such as a task dependency.
    /// Falls back to the type default if it isn't.
    pub fn value_checked(&self) -> Value {
        match &self.repr {
            FutureRepr::Value(value) => value.clone(),
            FutureRepr::State(state) => match state.value() {
                Some(value) => value.clone(),
                None => {
                    ensure_voxel!(false, "future {} read before completion", state.name());
                    state.value_type().default_value()
                }
            },
        }
    }

    pub(crate) fn try_add_dependent_task(&self, task: DependentTask) -> bool {
        match &self.repr {
            FutureRepr::Value(_) => false,
            FutureRepr::State(state) => state.try_add_dependent_task(task),
        }
    }

    /// Resolves `state` with this future's value, now or once it is set.
    pub(crate) fn link_into(&self, state: Arc<FutureValueState>) {
        match &self.repr {
            FutureRepr::Value(value) => state.set_value(value.clone()),
            FutureRepr::State(source) => source.add_linked_state(state),
        }
    }

    /// Awaitable completing with the value.
    ///
    /// ```ignore
    /// let value = pollster::block_on(future.wait());
    /// ```
    pub fn wait(&self) -> WaitFuture {
        WaitFuture {
            future: self.clone(),
        }
    }
}

impl IntoFuture for FutureValue {
    type Output = Value;
    type IntoFuture = WaitFuture;

    fn into_future(self) -> WaitFuture {
        WaitFuture { future: self }
    }
}

/// [`Future`] adapter returned by [`FutureValue::wait`].
pub struct WaitFuture {
    future: FutureValue,
}

impl Future for WaitFuture {
    type Output = Value;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Value> {
        let state = match &self.future.repr {
            FutureRepr::Value(value) => return Poll::Ready(value.clone()),
            FutureRepr::State(state) => state,
        };

        if let Some(value) = state.value() {
            return Poll::Ready(value.clone());
        }
        if state.register_waker(cx.waker()) {
            return Poll::Pending;
        }
        Poll::Ready(state.value().cloned().unwrap_or_else(|| state.value_type().default_value()))
    }
}

/// Producer side of a pending [`FutureValue`], for values computed outside a task.
pub struct Promise {
    state: Arc<FutureValueState>,
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("state", &self.state).finish()
    }
}

impl Promise {
    pub fn new(value_type: ValueType, name: impl Into<String>) -> Self {
        Self {
            state: FutureValueState::new(value_type, name),
        }
    }

    pub fn future(&self) -> FutureValue {
        FutureValue::from_state(self.state.clone())
    }

    pub fn value_type(&self) -> ValueType {
        self.state.value_type()
    }

    pub fn set_value(self, value: Value) {
        self.state.set_value(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_known_value_is_complete() {
        let future = FutureValue::from_value(Value::Float(2.0));
        assert!(future.is_complete());
        assert_eq!(future.value_type(), ValueType::Float);
        assert_eq!(future.value_checked(), Value::Float(2.0));
    }

    #[test]
    fn test_promise_resolves_future() {
        let promise = Promise::new(ValueType::Int32, "Answer");
        let future = promise.future();
        assert!(!future.is_complete());
        assert_eq!(future.value(), None);

        promise.set_value(Value::Int32(42));
        assert_eq!(future.value(), Some(Value::Int32(42)));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "set twice")]
    fn test_double_set_value_fails() {
        let state = FutureValueState::new(ValueType::Float, "Twice");
        state.set_value(Value::Float(1.0));
        state.set_value(Value::Float(2.0));
    }

    #[test]
    fn test_linked_state_receives_value() {
        let source = Promise::new(ValueType::Float, "Source");
        let linked = FutureValueState::new(ValueType::Float, "Linked");
        source.future().link_into(linked.clone());
        assert!(!linked.is_complete());

        source.set_value(Value::Float(3.0));
        assert_eq!(linked.value(), Some(&Value::Float(3.0)));
    }

    #[test]
    fn test_dropped_state_resolves_linked_with_default() {
        let linked = FutureValueState::new(ValueType::Float, "Linked");
        {
            let source = Promise::new(ValueType::Float, "Abandoned");
            source.future().link_into(linked.clone());
        }
        assert_eq!(linked.value(), Some(&Value::Float(0.0)));
    }

    #[test]
    fn test_wait_across_threads() {
        let promise = Promise::new(ValueType::Float, "Threaded");
        let future = promise.future();

        let producer = thread::spawn(move || promise.set_value(Value::Float(9.0)));
        let value = pollster::block_on(future.wait());
        producer.join().unwrap();

        assert_eq!(value, Value::Float(9.0));
    }
}
