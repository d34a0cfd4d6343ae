//! Request-scoped runtime context
//!
//! Every in-flight request owns one [`RequestRuntimeState`], stored in a
//! tokio task-local slot that [`scope`] opens around the request's future.
//! Two requests multiplexed onto the same worker thread each see only their
//! own slot, and the slot is dropped together with the scope, so there is no
//! shared map keyed by request id to leak or grow.
//!
//! The free functions below act on the calling task's slot. Outside a scope,
//! or while the context is inactive, readers return nothing and writers do
//! nothing; only [`start`] reports the missing scope as an error.

use crate::error::{Result, RuntimeError};
use conduit_types::SnapshotId;
use serde_json::{Map, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Captured outputs: step name -> output name -> value
pub type StepOutputs = BTreeMap<String, Map<String, Value>>;

/// Opaque in-memory artifact payload
pub type InMemoryValue = Arc<dyn Any + Send + Sync>;

tokio::task_local! {
    static REQUEST_STATE: RefCell<RequestRuntimeState>;
}

#[derive(Default)]
struct RequestRuntimeState {
    active: bool,
    use_in_memory: bool,
    request_id: Option<String>,
    snapshot_id: Option<SnapshotId>,
    parameters: Map<String, Value>,
    outputs: StepOutputs,
    in_memory: HashMap<String, InMemoryValue>,
}

/// Run `fut` with a fresh, inactive request slot.
///
/// The slot belongs to `fut` alone. Tasks started with `tokio::spawn` from
/// inside it run outside any scope and see an inactive context, so a step
/// that fans out must read its overrides before spawning and record the
/// results after joining.
pub async fn scope<F: Future>(fut: F) -> F::Output {
    REQUEST_STATE
        .scope(RefCell::new(RequestRuntimeState::default()), fut)
        .await
}

/// Run `f` with a fresh, inactive request slot on the current thread.
pub fn sync_scope<R>(f: impl FnOnce() -> R) -> R {
    REQUEST_STATE.sync_scope(RefCell::new(RequestRuntimeState::default()), f)
}

/// Whether the caller runs inside [`scope`] or [`sync_scope`]
pub fn in_scope() -> bool {
    REQUEST_STATE.try_with(|_| ()).is_ok()
}

fn with_state<R>(f: impl FnOnce(&mut RequestRuntimeState) -> R) -> Option<R> {
    REQUEST_STATE
        .try_with(|cell| f(&mut cell.borrow_mut()))
        .ok()
}

fn with_active<R>(f: impl FnOnce(&mut RequestRuntimeState) -> R) -> Option<R> {
    with_state(|state| state.active.then(|| f(state))).flatten()
}

/// Activate a fresh context, discarding whatever the slot held before.
pub fn start(
    request_id: impl Into<String>,
    snapshot_id: SnapshotId,
    parameters: Map<String, Value>,
    use_in_memory: bool,
) -> Result<()> {
    let request_id = request_id.into();
    debug!(
        request_id = %request_id,
        snapshot_id = %snapshot_id,
        parameters = parameters.len(),
        use_in_memory,
        "Request context started"
    );
    with_state(move |state| {
        *state = RequestRuntimeState {
            active: true,
            use_in_memory,
            request_id: Some(request_id),
            snapshot_id: Some(snapshot_id),
            parameters,
            ..Default::default()
        };
    })
    .ok_or(RuntimeError::NoRequestScope)
}

/// [`start`], returning a guard that calls [`stop`] when dropped
pub fn activate(
    request_id: impl Into<String>,
    snapshot_id: SnapshotId,
    parameters: Map<String, Value>,
    use_in_memory: bool,
) -> Result<RequestGuard> {
    start(request_id, snapshot_id, parameters, use_in_memory)?;
    Ok(RequestGuard { _private: () })
}

/// Clear the calling task's context.
pub fn stop() {
    if let Some(Some(request_id)) = with_state(|state| std::mem::take(state).request_id) {
        debug!(request_id = %request_id, "Request context stopped");
    }
}

pub fn is_active() -> bool {
    with_state(|state| state.active).unwrap_or(false)
}

pub fn request_id() -> Option<String> {
    with_active(|state| state.request_id.clone()).flatten()
}

pub fn snapshot_id() -> Option<SnapshotId> {
    with_active(|state| state.snapshot_id).flatten()
}

/// Merge `outputs` into the outputs captured for `step`.
///
/// Later values for the same output name win. Empty maps are ignored.
pub fn record_step_outputs(step: &str, outputs: Map<String, Value>) {
    if outputs.is_empty() {
        return;
    }
    with_active(|state| {
        state
            .outputs
            .entry(step.to_string())
            .or_default()
            .extend(outputs);
    });
}

/// Copy of the captured outputs
pub fn get_outputs() -> StepOutputs {
    with_active(|state| state.outputs.clone()).unwrap_or_default()
}

/// Override for the top-level parameter `name`
pub fn get_parameter_override(name: &str) -> Option<Value> {
    with_active(|state| state.parameters.get(name).cloned()).flatten()
}

pub fn should_use_in_memory() -> bool {
    with_active(|state| state.use_in_memory).unwrap_or(false)
}

pub fn put_in_memory_data<T: Any + Send + Sync>(uri: impl Into<String>, value: T) {
    let uri = uri.into();
    with_active(move |state| {
        state.in_memory.insert(uri, Arc::new(value));
    });
}

pub fn get_in_memory_data(uri: &str) -> Option<InMemoryValue> {
    with_active(|state| state.in_memory.get(uri).cloned()).flatten()
}

/// [`get_in_memory_data`], downcast to `T`
pub fn get_in_memory_data_as<T: Any + Send + Sync>(uri: &str) -> Option<Arc<T>> {
    get_in_memory_data(uri)?.downcast::<T>().ok()
}

pub fn has_in_memory_data(uri: &str) -> bool {
    with_active(|state| state.in_memory.contains_key(uri)).unwrap_or(false)
}

/// Stops the request context when dropped
#[derive(Debug)]
#[must_use = "the context stops as soon as the guard is dropped"]
pub struct RequestGuard {
    _private: (),
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        stop();
    }
}
