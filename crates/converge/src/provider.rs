//! Provider abstraction for the remote compute API
//!
//! The reconciliation pass only talks to the remote side through
//! [`Provider`]. Use [`MockProvider`] for testing without network access:
//!
//! ```
//! use converge::provider::{MockProvider, Provider};
//! use converge::types::{DeclaredConfiguration, ObservedState, ResourceKind};
//!
//! let config = DeclaredConfiguration::new(ResourceKind::VirtualMachine, "web-0", "westeurope");
//! let mock = MockProvider::new().with_resource(ObservedState::new("/vms/web-0", config));
//! assert!(mock.fetch_state(&"/vms/web-0".into()).is_ok());
//! ```

use crate::error::{Error, Result};
use crate::planner::UpdatePayload;
use crate::power::PowerState;
use crate::types::{InstanceStatus, ObservedState, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Reference to a remote operation started by a mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    /// Resource the operation acts on
    pub resource: ResourceId,
    /// Short description, e.g. "deallocate web-0"
    pub operation: String,
    /// Where to poll; `None` when the provider finished synchronously
    pub location: Option<String>,
}

impl OperationHandle {
    /// Handle for an operation that already finished.
    pub fn completed(resource: ResourceId, operation: impl Into<String>) -> Self {
        Self {
            resource,
            operation: operation.into(),
            location: None,
        }
    }

    /// Handle for an operation that must be polled at `location`.
    pub fn pending(
        resource: ResourceId,
        operation: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            resource,
            operation: operation.into(),
            location: Some(location.into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.location.is_none()
    }
}

/// Status of a polled async operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed { message: String },
    Canceled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed { .. } => "Failed",
            Self::Canceled => "Canceled",
        })
    }
}

/// Remote compute API.
///
/// Mutating calls return an [`OperationHandle`]; callers wait on it with
/// [`crate::wait::wait_for_completion`] before issuing the next call.
pub trait Provider: Send + Sync {
    /// Current remote representation of `id`.
    ///
    /// Returns [`Error::NotFound`] when the resource does not exist.
    fn fetch_state(&self, id: &ResourceId) -> Result<ObservedState>;

    /// Send the changed attribute groups of `id` in one update.
    fn send_update(&self, id: &ResourceId, payload: &UpdatePayload) -> Result<OperationHandle>;

    /// Shut down the instance without releasing its compute.
    fn power_off(&self, id: &ResourceId) -> Result<OperationHandle>;

    /// Release the compute of a stopped instance.
    fn deallocate(&self, id: &ResourceId) -> Result<OperationHandle>;

    fn start(&self, id: &ResourceId) -> Result<OperationHandle>;

    /// Instance-view statuses, provisioning and power codes mixed.
    fn list_instance_statuses(&self, id: &ResourceId) -> Result<Vec<InstanceStatus>>;

    fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationStatus>;

    /// Convenience: parsed power state of `id`.
    fn power_state(&self, id: &ResourceId) -> Result<PowerState> {
        Ok(PowerState::from_statuses(&self.list_instance_statuses(id)?))
    }
}

/// Provider call recorded by [`MockProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    FetchState,
    SendUpdate,
    PowerOff,
    Deallocate,
    Start,
    ListInstanceStatuses,
    PollOperation,
}

impl CallKind {
    /// Whether the call changes remote state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::SendUpdate | Self::PowerOff | Self::Deallocate | Self::Start
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub resource: ResourceId,
}

/// Failure injected into the next call of a given kind.
#[derive(Debug, Clone)]
pub enum MockFailure {
    NotFound,
    Conflict(String),
    Transport { message: String, retryable: bool },
    /// The call is accepted but its async operation ends `Failed`
    AsyncFailed(String),
    /// The call is accepted but its async operation ends `Canceled`
    AsyncCanceled,
}

#[derive(Debug)]
struct MockOperation {
    remaining_polls: u32,
    outcome: OperationStatus,
}

#[derive(Debug, Default)]
struct MockState {
    resources: HashMap<String, ObservedState>,
    statuses: HashMap<String, Vec<InstanceStatus>>,
    calls: Vec<RecordedCall>,
    failures: HashMap<CallKind, VecDeque<MockFailure>>,
    operations: HashMap<String, MockOperation>,
    next_operation: u64,
}

/// In-memory, call-recording provider for tests.
///
/// Power operations rewrite the instance's power status and updates are
/// applied to the stored configuration, so a second pass observes the
/// result of the first.
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
    call_delay: Duration,
    pending_polls: u32,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource. Virtual machines start out running.
    pub fn with_resource(self, observed: ObservedState) -> Self {
        self.insert(observed);
        self
    }

    /// Sleep this long after recording each call.
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    /// Mutating calls report `InProgress` for this many polls before finishing.
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    pub fn insert(&self, observed: ObservedState) {
        let mut state = self.lock();
        let key = observed.id.lock_key();
        state
            .statuses
            .entry(key.clone())
            .or_insert_with(|| vec![InstanceStatus::new("PowerState/running")]);
        state.resources.insert(key, observed);
    }

    /// Replace the instance-view statuses of `id`.
    pub fn set_statuses(&self, id: &ResourceId, statuses: Vec<InstanceStatus>) {
        self.lock().statuses.insert(id.lock_key(), statuses);
    }

    pub fn set_power(&self, id: &ResourceId, power: PowerState) {
        self.set_statuses(id, vec![power_status(power)]);
    }

    /// Fail the next call of `kind` with `failure`.
    pub fn fail_next(&self, kind: CallKind, failure: MockFailure) {
        self.lock()
            .failures
            .entry(kind)
            .or_default()
            .push_back(failure);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_kinds(&self) -> Vec<CallKind> {
        self.lock().calls.iter().map(|c| c.kind).collect()
    }

    pub fn mutating_calls(&self) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.kind.is_mutating())
            .cloned()
            .collect()
    }

    pub fn stored(&self, id: &ResourceId) -> Option<ObservedState> {
        self.lock().resources.get(&id.lock_key()).cloned()
    }

    pub fn stored_power(&self, id: &ResourceId) -> PowerState {
        self.lock()
            .statuses
            .get(&id.lock_key())
            .map_or(PowerState::Unknown, |s| PowerState::from_statuses(s))
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call and pop any injected failure for it.
    fn record(&self, kind: CallKind, id: &ResourceId) -> Option<MockFailure> {
        let failure = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                kind,
                resource: id.clone(),
            });
            state.failures.get_mut(&kind).and_then(VecDeque::pop_front)
        };
        if !self.call_delay.is_zero() {
            thread::sleep(self.call_delay);
        }
        failure
    }

    /// Shared path for every mutating call.
    fn mutate(
        &self,
        kind: CallKind,
        id: &ResourceId,
        operation: String,
        apply: impl FnOnce(&mut MockState, &str) -> Result<()>,
    ) -> Result<OperationHandle> {
        let outcome = match self.record(kind, id) {
            None => OperationStatus::Succeeded,
            Some(MockFailure::AsyncFailed(message)) => OperationStatus::Failed { message },
            Some(MockFailure::AsyncCanceled) => OperationStatus::Canceled,
            Some(failure) => return Err(failure_error(failure, id)),
        };

        let mut state = self.lock();
        let key = id.lock_key();
        if !state.resources.contains_key(&key) {
            return Err(Error::NotFound {
                resource: id.to_string(),
            });
        }
        if outcome == OperationStatus::Succeeded {
            apply(&mut *state, &key)?;
        }
        if outcome == OperationStatus::Succeeded && self.pending_polls == 0 {
            return Ok(OperationHandle::completed(id.clone(), operation));
        }

        state.next_operation += 1;
        let location = format!("mock://operations/{}", state.next_operation);
        state.operations.insert(
            location.clone(),
            MockOperation {
                remaining_polls: self.pending_polls,
                outcome,
            },
        );
        Ok(OperationHandle::pending(id.clone(), operation, location))
    }

    fn set_power_locked(state: &mut MockState, key: &str, power: PowerState) {
        state.statuses.insert(key.to_string(), vec![power_status(power)]);
    }
}

fn power_status(power: PowerState) -> InstanceStatus {
    InstanceStatus::new(format!("PowerState/{power}"))
}

fn failure_error(failure: MockFailure, id: &ResourceId) -> Error {
    match failure {
        MockFailure::NotFound => Error::NotFound {
            resource: id.to_string(),
        },
        MockFailure::Conflict(message) => Error::Conflict { message },
        MockFailure::Transport { message, retryable } => Error::Transport { message, retryable },
        MockFailure::AsyncFailed(message) => Error::AsyncOperationFailed {
            operation: id.to_string(),
            status: "Failed".to_string(),
            message,
        },
        MockFailure::AsyncCanceled => Error::AsyncOperationFailed {
            operation: id.to_string(),
            status: "Canceled".to_string(),
            message: String::new(),
        },
    }
}

impl Provider for MockProvider {
    fn fetch_state(&self, id: &ResourceId) -> Result<ObservedState> {
        if let Some(failure) = self.record(CallKind::FetchState, id) {
            return Err(failure_error(failure, id));
        }
        self.stored(id).ok_or_else(|| Error::NotFound {
            resource: id.to_string(),
        })
    }

    fn send_update(&self, id: &ResourceId, payload: &UpdatePayload) -> Result<OperationHandle> {
        self.mutate(
            CallKind::SendUpdate,
            id,
            format!("update {}", id.name()),
            |state, key| {
                if let Some(observed) = state.resources.get_mut(key) {
                    observed.configuration = payload.apply_to(&observed.configuration)?;
                }
                Ok(())
            },
        )
    }

    fn power_off(&self, id: &ResourceId) -> Result<OperationHandle> {
        self.mutate(
            CallKind::PowerOff,
            id,
            format!("shut down {}", id.name()),
            |state, key| {
                Self::set_power_locked(state, key, PowerState::Stopped);
                Ok(())
            },
        )
    }

    fn deallocate(&self, id: &ResourceId) -> Result<OperationHandle> {
        self.mutate(
            CallKind::Deallocate,
            id,
            format!("deallocate {}", id.name()),
            |state, key| {
                Self::set_power_locked(state, key, PowerState::Deallocated);
                Ok(())
            },
        )
    }

    fn start(&self, id: &ResourceId) -> Result<OperationHandle> {
        self.mutate(
            CallKind::Start,
            id,
            format!("start {}", id.name()),
            |state, key| {
                Self::set_power_locked(state, key, PowerState::Running);
                Ok(())
            },
        )
    }

    fn list_instance_statuses(&self, id: &ResourceId) -> Result<Vec<InstanceStatus>> {
        if let Some(failure) = self.record(CallKind::ListInstanceStatuses, id) {
            return Err(failure_error(failure, id));
        }
        self.lock()
            .statuses
            .get(&id.lock_key())
            .cloned()
            .ok_or_else(|| Error::NotFound {
                resource: id.to_string(),
            })
    }

    fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        if let Some(failure) = self.record(CallKind::PollOperation, &handle.resource) {
            return Err(failure_error(failure, &handle.resource));
        }
        let Some(location) = handle.location.as_deref() else {
            return Ok(OperationStatus::Succeeded);
        };
        let mut state = self.lock();
        let operation = state
            .operations
            .get_mut(location)
            .ok_or_else(|| Error::NotFound {
                resource: location.to_string(),
            })?;
        if operation.remaining_polls > 0 {
            operation.remaining_polls -= 1;
            return Ok(OperationStatus::InProgress);
        }
        Ok(operation.outcome.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::AttributeGroup;
    use crate::types::{DeclaredConfiguration, ResourceKind};

    fn vm_state() -> ObservedState {
        let config = DeclaredConfiguration::new(ResourceKind::VirtualMachine, "web-0", "eu");
        ObservedState::new("/vms/web-0", config)
    }

    #[test]
    fn test_mock_fetch_missing_is_not_found() {
        let mock = MockProvider::new();
        let err = mock.fetch_state(&"/vms/nope".into()).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(mock.call_kinds(), vec![CallKind::FetchState]);
    }

    #[test]
    fn test_mock_lookup_is_case_insensitive() {
        let mock = MockProvider::new().with_resource(vm_state());
        assert!(mock.fetch_state(&"/VMs/Web-0".into()).is_ok());
    }

    #[test]
    fn test_mock_power_transitions() {
        let mock = MockProvider::new().with_resource(vm_state());
        let id = ResourceId::new("/vms/web-0");
        assert_eq!(mock.power_state(&id).unwrap(), PowerState::Running);

        assert!(mock.power_off(&id).unwrap().is_complete());
        assert_eq!(mock.stored_power(&id), PowerState::Stopped);
        mock.deallocate(&id).unwrap();
        assert_eq!(mock.stored_power(&id), PowerState::Deallocated);
        mock.start(&id).unwrap();
        assert_eq!(mock.stored_power(&id), PowerState::Running);
        assert_eq!(mock.mutating_calls().len(), 3);
    }

    #[test]
    fn test_mock_update_applies_payload() {
        let mock = MockProvider::new().with_resource(vm_state());
        let id = ResourceId::new("/vms/web-0");
        let mut next = vm_state().configuration;
        next.tags.insert("env".to_string(), "prod".to_string());
        let payload = UpdatePayload::from_groups(&next, [AttributeGroup::Tags]).unwrap();

        mock.send_update(&id, &payload).unwrap();
        assert_eq!(mock.stored(&id).unwrap().configuration, next);
    }

    #[test]
    fn test_mock_pending_operation_polls() {
        let mock = MockProvider::new()
            .with_resource(vm_state())
            .with_pending_polls(2);
        let handle = mock.start(&"/vms/web-0".into()).unwrap();
        assert!(!handle.is_complete());
        assert_eq!(mock.poll_operation(&handle).unwrap(), OperationStatus::InProgress);
        assert_eq!(mock.poll_operation(&handle).unwrap(), OperationStatus::InProgress);
        assert_eq!(mock.poll_operation(&handle).unwrap(), OperationStatus::Succeeded);
    }

    #[test]
    fn test_mock_injected_failures() {
        let mock = MockProvider::new().with_resource(vm_state());
        let id = ResourceId::new("/vms/web-0");
        mock.fail_next(
            CallKind::Deallocate,
            MockFailure::Conflict("disk is attached".to_string()),
        );
        let err = mock.deallocate(&id).unwrap_err();
        assert_eq!(err.to_string(), "disk is attached");
        assert_eq!(mock.stored_power(&id), PowerState::Running);

        mock.fail_next(CallKind::Start, MockFailure::AsyncFailed("boom".to_string()));
        let handle = mock.start(&id).unwrap();
        assert_eq!(
            mock.poll_operation(&handle).unwrap(),
            OperationStatus::Failed {
                message: "boom".to_string()
            }
        );

        // only the next call fails
        assert!(mock.deallocate(&id).is_ok());
    }

    #[test]
    fn test_call_kind_is_mutating() {
        assert!(CallKind::SendUpdate.is_mutating());
        assert!(CallKind::PowerOff.is_mutating());
        assert!(!CallKind::FetchState.is_mutating());
        assert!(!CallKind::PollOperation.is_mutating());
    }
}
