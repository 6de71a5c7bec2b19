//! A controller service instance and its lifecycle state machine

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::warn;
use weir_scheduler::TaskHandle;

use crate::error::{ControllerResult, Error};
use crate::id::ServiceId;
use crate::lifecycle::{Fault, ServiceState};
use crate::property::{PropertyDescriptor, PropertyStore, PropertyValue, ReferenceChange};
use crate::service::Activatable;
use crate::validation::ValidationStatus;

/// A controller service registered with a provider.
///
/// State reads go through a watch channel and never take the node's lock.
/// Every state write happens under the lock, so two writers on the same node
/// cannot interleave.
pub struct ServiceNode {
    id: ServiceId,
    service_type: String,
    implementation: Arc<dyn Activatable>,
    descriptors: Vec<PropertyDescriptor>,
    inner: Mutex<NodeInner>,
    state: watch::Sender<ServiceState>,
}

#[derive(Default)]
struct NodeInner {
    properties: PropertyStore,
    validation: ValidationStatus,
    fault: Option<Fault>,
    transition: Option<TaskHandle>,
    removed: bool,
}

/// Why a node refused to start a transition.
#[derive(Debug)]
pub(crate) enum Refusal {
    /// The node was not in the expected state.
    Busy {
        state: ServiceState,
        in_flight: Option<TaskHandle>,
    },
    /// The node has been removed.
    Removed,
    /// The confirmation check failed. The node kept its state.
    Rejected(Error),
}

/// Holds a disabled node's lock while its properties are edited.
pub(crate) struct PropertyGuard<'a> {
    node: &'a ServiceNode,
    inner: MutexGuard<'a, NodeInner>,
}

impl ServiceNode {
    pub(crate) fn new(
        id: ServiceId,
        service_type: impl Into<String>,
        implementation: Arc<dyn Activatable>,
    ) -> Self {
        let descriptors = implementation.property_descriptors();
        let (state, _) = watch::channel(ServiceState::Disabled);

        Self {
            id,
            service_type: service_type.into(),
            implementation,
            descriptors,
            inner: Mutex::new(NodeInner::default()),
            state,
        }
    }

    /// Service id.
    #[must_use]
    pub const fn id(&self) -> &ServiceId {
        &self.id
    }

    /// Type name the service was created with.
    #[must_use]
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Properties the implementation declares.
    #[must_use]
    pub fn descriptors(&self) -> &[PropertyDescriptor] {
        &self.descriptors
    }

    /// Descriptor for `name`, if declared.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.descriptors.iter().find(|d| d.name() == name)
    }

    pub(crate) fn implementation(&self) -> &dyn Activatable {
        self.implementation.as_ref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Whether the service is enabling or enabled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    /// Waits until the service reaches `state`. Returns `false` on timeout.
    pub async fn await_state(&self, state: ServiceState, timeout: Duration) -> bool {
        let mut receiver = self.state.subscribe();
        let reached = tokio::time::timeout(timeout, receiver.wait_for(|current| *current == state));

        matches!(reached.await, Ok(Ok(_)))
    }

    /// Snapshot of the property values.
    #[must_use]
    pub fn properties(&self) -> PropertyStore {
        self.inner.lock().properties.clone()
    }

    /// Value of one property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        self.inner.lock().properties.get(name).cloned()
    }

    /// Services this one references, in property order.
    #[must_use]
    pub fn references(&self) -> Vec<ServiceId> {
        self.inner
            .lock()
            .properties
            .references()
            .iter()
            .cloned()
            .collect()
    }

    /// Result of the last validation.
    #[must_use]
    pub fn validation_status(&self) -> ValidationStatus {
        self.inner.lock().validation.clone()
    }

    /// Last recorded failure, cleared when the next transition starts.
    #[must_use]
    pub fn fault(&self) -> Option<Fault> {
        self.inner.lock().fault.clone()
    }

    /// Handle of the transition in progress, if any.
    #[must_use]
    pub fn in_flight(&self) -> Option<TaskHandle> {
        self.inner.lock().transition.clone()
    }

    pub(crate) fn lock_for_update(&self) -> ControllerResult<PropertyGuard<'_>> {
        let inner = self.inner.lock();
        if inner.removed {
            return Err(Error::NotFound(self.id.clone()));
        }

        let state = self.state();
        if state != ServiceState::Disabled {
            return Err(Error::invalid_state(
                &self.id,
                format!("properties cannot change while the service is {state}"),
            ));
        }

        Ok(PropertyGuard { node: self, inner })
    }

    pub(crate) fn revalidate<F>(&self, validate: F)
    where
        F: FnOnce(&Self, &PropertyStore) -> ValidationStatus,
    {
        let mut inner = self.inner.lock();
        inner.validation = validate(self, &inner.properties);
    }

    /// Moves the node from `from` to `to` and submits the transition's task.
    ///
    /// `confirm` sees the node's properties and runs under `serial` while the
    /// node is still in `from`. The new state is published under `serial` only
    /// if it passes, so a rejected transition is never observed. Holding one
    /// `serial` lock across every check-and-publish means two transitions that
    /// check each other's nodes cannot both pass on stale states. `submit` runs
    /// under the node's lock, so the returned handle is registered before any
    /// other transition can start.
    pub(crate) fn begin_transition<C, S>(
        &self,
        from: ServiceState,
        to: ServiceState,
        serial: &Mutex<()>,
        confirm: C,
        submit: S,
    ) -> Result<TaskHandle, Refusal>
    where
        C: FnOnce(&PropertyStore) -> ControllerResult<()>,
        S: FnOnce() -> TaskHandle,
    {
        let mut inner = self.inner.lock();
        if inner.removed {
            return Err(Refusal::Removed);
        }

        let state = self.state();
        if state != from {
            return Err(Refusal::Busy {
                state,
                in_flight: inner.transition.clone(),
            });
        }

        {
            let _serial = serial.lock();
            confirm(&inner.properties).map_err(Refusal::Rejected)?;
            self.state.send_replace(to);
        }

        inner.fault = None;
        let handle = submit();
        inner.transition = Some(handle.clone());

        Ok(handle)
    }

    /// Ends a transition started with [`begin_transition`](Self::begin_transition).
    pub(crate) fn complete_transition(
        &self,
        from: ServiceState,
        to: ServiceState,
        fault: Option<Fault>,
    ) -> bool {
        let mut inner = self.inner.lock();

        let state = self.state();
        if state != from {
            warn!(
                "Controller service {} expected to be {} but is {}, leaving it as is",
                self.id, from, state
            );
            return false;
        }

        inner.transition = None;
        if fault.is_some() {
            inner.fault = fault;
        }
        self.state.send_replace(to);

        true
    }

    pub(crate) fn record_fault(&self, fault: Fault) {
        self.inner.lock().fault = Some(fault);
    }

    pub(crate) fn mark_removed(&self) -> ControllerResult<()> {
        let mut inner = self.inner.lock();
        if inner.removed {
            return Err(Error::NotFound(self.id.clone()));
        }

        let state = self.state();
        if state != ServiceState::Disabled {
            return Err(Error::invalid_state(
                &self.id,
                format!("cannot remove a service that is {state}"),
            ));
        }
        inner.removed = true;

        Ok(())
    }
}

impl PropertyGuard<'_> {
    pub(crate) fn set(&mut self, name: &str, value: String) -> ReferenceChange {
        let descriptor = self.node.descriptor(name);
        self.inner.properties.set(descriptor, name, value)
    }

    pub(crate) fn remove(&mut self, name: &str) -> ReferenceChange {
        self.inner.properties.remove(name)
    }

    pub(crate) fn revalidate<F>(&mut self, validate: F)
    where
        F: FnOnce(&ServiceNode, &PropertyStore) -> ValidationStatus,
    {
        self.inner.validation = validate(self.node, &self.inner.properties);
    }
}

impl fmt::Debug for ServiceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceNode")
            .field("id", &self.id)
            .field("service_type", &self.service_type)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
