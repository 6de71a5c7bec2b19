//! Registry of controller services and the operations that drive them

mod disable;
mod enable;
mod references;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use weir_scheduler::TaskScheduler;
use weir_state::StateManagerProvider;

use crate::component::SchedulableComponent;
use crate::config::ProviderConfig;
use crate::error::{ControllerResult, Error};
use crate::id::{ComponentId, ComponentRef, ServiceId};
use crate::lifecycle::{Fault, FaultKind, ServiceState};
use crate::node::ServiceNode;
use crate::property::{PropertyStore, ReferenceChange};
use crate::service::{ActivationContext, ServiceTypeRegistry};
use crate::validation::{
    ServiceLookup, StandardValidator, ValidationContext, ValidationStatus, Validator,
};

use references::ReferenceIndex;

type NodeMap = IndexMap<ServiceId, Arc<ServiceNode>>;

impl ServiceLookup for NodeMap {
    fn contains_service(&self, id: &ServiceId) -> bool {
        self.contains_key(id)
    }
}

/// Collaborators and settings for a [`ServiceProvider`].
pub struct ServiceProviderOptions<S>
where
    S: TaskScheduler,
{
    /// Runs activation and deactivation off the caller's thread
    pub scheduler: S,

    /// Implementations available to `create_controller_service`
    pub service_types: ServiceTypeRegistry,

    /// Per-service persistent state
    pub state_managers: Arc<dyn StateManagerProvider>,

    /// Validator consulted before enabling. Defaults to [`StandardValidator`].
    pub validator: Option<Arc<dyn Validator>>,

    /// Provider configuration
    pub config: ProviderConfig,
}

/// Creates, configures, enables and disables controller services.
///
/// Cloning is cheap and every clone shares the same registry.
pub struct ServiceProvider<S>
where
    S: TaskScheduler,
{
    config: ProviderConfig,
    scheduler: S,
    service_types: Arc<ServiceTypeRegistry>,
    state_managers: Arc<dyn StateManagerProvider>,
    validator: Arc<dyn Validator>,
    nodes: Arc<RwLock<NodeMap>>,
    components: Arc<DashMap<ComponentId, Arc<dyn SchedulableComponent>>>,
    references: Arc<ReferenceIndex>,
    /// Serializes the check-and-publish step of every enable and disable.
    lifecycle: Arc<Mutex<()>>,
}

impl<S> Clone for ServiceProvider<S>
where
    S: TaskScheduler,
{
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            scheduler: self.scheduler.clone(),
            service_types: Arc::clone(&self.service_types),
            state_managers: Arc::clone(&self.state_managers),
            validator: Arc::clone(&self.validator),
            nodes: Arc::clone(&self.nodes),
            components: Arc::clone(&self.components),
            references: Arc::clone(&self.references),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

impl<S> ServiceProvider<S>
where
    S: TaskScheduler,
{
    /// Creates an empty provider.
    #[must_use]
    pub fn new(options: ServiceProviderOptions<S>) -> Self {
        let ServiceProviderOptions {
            scheduler,
            service_types,
            state_managers,
            validator,
            config,
        } = options;

        info!(
            "Creating controller service provider with {} service types",
            service_types.service_types().count()
        );

        Self {
            config,
            scheduler,
            service_types: Arc::new(service_types),
            state_managers,
            validator: validator.unwrap_or_else(|| Arc::new(StandardValidator)),
            nodes: Arc::new(RwLock::new(IndexMap::new())),
            components: Arc::new(DashMap::new()),
            references: Arc::new(ReferenceIndex::default()),
            lifecycle: Arc::new(Mutex::new(())),
        }
    }

    /// Provider configuration.
    pub const fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// The scheduler transitions run on.
    pub const fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Creates a disabled service of type `service_type`.
    ///
    /// With `enabled_on_create`, enabling is requested right away. If that
    /// request is refused the service is still created and the refusal is
    /// recorded as its fault.
    ///
    /// # Errors
    ///
    /// `UnknownServiceType` or `DuplicateId`.
    pub fn create_controller_service(
        &self,
        service_type: &str,
        id: impl Into<ServiceId>,
        enabled_on_create: bool,
    ) -> ControllerResult<Arc<ServiceNode>> {
        let id = id.into();
        let implementation = self
            .service_types
            .instantiate(service_type, &id)
            .ok_or_else(|| Error::UnknownServiceType(service_type.to_string()))?;
        let node = Arc::new(ServiceNode::new(id.clone(), service_type, implementation));

        {
            let mut nodes = self.nodes.write();
            if nodes.contains_key(&id) {
                return Err(Error::DuplicateId(id));
            }
            nodes.insert(id.clone(), Arc::clone(&node));
        }

        self.revalidate(&node);
        self.revalidate_referrers(&id);
        info!("Created controller service {} of type {}", id, service_type);

        if enabled_on_create {
            if let Err(error) = self.enable_controller_service(&id) {
                warn!("Controller service {} was not enabled on creation: {}", id, error);
                node.record_fault(Fault::new(FaultKind::Rejected, error.to_string()));
            }
        }

        Ok(node)
    }

    /// Removes a disabled, unreferenced service and drops its state.
    ///
    /// # Errors
    ///
    /// `NotFound`, `StillReferenced` while anything other than the service
    /// itself references it, or `InvalidState` unless disabled.
    pub fn remove_controller_service(&self, id: &ServiceId) -> ControllerResult<()> {
        let node = self.node(id)?;

        let referrers: Vec<ComponentRef> = self
            .references
            .referrers(id)
            .into_iter()
            .filter(|referrer| referrer.as_service() != Some(id))
            .collect();
        if !referrers.is_empty() {
            return Err(Error::StillReferenced {
                id: id.clone(),
                referrers,
            });
        }

        node.mark_removed()?;
        self.nodes.write().shift_remove(id);

        let referrer = ComponentRef::Service(id.clone());
        for reference in node.references() {
            self.references.remove(&reference, &referrer);
        }
        self.state_managers.on_component_removed(id.as_str());

        info!("Removed controller service {}", id);
        Ok(())
    }

    /// Sets a property on a disabled service.
    ///
    /// Reference edges and validation are updated before this returns.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidState` unless the service is disabled.
    pub fn set_property(
        &self,
        id: &ServiceId,
        name: &str,
        value: impl Into<String>,
    ) -> ControllerResult<()> {
        let node = self.node(id)?;
        let mut guard = node.lock_for_update()?;

        let change = guard.set(name, value.into());
        self.apply_reference_change(id, &change);
        guard.revalidate(|node, properties| self.validation_for(node, properties));

        debug!("Set property '{}' of controller service {}", name, id);
        Ok(())
    }

    /// Clears a property on a disabled service.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidState` unless the service is disabled.
    pub fn remove_property(&self, id: &ServiceId, name: &str) -> ControllerResult<()> {
        let node = self.node(id)?;
        let mut guard = node.lock_for_update()?;

        let change = guard.remove(name);
        self.apply_reference_change(id, &change);
        guard.revalidate(|node, properties| self.validation_for(node, properties));

        debug!("Removed property '{}' of controller service {}", name, id);
        Ok(())
    }

    /// Registers a component that may reference services.
    pub fn register_component(&self, component: Arc<dyn SchedulableComponent>) {
        let id = component.id().clone();
        debug!("Registered component {}", id);
        self.components.insert(id, component);
    }

    /// Unregisters a component and drops every reference it holds.
    ///
    /// # Errors
    ///
    /// `ComponentNotFound` if it was never registered.
    pub fn unregister_component(&self, id: &ComponentId) -> ControllerResult<()> {
        self.components
            .remove(id)
            .ok_or_else(|| Error::ComponentNotFound(id.clone()))?;
        self.references
            .remove_everywhere(&ComponentRef::Component(id.clone()));

        debug!("Unregistered component {}", id);
        Ok(())
    }

    /// A registered component.
    pub fn component(&self, id: &ComponentId) -> Option<Arc<dyn SchedulableComponent>> {
        self.components.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Records that a registered component references `target`.
    ///
    /// Returns `false` if the reference was already recorded.
    ///
    /// # Errors
    ///
    /// `NotFound` or `ComponentNotFound`.
    pub fn add_reference(&self, target: &ServiceId, component: &ComponentId) -> ControllerResult<bool> {
        self.node(target)?;
        if !self.components.contains_key(component) {
            return Err(Error::ComponentNotFound(component.clone()));
        }

        Ok(self
            .references
            .add(target, ComponentRef::Component(component.clone())))
    }

    /// Drops a component's reference to `target`.
    pub fn remove_reference(&self, target: &ServiceId, component: &ComponentId) -> bool {
        self.references
            .remove(target, &ComponentRef::Component(component.clone()))
    }

    /// Everything that directly references `id`.
    pub fn referencing_components(&self, id: &ServiceId) -> Vec<ComponentRef> {
        self.references.referrers(id)
    }

    /// Services that reference `id` directly or through other services,
    /// breadth first, excluding `id` itself.
    pub fn find_recursive_references(&self, id: &ServiceId) -> Vec<Arc<ServiceNode>> {
        let mut found = NodeMap::new();
        let mut queue = VecDeque::from([id.clone()]);

        while let Some(current) = queue.pop_front() {
            for referrer in self.references.service_referrers(&current) {
                if &referrer == id || found.contains_key(&referrer) {
                    continue;
                }
                if let Some(node) = self.get(&referrer) {
                    found.insert(referrer.clone(), node);
                    queue.push_back(referrer);
                }
            }
        }

        found.into_values().collect()
    }

    /// The service `id`, if it exists.
    pub fn get(&self, id: &ServiceId) -> Option<Arc<ServiceNode>> {
        self.nodes.read().get(id).cloned()
    }

    /// Every service, in creation order.
    pub fn services(&self) -> Vec<Arc<ServiceNode>> {
        self.nodes.read().values().cloned().collect()
    }

    /// Current state of `id`.
    pub fn state(&self, id: &ServiceId) -> Option<ServiceState> {
        self.get(id).map(|node| node.state())
    }

    /// Whether `id` exists and is enabled.
    pub fn is_enabled(&self, id: &ServiceId) -> bool {
        self.state(id) == Some(ServiceState::Enabled)
    }

    /// Whether `id` exists and is enabling or enabled.
    pub fn is_active(&self, id: &ServiceId) -> bool {
        self.state(id).is_some_and(ServiceState::is_active)
    }

    /// Last recorded failure of `id`.
    pub fn fault(&self, id: &ServiceId) -> Option<Fault> {
        self.get(id).and_then(|node| node.fault())
    }

    /// Result of the last validation of `id`.
    pub fn validation_status(&self, id: &ServiceId) -> Option<ValidationStatus> {
        self.get(id).map(|node| node.validation_status())
    }

    /// Waits up to `timeout` for `id` to reach `state`.
    ///
    /// Returns `false` on timeout or if the service does not exist.
    pub async fn await_state(
        &self,
        id: &ServiceId,
        state: ServiceState,
        timeout: Duration,
    ) -> bool {
        match self.get(id) {
            Some(node) => node.await_state(state, timeout).await,
            None => false,
        }
    }

    /// [`await_state`](Self::await_state) with the configured timeout.
    pub async fn wait_for_state(&self, id: &ServiceId, state: ServiceState) -> bool {
        self.await_state(id, state, self.config.await_timeout).await
    }

    fn node(&self, id: &ServiceId) -> ControllerResult<Arc<ServiceNode>> {
        self.get(id).ok_or_else(|| Error::NotFound(id.clone()))
    }

    fn apply_reference_change(&self, id: &ServiceId, change: &ReferenceChange) {
        let referrer = ComponentRef::Service(id.clone());
        for added in &change.added {
            self.references.add(added, referrer.clone());
        }
        for removed in &change.removed {
            self.references.remove(removed, &referrer);
        }
    }

    fn validation_for(&self, node: &ServiceNode, properties: &PropertyStore) -> ValidationStatus {
        let nodes = self.nodes.read();

        self.validator.validate(&ValidationContext {
            service_id: node.id(),
            descriptors: node.descriptors(),
            properties,
            services: &*nodes,
        })
    }

    fn revalidate(&self, node: &ServiceNode) {
        node.revalidate(|node, properties| self.validation_for(node, properties));
    }

    fn revalidate_referrers(&self, id: &ServiceId) {
        for referrer in self.references.service_referrers(id) {
            if let Some(node) = self.get(&referrer) {
                self.revalidate(&node);
            }
        }
    }

    fn activation_context(&self, node: &ServiceNode) -> ActivationContext {
        let properties = node
            .properties()
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();

        ActivationContext::new(
            node.id().clone(),
            properties,
            self.state_managers.state_manager(node.id().as_str()),
        )
    }

    /// `roots` followed by everything they transitively reference.
    fn dependency_subgraph<I>(&self, roots: I) -> NodeMap
    where
        I: IntoIterator<Item = Arc<ServiceNode>>,
    {
        let mut subgraph = NodeMap::new();
        let mut queue = VecDeque::new();

        for root in roots {
            if !subgraph.contains_key(root.id()) {
                subgraph.insert(root.id().clone(), Arc::clone(&root));
                queue.push_back(root);
            }
        }

        while let Some(node) = queue.pop_front() {
            for reference in node.references() {
                if subgraph.contains_key(&reference) {
                    continue;
                }
                if let Some(dependency) = self.get(&reference) {
                    subgraph.insert(reference, Arc::clone(&dependency));
                    queue.push_back(dependency);
                }
            }
        }

        subgraph
    }
}
