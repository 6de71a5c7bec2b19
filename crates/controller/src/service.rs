//! Service implementations and the registry that instantiates them

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;
use weir_state::StateManager;

use crate::id::ServiceId;
use crate::property::{PropertyDescriptor, PropertyValue};

/// Error raised by an activation or deactivation hook.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ActivationError(String);

impl ActivationError {
    /// Creates an activation error.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What an implementation sees when it is activated or deactivated.
#[derive(Clone)]
pub struct ActivationContext {
    service_id: ServiceId,
    properties: IndexMap<String, PropertyValue>,
    state_manager: Arc<dyn StateManager>,
}

impl ActivationContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        service_id: ServiceId,
        properties: IndexMap<String, PropertyValue>,
        state_manager: Arc<dyn StateManager>,
    ) -> Self {
        Self {
            service_id,
            properties,
            state_manager,
        }
    }

    /// The service being activated.
    #[must_use]
    pub const fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    /// Property value by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// All property values, in order.
    #[must_use]
    pub const fn properties(&self) -> &IndexMap<String, PropertyValue> {
        &self.properties
    }

    /// Persistent state of the service.
    #[must_use]
    pub fn state_manager(&self) -> &dyn StateManager {
        self.state_manager.as_ref()
    }
}

impl fmt::Debug for ActivationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationContext")
            .field("service_id", &self.service_id)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// User code behind a controller service.
#[async_trait]
pub trait Activatable: Send + Sync + 'static {
    /// Properties this implementation understands.
    fn property_descriptors(&self) -> Vec<PropertyDescriptor>;

    /// Brings the service up. Runs on a scheduler worker.
    async fn activate(&self, context: &ActivationContext) -> Result<(), ActivationError>;

    /// Tears the service down. Runs on a scheduler worker.
    async fn deactivate(&self, _context: &ActivationContext) -> Result<(), ActivationError> {
        Ok(())
    }
}

/// Builds an implementation for a new service.
pub type ServiceFactory = Arc<dyn Fn(&ServiceId) -> Arc<dyn Activatable> + Send + Sync>;

/// Maps service type names to factories.
#[derive(Clone, Default)]
pub struct ServiceTypeRegistry {
    factories: HashMap<String, ServiceFactory>,
}

impl ServiceTypeRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one for the type.
    pub fn register<F>(&mut self, service_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ServiceId) -> Arc<dyn Activatable> + Send + Sync + 'static,
    {
        self.factories.insert(service_type.into(), Arc::new(factory));
        self
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with<F>(mut self, service_type: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ServiceId) -> Arc<dyn Activatable> + Send + Sync + 'static,
    {
        self.register(service_type, factory);
        self
    }

    /// Instantiates `service_type` for the service `id`.
    #[must_use]
    pub fn instantiate(&self, service_type: &str, id: &ServiceId) -> Option<Arc<dyn Activatable>> {
        self.factories.get(service_type).map(|factory| factory(id))
    }

    /// Whether `service_type` is registered.
    #[must_use]
    pub fn contains(&self, service_type: &str) -> bool {
        self.factories.contains_key(service_type)
    }

    /// Registered type names.
    pub fn service_types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for ServiceTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}
