//! Mock controller services and components for testing.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod processor;

pub use processor::MockProcessor;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use weir_controller::{
    Activatable, ActivationContext, ActivationError, PropertyDescriptor, ServiceId,
    ServiceTypeRegistry,
};

/// A service with no properties that always activates.
pub const PASSTHROUGH: &str = "mock.Passthrough";

/// A service with two optional references to other services.
pub const DEPENDENT: &str = "mock.Dependent";

/// A service whose activation always fails.
pub const FAILING: &str = "mock.Failing";

/// A service that takes a while to activate.
pub const SLOW: &str = "mock.Slow";

/// A service with a required literal property.
pub const CONFIGURED: &str = "mock.Configured";

/// First reference property of [`DEPENDENT`] and [`FAILING`].
pub const OTHER_SERVICE: &str = "Other Service";

/// Second reference property of [`DEPENDENT`].
pub const OTHER_SERVICE_2: &str = "Other Service 2";

/// Required property of [`CONFIGURED`].
pub const ENDPOINT: &str = "Endpoint";

/// Activation delay of [`SLOW`].
pub const SLOW_ACTIVATION: Duration = Duration::from_millis(50);

/// Key under which activations are counted in the service's state.
pub const ACTIVATIONS_KEY: &str = "activations";

/// How a [`MockService`] reacts to activation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockBehavior {
    /// Activate immediately.
    Succeed,
    /// Refuse activation with the message.
    Fail(String),
    /// Sleep, then activate.
    Delay(Duration),
}

/// A service implementation that records how often it was driven.
#[derive(Debug)]
pub struct MockService {
    behavior: MockBehavior,
    descriptors: Vec<PropertyDescriptor>,
    activations: AtomicUsize,
    deactivations: AtomicUsize,
}

impl MockService {
    /// Creates a mock service.
    #[must_use]
    pub const fn new(behavior: MockBehavior, descriptors: Vec<PropertyDescriptor>) -> Self {
        Self {
            behavior,
            descriptors,
            activations: AtomicUsize::new(0),
            deactivations: AtomicUsize::new(0),
        }
    }

    /// Activation attempts so far.
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    /// Deactivations so far.
    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Activatable for MockService {
    fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        self.descriptors.clone()
    }

    async fn activate(&self, context: &ActivationContext) -> Result<(), ActivationError> {
        let attempt = self.activations.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Activating mock service {} (attempt {})", context.service_id(), attempt);

        match &self.behavior {
            MockBehavior::Succeed => {}
            MockBehavior::Fail(message) => return Err(ActivationError::new(message.clone())),
            MockBehavior::Delay(delay) => tokio::time::sleep(*delay).await,
        }

        context
            .state_manager()
            .set_state(HashMap::from([(
                ACTIVATIONS_KEY.to_string(),
                attempt.to_string(),
            )]))
            .await
            .map_err(|error| ActivationError::new(error.to_string()))
    }

    async fn deactivate(&self, context: &ActivationContext) -> Result<(), ActivationError> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        debug!("Deactivating mock service {}", context.service_id());
        Ok(())
    }
}

/// Builds a [`ServiceTypeRegistry`] of the mock types and keeps every
/// instance it creates so tests can inspect them.
#[derive(Clone, Debug, Default)]
pub struct MockServices {
    instances: Arc<DashMap<ServiceId, Arc<MockService>>>,
}

impl MockServices {
    /// Creates an empty set of instances.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every mock type.
    #[must_use]
    pub fn registry(&self) -> ServiceTypeRegistry {
        let references = || {
            vec![
                PropertyDescriptor::new(OTHER_SERVICE).identifies_service(true),
                PropertyDescriptor::new(OTHER_SERVICE_2).identifies_service(true),
            ]
        };

        ServiceTypeRegistry::new()
            .with(PASSTHROUGH, self.factory(MockBehavior::Succeed, Vec::new))
            .with(DEPENDENT, self.factory(MockBehavior::Succeed, references))
            .with(
                FAILING,
                self.factory(MockBehavior::Fail("mock activation failure".to_string()), || {
                    vec![PropertyDescriptor::new(OTHER_SERVICE).identifies_service(true)]
                }),
            )
            .with(SLOW, self.factory(MockBehavior::Delay(SLOW_ACTIVATION), references))
            .with(
                CONFIGURED,
                self.factory(MockBehavior::Succeed, || {
                    vec![PropertyDescriptor::new(ENDPOINT).required(true)]
                }),
            )
    }

    /// The instance created for `id`.
    #[must_use]
    pub fn instance(&self, id: &ServiceId) -> Option<Arc<MockService>> {
        self.instances.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn factory<D>(
        &self,
        behavior: MockBehavior,
        descriptors: D,
    ) -> impl Fn(&ServiceId) -> Arc<dyn Activatable> + Send + Sync + 'static
    where
        D: Fn() -> Vec<PropertyDescriptor> + Send + Sync + 'static,
    {
        let instances = Arc::clone(&self.instances);

        move |id: &ServiceId| -> Arc<dyn Activatable> {
            let service = Arc::new(MockService::new(behavior.clone(), descriptors()));
            instances.insert(id.clone(), Arc::clone(&service));
            service
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use weir_state::StateManagerProvider;
    use weir_state_memory::MemoryStateManagerProvider;

    #[tokio::test]
    async fn test_activation_records_state() {
        let services = MockServices::new();
        let id = ServiceId::from("svc");
        let implementation = services.registry().instantiate(PASSTHROUGH, &id).unwrap();
        let states = MemoryStateManagerProvider::new();
        let context = ActivationContext::new(
            id.clone(),
            Default::default(),
            states.state_manager(id.as_str()),
        );

        implementation.activate(&context).await.unwrap();

        let state = states.state_manager("svc").get_state().await.unwrap();
        assert_eq!(state.get(ACTIVATIONS_KEY), Some("1"));
        assert_eq!(services.instance(&id).unwrap().activations(), 1);
    }

    #[tokio::test]
    async fn test_failing_service() {
        let services = MockServices::new();
        let id = ServiceId::from("svc");
        let implementation = services.registry().instantiate(FAILING, &id).unwrap();
        let context = ActivationContext::new(
            id,
            Default::default(),
            MemoryStateManagerProvider::new().state_manager("svc"),
        );

        assert!(implementation.activate(&context).await.is_err());
    }
}
