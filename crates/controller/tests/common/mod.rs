#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use weir_controller::{ProviderConfig, ServiceId, ServiceNode, ServiceProvider, ServiceProviderOptions};
use weir_controller_mock::MockServices;
use weir_scheduler_tokio::{SchedulerConfig, TokioScheduler};
use weir_state_memory::MemoryStateManagerProvider;

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub struct Harness {
    pub provider: ServiceProvider<TokioScheduler>,
    pub services: MockServices,
    pub states: MemoryStateManagerProvider,
}

impl Harness {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let services = MockServices::new();
        let states = MemoryStateManagerProvider::new();
        let scheduler = TokioScheduler::from_current(SchedulerConfig {
            name: "test".to_string(),
            max_concurrent_tasks: 4,
        })
        .unwrap();

        let provider = ServiceProvider::new(ServiceProviderOptions {
            scheduler,
            service_types: services.registry(),
            state_managers: Arc::new(states.clone()),
            validator: None,
            config: ProviderConfig::default(),
        });

        Self {
            provider,
            services,
            states,
        }
    }

    pub fn create(&self, service_type: &str, id: &str) -> Arc<ServiceNode> {
        self.provider
            .create_controller_service(service_type, id, false)
            .unwrap()
    }

    pub fn reference(&self, from: &Arc<ServiceNode>, property: &str, to: &Arc<ServiceNode>) {
        self.provider
            .set_property(from.id(), property, to.id().as_str())
            .unwrap();
    }

    pub fn activations(&self, id: &ServiceId) -> usize {
        self.services.instance(id).unwrap().activations()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
