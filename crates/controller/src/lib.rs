//! Lifecycle management for shared controller services.
//!
//! This crate provides:
//! - Service nodes with ordered properties and the reference set derived from them
//! - The enabling-order resolver, which terminates on reference cycles
//! - [`ServiceProvider`], which creates services and drives their enable and
//!   disable transitions through an injected task scheduler
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod component;
pub mod config;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod node;
pub mod ordering;
pub mod property;
pub mod provider;
pub mod service;
pub mod validation;

pub use component::SchedulableComponent;
pub use config::ProviderConfig;
pub use error::{ControllerResult, Error};
pub use id::{ComponentId, ComponentRef, ServiceId};
pub use lifecycle::{Fault, FaultKind, ScheduledState, ServiceState};
pub use node::ServiceNode;
pub use ordering::{DependencyNode, determine_enabling_order, enabling_branch};
pub use property::{PropertyDescriptor, PropertyStore, PropertyValue, ReferenceChange};
pub use provider::{ServiceProvider, ServiceProviderOptions};
pub use service::{
    Activatable, ActivationContext, ActivationError, ServiceFactory, ServiceTypeRegistry,
};
pub use validation::{
    ServiceLookup, StandardValidator, ValidationContext, ValidationStatus, Validator,
};
