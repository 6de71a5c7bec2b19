//! Validation of service configuration

use std::collections::HashSet;

use crate::id::ServiceId;
use crate::property::{PropertyDescriptor, PropertyStore};

/// Result of validating a service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ValidationStatus {
    /// The configuration is usable.
    #[default]
    Valid,
    /// The configuration is not usable, with reasons.
    Invalid(Vec<String>),
}

impl ValidationStatus {
    /// Whether the configuration is usable.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Reasons for being invalid.
    #[must_use]
    pub fn reasons(&self) -> &[String] {
        match self {
            Self::Valid => &[],
            Self::Invalid(reasons) => reasons,
        }
    }

    fn from_reasons(reasons: Vec<String>) -> Self {
        if reasons.is_empty() {
            Self::Valid
        } else {
            Self::Invalid(reasons)
        }
    }
}

/// Answers whether a service exists.
pub trait ServiceLookup {
    /// Whether `id` names an existing service.
    fn contains_service(&self, id: &ServiceId) -> bool;
}

impl ServiceLookup for HashSet<ServiceId> {
    fn contains_service(&self, id: &ServiceId) -> bool {
        self.contains(id)
    }
}

/// Everything a validator may look at.
pub struct ValidationContext<'a> {
    /// Service being validated
    pub service_id: &'a ServiceId,
    /// Properties the implementation declares
    pub descriptors: &'a [PropertyDescriptor],
    /// Current property values
    pub properties: &'a PropertyStore,
    /// Registry membership
    pub services: &'a dyn ServiceLookup,
}

/// Decides whether a service may be enabled.
pub trait Validator: Send + Sync + 'static {
    /// Validates the service described by `context`.
    fn validate(&self, context: &ValidationContext<'_>) -> ValidationStatus;
}

/// Checks required properties and that referenced services exist.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardValidator;

impl Validator for StandardValidator {
    fn validate(&self, context: &ValidationContext<'_>) -> ValidationStatus {
        let mut reasons = Vec::new();

        for descriptor in context.descriptors {
            if descriptor.is_required() && context.properties.get(descriptor.name()).is_none() {
                reasons.push(format!("'{}' is required", descriptor.name()));
            }
        }

        for (name, value) in context.properties.iter() {
            if let Some(reference) = value.service_id() {
                if !context.services.contains_service(reference) {
                    reasons.push(format!(
                        "'{name}' references unknown controller service {reference}"
                    ));
                }
            }
        }

        ValidationStatus::from_reasons(reasons)
    }
}
