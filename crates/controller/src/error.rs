//! Error types for controller service operations

use thiserror::Error;

use crate::id::{ComponentId, ComponentRef, ServiceId};

/// Result type for controller service operations
pub type ControllerResult<T> = Result<T, Error>;

/// Errors returned synchronously by [`ServiceProvider`](crate::ServiceProvider).
///
/// Failures of an activation hook are not reported here. They happen on a
/// worker and are recorded as a [`Fault`](crate::Fault) on the node.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// No service with this id
    #[error("controller service {0} does not exist")]
    NotFound(ServiceId),

    /// A service with this id already exists
    #[error("controller service {0} already exists")]
    DuplicateId(ServiceId),

    /// No implementation registered under this type name
    #[error("no implementation registered for service type {0}")]
    UnknownServiceType(String),

    /// The service is not in a state that permits the operation
    #[error("controller service {id}: {reason}")]
    InvalidState {
        /// Service the operation targeted
        id: ServiceId,
        /// What was wrong
        reason: String,
    },

    /// Referrers are still active
    #[error("controller service {id} is referenced by active components: {}", join(.referrers))]
    ActiveReferrer {
        /// Service the operation targeted
        id: ServiceId,
        /// The active referrers
        referrers: Vec<ComponentRef>,
    },

    /// The service cannot be removed while referenced
    #[error("controller service {id} is still referenced by {}", join(.referrers))]
    StillReferenced {
        /// Service the operation targeted
        id: ServiceId,
        /// Remaining referrers
        referrers: Vec<ComponentRef>,
    },

    /// A property names a service that does not exist
    #[error("property '{property}' of controller service {id} references unknown service {reference}")]
    UnresolvedReference {
        /// Service holding the property
        id: ServiceId,
        /// Property name
        property: String,
        /// The missing service
        reference: ServiceId,
    },

    /// The service failed validation
    #[error("controller service {id} is invalid: {}", .reasons.join("; "))]
    Invalid {
        /// Service that failed validation
        id: ServiceId,
        /// Validation messages
        reasons: Vec<String>,
    },

    /// No component registered with this id
    #[error("component {0} is not registered")]
    ComponentNotFound(ComponentId),
}

impl Error {
    pub(crate) fn invalid_state(id: &ServiceId, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            id: id.clone(),
            reason: reason.into(),
        }
    }
}

fn join(referrers: &[ComponentRef]) -> String {
    referrers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
