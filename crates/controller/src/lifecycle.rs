//! Lifecycle states and recorded faults

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a controller service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceState {
    /// Not running. Properties may be edited.
    Disabled,
    /// Activation has been requested or is in progress.
    Enabling,
    /// Activated and usable by referrers.
    Enabled,
    /// Deactivation has been requested or is in progress.
    Disabling,
}

impl ServiceState {
    /// `Enabling` or `Enabled`.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Enabling | Self::Enabled)
    }

    /// `Enabling` or `Disabling`.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Enabling | Self::Disabling)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disabled => "DISABLED",
            Self::Enabling => "ENABLING",
            Self::Enabled => "ENABLED",
            Self::Disabling => "DISABLING",
        };
        f.write_str(name)
    }
}

/// Scheduling state of a non-service component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduledState {
    /// Not scheduled to run.
    Stopped,
    /// Scheduled to run.
    Running,
    /// Administratively disabled.
    Disabled,
}

/// What kind of failure a [`Fault`] records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// The activation hook failed, or a dependency was not enabled in time.
    Activation,
    /// The deactivation hook failed. The service was disabled regardless.
    Deactivation,
    /// A transition was abandoned because an earlier step did not complete.
    Aborted,
    /// Enabling on creation was refused.
    Rejected,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The last failure seen by a node, kept until its next transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    kind: FaultKind,
    message: String,
    occurred_at: SystemTime,
}

impl Fault {
    /// Records a fault now.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            occurred_at: SystemTime::now(),
        }
    }

    /// Kind of failure.
    #[must_use]
    pub const fn kind(&self) -> FaultKind {
        self.kind
    }

    /// Failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// When the failure was recorded.
    #[must_use]
    pub const fn occurred_at(&self) -> SystemTime {
        self.occurred_at
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
