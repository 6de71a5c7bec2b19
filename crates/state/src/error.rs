use thiserror::Error;

/// Errors returned by state managers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// The owning component was removed and its state dropped.
    #[error("state of component {0} is no longer available")]
    Removed(String),

    /// The backing store failed.
    #[error("state storage error: {0}")]
    Storage(String),
}
