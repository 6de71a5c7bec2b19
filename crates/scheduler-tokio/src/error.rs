use thiserror::Error;

/// Errors that can occur when constructing a scheduler.
#[derive(Debug, Error)]
pub enum Error {
    /// Not called from within a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
