//! Runtime error types

use thiserror::Error;

/// Errors of the request-scoped runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// `start` was called outside [`scope`](crate::context::scope)
    #[error("No request scope is open on this task")]
    NoRequestScope,

    #[error("Pipeline run failed: {0}")]
    Pipeline(String),

    #[error("Pipeline service is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
