//! Deployer error types

use crate::naming::InvalidNameError;
use crate::remote::RemoteError;
use conduit_types::SpecValidationError;
use std::fmt;
use thiserror::Error;

/// Deployer errors
#[derive(Debug, Error)]
pub enum DeployerError {
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Failed to deploy endpoint '{endpoint}': {source}")]
    Deployment {
        endpoint: String,
        #[source]
        source: RemoteError,
    },

    #[error("Failed to deprovision endpoint '{endpoint}': {source}")]
    Deprovision {
        endpoint: String,
        #[source]
        source: RemoteError,
    },

    #[error("Logs not found for endpoint '{endpoint}': {reason}")]
    LogsNotFound { endpoint: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid endpoint spec: {0}")]
    InvalidSpec(#[from] SpecValidationError),

    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),

    #[error("Failed to persist secret {name}: {source}")]
    SecretPersist {
        name: String,
        #[source]
        source: RemoteError,
    },

    #[error("Failed to ensure scaling policy {name}: {source}")]
    ScalingPolicy {
        name: String,
        #[source]
        source: RemoteError,
    },

    #[error(transparent)]
    SecondaryResource(#[from] SecondaryResourceError),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Remote error during {operation} of {resource}: {source}")]
    Remote {
        operation: &'static str,
        resource: String,
        #[source]
        source: RemoteError,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployerError {
    /// Wrap a remote failure with the operation and resource it hit
    pub fn remote(
        operation: &'static str,
        resource: impl Into<String>,
        source: RemoteError,
    ) -> Self {
        Self::Remote {
            operation,
            resource: resource.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DeployerError::EndpointNotFound(_))
    }
}

/// Result type for deployer operations
pub type Result<T> = std::result::Result<T, DeployerError>;

/// Kind of auxiliary resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryResourceKind {
    Secret,
    ScalingPolicy,
}

impl fmt::Display for SecondaryResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecondaryResourceKind::Secret => write!(f, "secret"),
            SecondaryResourceKind::ScalingPolicy => write!(f, "scaling policy"),
        }
    }
}

/// One failed cleanup of an auxiliary resource
#[derive(Debug, Error)]
#[error("{kind} {resource}: {source}")]
pub struct SecondaryFailure {
    pub kind: SecondaryResourceKind,
    pub resource: String,
    #[source]
    pub source: RemoteError,
}

/// Auxiliary cleanup failures collected after the primary resource is gone
#[derive(Debug, Error)]
#[error(
    "Cleanup of {} secondary resource(s) for endpoint '{endpoint}' failed: {}",
    .failures.len(),
    summarize(.failures)
)]
pub struct SecondaryResourceError {
    pub endpoint: String,
    pub failures: Vec<SecondaryFailure>,
}

fn summarize(failures: &[SecondaryFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secondary_error_lists_every_failure() {
        let err = SecondaryResourceError {
            endpoint: "weather".into(),
            failures: vec![
                SecondaryFailure {
                    kind: SecondaryResourceKind::Secret,
                    resource: "secret-1".into(),
                    source: RemoteError::Transport("connection reset".into()),
                },
                SecondaryFailure {
                    kind: SecondaryResourceKind::ScalingPolicy,
                    resource: "policy-1".into(),
                    source: RemoteError::api("Throttling", "slow down"),
                },
            ],
        };

        let rendered = err.to_string();
        assert!(rendered.contains("2 secondary resource(s)"));
        assert!(rendered.contains("secret secret-1"));
        assert!(rendered.contains("scaling policy policy-1"));
    }
}
