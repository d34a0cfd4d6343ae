//! Remote platform interfaces
//!
//! The platform is reached through three logical services: Compute
//! (services and scaling policies), Secrets and Logs. Every failure is a
//! typed [`RemoteError`] so "not found" can be told apart from everything
//! else.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_types::{HealthCheckProtocol, TrafficRoute};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Remote API failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }
}

/// Result type for remote calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Platform status of a compute service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum RemoteServiceStatus {
    CreateFailed,
    DeleteFailed,
    Running,
    Deleted,
    Paused,
    OperationInProgress,
    Other(String),
}

impl From<String> for RemoteServiceStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "CREATE_FAILED" => Self::CreateFailed,
            "DELETE_FAILED" => Self::DeleteFailed,
            "RUNNING" => Self::Running,
            "DELETED" => Self::Deleted,
            "PAUSED" => Self::Paused,
            "OPERATION_IN_PROGRESS" => Self::OperationInProgress,
            _ => Self::Other(raw),
        }
    }
}

impl From<RemoteServiceStatus> for String {
    fn from(status: RemoteServiceStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for RemoteServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateFailed => write!(f, "CREATE_FAILED"),
            Self::DeleteFailed => write!(f, "DELETE_FAILED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Deleted => write!(f, "DELETED"),
            Self::Paused => write!(f, "PAUSED"),
            Self::OperationInProgress => write!(f, "OPERATION_IN_PROGRESS"),
            Self::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// Where the image is pulled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    Public,
    Private,
}

/// Image and process configuration of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub image: String,
    pub registry: RegistryKind,
    pub port: u16,
    pub start_command: String,
    pub environment: BTreeMap<String, String>,
    /// Variable name -> per-key secret reference
    pub secret_refs: BTreeMap<String, String>,
    pub auto_deployments: bool,
    pub access_role: Option<String>,
}

/// Instance size of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub cpu: String,
    pub memory: String,
    pub instance_role: Option<String>,
}

/// Health check as submitted to the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub protocol: HealthCheckProtocol,
    /// Only present for HTTP checks
    pub path: Option<String>,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

/// Ingress configuration of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub is_public: bool,
    pub private_network: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Full desired configuration of a compute service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub source: SourceConfig,
    pub instance: InstanceConfig,
    pub scaling_policy_ref: String,
    pub health_check: HealthCheckConfig,
    pub network: NetworkConfig,
    pub encryption_key: Option<String>,
    pub observability_sink: Option<String>,
    /// `None` keeps the platform default of 100% to the latest revision
    pub traffic: Option<Vec<TrafficRoute>>,
    pub tags: BTreeMap<String, String>,
}

/// Scaling values a service currently runs with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingSummary {
    pub policy_ref: String,
    pub min_size: u32,
    pub max_size: u32,
    pub max_concurrency: u32,
}

/// A compute service as described by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteService {
    pub service_ref: String,
    pub service_id: String,
    pub service_url: Option<String>,
    pub status: RemoteServiceStatus,
    pub config: ServiceConfig,
    pub scaling: Option<ScalingSummary>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Request to create an autoscaling policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingPolicyRequest {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub max_concurrency: u32,
    pub tags: BTreeMap<String, String>,
}

/// An autoscaling policy as described by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub policy_ref: String,
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub max_concurrency: u32,
}

/// A stored secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretHandle {
    pub secret_id: String,
    pub name: String,
}

/// A log stream of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStream {
    pub name: String,
    pub last_event_ms: i64,
}

/// A single log event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp_ms: i64,
    pub message: String,
}

/// Compute service: services and their autoscaling policies
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn create_service(&self, config: &ServiceConfig) -> RemoteResult<RemoteService>;

    async fn update_service(
        &self,
        service_ref: &str,
        config: &ServiceConfig,
    ) -> RemoteResult<RemoteService>;

    /// Add or overwrite tags on a service
    async fn tag_service(
        &self,
        service_ref: &str,
        tags: &BTreeMap<String, String>,
    ) -> RemoteResult<()>;

    async fn describe_service(&self, service_ref: &str) -> RemoteResult<RemoteService>;

    /// Start an asynchronous delete
    async fn delete_service(&self, service_ref: &str) -> RemoteResult<RemoteService>;

    async fn create_scaling_policy(
        &self,
        request: &ScalingPolicyRequest,
    ) -> RemoteResult<ScalingPolicy>;

    async fn describe_scaling_policy(&self, policy_ref: &str) -> RemoteResult<ScalingPolicy>;

    async fn delete_scaling_policy(&self, policy_ref: &str) -> RemoteResult<()>;
}

/// Secrets service: opaque string blobs
#[async_trait]
pub trait SecretsApi: Send + Sync {
    async fn create_secret(
        &self,
        name: &str,
        value: &str,
        description: &str,
        tags: &BTreeMap<String, String>,
    ) -> RemoteResult<SecretHandle>;

    /// Replace the value of an existing secret, addressed by name or id
    async fn update_secret(&self, secret: &str, value: &str) -> RemoteResult<SecretHandle>;

    async fn describe_secret(&self, secret: &str) -> RemoteResult<SecretHandle>;

    /// Delete immediately, without a recovery window
    async fn delete_secret(&self, secret: &str) -> RemoteResult<()>;
}

/// Logs service
#[async_trait]
pub trait LogsApi: Send + Sync {
    /// Streams of a group, most recently written first
    async fn list_streams(&self, group: &str) -> RemoteResult<Vec<LogStream>>;

    async fn get_events(&self, group: &str, stream: &str) -> RemoteResult<Vec<LogEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!(
            RemoteServiceStatus::from("running".to_string()),
            RemoteServiceStatus::Running
        );
        assert_eq!(
            RemoteServiceStatus::from("OPERATION_IN_PROGRESS".to_string()),
            RemoteServiceStatus::OperationInProgress
        );
        assert_eq!(
            RemoteServiceStatus::from("MIGRATING".to_string()),
            RemoteServiceStatus::Other("MIGRATING".into())
        );
    }

    #[test]
    fn test_not_found_detection() {
        assert!(RemoteError::not_found("service", "svc-1").is_not_found());
        assert!(!RemoteError::InvalidRequest("bad".into()).is_not_found());
        assert!(!RemoteError::api("Throttling", "slow down").is_not_found());
    }
}
