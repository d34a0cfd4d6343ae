//! Observed endpoint state
//!
//! Every reconciler call produces an [`EndpointOperationalState`]; the
//! metadata store persists it and hands it back on the next call through an
//! [`EndpointRef`].

use crate::spec::{HealthCheckPolicy, TrafficAllocation};
use crate::{EndpointId, EndpointSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status of an endpoint as seen on the platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    #[default]
    Unknown,
    Pending,
    Running,
    Error,
    Absent,
}

impl EndpointStatus {
    /// `Running` and `Absent` end a reconciliation successfully
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, EndpointStatus::Running | EndpointStatus::Absent)
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndpointStatus::Unknown => "unknown",
            EndpointStatus::Pending => "pending",
            EndpointStatus::Running => "running",
            EndpointStatus::Error => "error",
            EndpointStatus::Absent => "absent",
        };
        write!(f, "{}", s)
    }
}

/// Mirror of the remote resource, persisted between reconciler calls.
///
/// Known fields are typed. Keys written by newer versions land in `extra`
/// and are written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,

    /// Platform reference of the compute service (ARN-equivalent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,

    /// Region the service lives in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Raw platform status string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_instances: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling_policy_ref: Option<String>,

    /// Superseded scaling policies awaiting teardown
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stale_scaling_policies: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_network: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observability_sink: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckPolicy>,

    /// Plaintext environment only; secret values are never mirrored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic: Option<TrafficAllocation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Unknown keys, preserved for round-trip
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EndpointMetadata {
    /// Decode a persisted blob
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Encode for persistence
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Observed state of an endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredOperationalState")]
pub struct EndpointOperationalState {
    status: EndpointStatus,

    /// Set only while running
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,

    metadata: EndpointMetadata,
}

/// Persisted form, passed through [`EndpointOperationalState::new`] on load
#[derive(Deserialize)]
struct StoredOperationalState {
    status: EndpointStatus,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    metadata: EndpointMetadata,
}

impl From<StoredOperationalState> for EndpointOperationalState {
    fn from(stored: StoredOperationalState) -> Self {
        Self::new(stored.status, stored.url, stored.metadata)
    }
}

impl EndpointOperationalState {
    /// Build a state; the URL is dropped unless the status is `Running`.
    pub fn new(status: EndpointStatus, url: Option<String>, metadata: EndpointMetadata) -> Self {
        let url = match status {
            EndpointStatus::Running => url.filter(|u| !u.is_empty()),
            _ => None,
        };
        Self {
            status,
            url,
            metadata,
        }
    }

    /// Nothing exists remotely
    pub fn absent(metadata: EndpointMetadata) -> Self {
        Self::new(EndpointStatus::Absent, None, metadata)
    }

    pub fn status(&self) -> EndpointStatus {
        self.status
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn metadata(&self) -> &EndpointMetadata {
        &self.metadata
    }

    pub fn into_metadata(self) -> EndpointMetadata {
        self.metadata
    }
}

/// An endpoint as known to the metadata store between reconciler calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRef {
    pub id: EndpointId,
    pub name: String,

    /// Last persisted state
    #[serde(default)]
    pub state: EndpointOperationalState,
}

impl EndpointRef {
    pub fn new(id: EndpointId, name: impl Into<String>, state: EndpointOperationalState) -> Self {
        Self {
            id,
            name: name.into(),
            state,
        }
    }

    pub fn from_spec(spec: &EndpointSpec, state: EndpointOperationalState) -> Self {
        Self::new(spec.id, spec.name.clone(), state)
    }

    pub fn metadata(&self) -> &EndpointMetadata {
        self.state.metadata()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_only_kept_when_running() {
        let running = EndpointOperationalState::new(
            EndpointStatus::Running,
            Some("https://svc.example.com".into()),
            EndpointMetadata::default(),
        );
        assert_eq!(running.url(), Some("https://svc.example.com"));

        let pending = EndpointOperationalState::new(
            EndpointStatus::Pending,
            Some("https://svc.example.com".into()),
            EndpointMetadata::default(),
        );
        assert_eq!(pending.url(), None);

        let empty = EndpointOperationalState::new(
            EndpointStatus::Running,
            Some(String::new()),
            EndpointMetadata::default(),
        );
        assert_eq!(empty.url(), None);
    }

    #[test]
    fn test_metadata_preserves_unknown_keys() {
        let blob = json!({
            "service_name": "svc-a1b2c3d4",
            "region": "eu-west-1",
            "future_field": {"nested": [1, 2, 3]},
            "another": "value"
        });

        let metadata = EndpointMetadata::from_value(blob.clone()).unwrap();
        assert_eq!(metadata.service_name.as_deref(), Some("svc-a1b2c3d4"));
        assert_eq!(metadata.extra.len(), 2);

        let round_tripped = metadata.to_value().unwrap();
        assert_eq!(round_tripped, blob);
    }

    #[test]
    fn test_state_deserializes_with_missing_metadata() {
        let state: EndpointOperationalState =
            serde_json::from_value(json!({"status": "pending"})).unwrap();
        assert_eq!(state.status(), EndpointStatus::Pending);
        assert_eq!(state.metadata(), &EndpointMetadata::default());
    }

    #[test]
    fn test_loaded_state_drops_url_unless_running() {
        let stale: EndpointOperationalState = serde_json::from_value(json!({
            "status": "error",
            "url": "https://svc.example.com"
        }))
        .unwrap();
        assert_eq!(stale.url(), None);

        let running: EndpointOperationalState = serde_json::from_value(json!({
            "status": "running",
            "url": "https://svc.example.com"
        }))
        .unwrap();
        assert_eq!(running.url(), Some("https://svc.example.com"));
    }
}
