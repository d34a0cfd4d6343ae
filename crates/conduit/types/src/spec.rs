//! Endpoint specifications
//!
//! An EndpointSpec is the desired state of one pipeline endpoint. It is
//! produced by the metadata store and never mutated during reconciliation.

use crate::{EndpointId, SnapshotId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Desired state of a pipeline endpoint
#[derive(Clone, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Globally unique endpoint id
    pub id: EndpointId,

    /// Human-readable endpoint name
    pub name: String,

    /// Pipeline snapshot served by this endpoint
    pub snapshot_id: SnapshotId,

    /// Container image reference
    pub image: String,

    /// Serving process started inside the container
    pub entrypoint: ServingEntrypoint,

    /// Port the serving process listens on
    pub port: u16,

    /// Requested compute resources and scaling bounds
    #[serde(default)]
    pub resources: ResourceRequest,

    /// Plaintext environment variables
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Sensitive environment variables
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,

    /// Ingress visibility
    #[serde(default)]
    pub network: NetworkPolicy,

    /// Health check policy
    #[serde(default)]
    pub health_check: HealthCheckPolicy,

    /// Revision traffic split
    #[serde(default)]
    pub traffic: TrafficAllocation,

    /// Encryption key reference
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// Observability sink reference
    #[serde(default)]
    pub observability_sink: Option<String>,

    /// User-defined tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl EndpointSpec {
    /// Create a spec with platform defaults for everything but name and image
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: EndpointId::generate(),
            name: name.into(),
            snapshot_id: SnapshotId::generate(),
            image: image.into(),
            entrypoint: ServingEntrypoint::default(),
            port: 8080,
            resources: ResourceRequest::default(),
            environment: BTreeMap::new(),
            secrets: BTreeMap::new(),
            network: NetworkPolicy::default(),
            health_check: HealthCheckPolicy::default(),
            traffic: TrafficAllocation::default(),
            encryption_key: None,
            observability_sink: None,
            tags: BTreeMap::new(),
        }
    }

    /// Validate the spec
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        if self.name.trim().is_empty() {
            return Err(SpecValidationError::EmptyName);
        }

        if self.image.trim().is_empty() {
            return Err(SpecValidationError::EmptyImage);
        }

        if self.port == 0 {
            return Err(SpecValidationError::InvalidPort);
        }

        self.traffic.validate()?;
        self.health_check.validate()?;
        self.network.validate()?;

        Ok(())
    }
}

// Secret values stay out of logs.
impl fmt::Debug for EndpointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("snapshot_id", &self.snapshot_id)
            .field("image", &self.image)
            .field("entrypoint", &self.entrypoint)
            .field("port", &self.port)
            .field("resources", &self.resources)
            .field("environment", &self.environment)
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .field("network", &self.network)
            .field("health_check", &self.health_check)
            .field("traffic", &self.traffic)
            .field("encryption_key", &self.encryption_key)
            .field("observability_sink", &self.observability_sink)
            .field("tags", &self.tags)
            .finish()
    }
}

/// Command and arguments of the serving process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingEntrypoint {
    pub command: Vec<String>,
    pub args: Vec<String>,
}

impl ServingEntrypoint {
    pub fn new(command: Vec<String>, args: Vec<String>) -> Self {
        Self { command, args }
    }

    /// Single-line start command as the platform expects it
    pub fn start_command(&self) -> String {
        self.command
            .iter()
            .chain(self.args.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Requested resources; `None` means "no requirement"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// CPU cores
    pub cpu: Option<f64>,

    /// Memory in GB
    pub memory_gb: Option<f64>,

    pub min_replicas: Option<u32>,

    /// `Some(0)` means unlimited
    pub max_replicas: Option<u32>,

    /// Maximum concurrent requests per instance
    pub max_concurrency: Option<u32>,
}

/// Ingress visibility of an endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Network policy of an endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub visibility: Visibility,

    /// Private network attachment, as a JSON object
    #[serde(default)]
    pub private_network: Option<String>,
}

impl NetworkPolicy {
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Parsed private network attachment
    pub fn private_network_config(
        &self,
    ) -> Result<Option<serde_json::Map<String, serde_json::Value>>, SpecValidationError> {
        let Some(raw) = self.private_network.as_deref() else {
            return Ok(None);
        };
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => Ok(Some(map)),
            Ok(_) => Err(SpecValidationError::InvalidPrivateNetwork(
                "expected a JSON object".into(),
            )),
            Err(e) => Err(SpecValidationError::InvalidPrivateNetwork(e.to_string())),
        }
    }

    fn validate(&self) -> Result<(), SpecValidationError> {
        self.private_network_config().map(|_| ())
    }
}

/// Health check protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthCheckProtocol {
    Tcp,
    #[default]
    Http,
}

impl fmt::Display for HealthCheckProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthCheckProtocol::Tcp => write!(f, "TCP"),
            HealthCheckProtocol::Http => write!(f, "HTTP"),
        }
    }
}

/// Health check policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckPolicy {
    pub protocol: HealthCheckProtocol,

    /// Probe path, only sent for HTTP checks
    pub path: String,

    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            protocol: HealthCheckProtocol::Http,
            path: "/health".into(),
            interval_seconds: 10,
            timeout_seconds: 5,
            healthy_threshold: 1,
            unhealthy_threshold: 5,
        }
    }
}

impl HealthCheckPolicy {
    fn validate(&self) -> Result<(), SpecValidationError> {
        if self.interval_seconds == 0 || self.timeout_seconds == 0 {
            return Err(SpecValidationError::InvalidHealthCheck(
                "interval and timeout must be > 0".into(),
            ));
        }
        if self.healthy_threshold == 0 || self.unhealthy_threshold == 0 {
            return Err(SpecValidationError::InvalidHealthCheck(
                "thresholds must be > 0".into(),
            ));
        }
        if self.protocol == HealthCheckProtocol::Http && !self.path.starts_with('/') {
            return Err(SpecValidationError::InvalidHealthCheck(format!(
                "HTTP path must start with '/': {}",
                self.path
            )));
        }
        Ok(())
    }
}

/// Target of a traffic route
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TrafficTarget {
    /// Whatever revision is newest
    Latest,
    /// A named revision
    Revision(String),
    /// A tagged revision, written `tag:<name>`
    Tag(String),
}

impl From<String> for TrafficTarget {
    fn from(raw: String) -> Self {
        if raw == "LATEST" {
            TrafficTarget::Latest
        } else if let Some(tag) = raw.strip_prefix("tag:") {
            TrafficTarget::Tag(tag.to_string())
        } else {
            TrafficTarget::Revision(raw)
        }
    }
}

impl From<TrafficTarget> for String {
    fn from(target: TrafficTarget) -> Self {
        target.to_string()
    }
}

impl fmt::Display for TrafficTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficTarget::Latest => write!(f, "LATEST"),
            TrafficTarget::Revision(rev) => write!(f, "{}", rev),
            TrafficTarget::Tag(tag) => write!(f, "tag:{}", tag),
        }
    }
}

/// One entry of a traffic allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficRoute {
    pub target: TrafficTarget,
    pub percent: u32,
}

impl TrafficRoute {
    pub fn new(target: TrafficTarget, percent: u32) -> Self {
        Self { target, percent }
    }
}

/// Traffic split across revisions.
///
/// An empty allocation means 100% to the latest revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrafficAllocation(Vec<TrafficRoute>);

impl TrafficAllocation {
    pub fn new(routes: Vec<TrafficRoute>) -> Self {
        Self(routes)
    }

    /// Everything to the latest revision
    pub fn latest_only() -> Self {
        Self(vec![TrafficRoute::new(TrafficTarget::Latest, 100)])
    }

    pub fn routes(&self) -> &[TrafficRoute] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all shares, widened so that oversized shares cannot wrap
    pub fn total_percent(&self) -> u64 {
        self.0.iter().map(|r| u64::from(r.percent)).sum()
    }

    /// True when the allocation is equivalent to the platform default
    pub fn is_default(&self) -> bool {
        match self.0.as_slice() {
            [] => true,
            [only] => only.target == TrafficTarget::Latest && only.percent == 100,
            _ => false,
        }
    }

    fn validate(&self) -> Result<(), SpecValidationError> {
        if self.is_empty() {
            return Ok(());
        }
        let total = self.total_percent();
        if total != 100 {
            return Err(SpecValidationError::InvalidTrafficAllocation(total));
        }
        Ok(())
    }
}

/// Spec validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecValidationError {
    #[error("Endpoint name cannot be empty")]
    EmptyName,

    #[error("Image reference cannot be empty")]
    EmptyImage,

    #[error("Port must be > 0")]
    InvalidPort,

    #[error("Traffic allocation must sum to 100, got {0}")]
    InvalidTrafficAllocation(u64),

    #[error("Invalid health check: {0}")]
    InvalidHealthCheck(String),

    #[error("Invalid private network configuration: {0}")]
    InvalidPrivateNetwork(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec_is_valid() {
        let spec = EndpointSpec::new("weather-agent", "registry.example.com/weather:1");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_oversized_traffic_shares_do_not_wrap() {
        let mut spec = EndpointSpec::new("svc", "img");
        // wraps to exactly 100 in 32 bits
        spec.traffic = TrafficAllocation::new(vec![
            TrafficRoute::new(TrafficTarget::Latest, u32::MAX),
            TrafficRoute::new(TrafficTarget::Revision("r".into()), 101),
        ]);
        assert_eq!(
            spec.validate(),
            Err(SpecValidationError::InvalidTrafficAllocation(
                u64::from(u32::MAX) + 101
            ))
        );
    }

    #[test]
    fn test_traffic_must_sum_to_100() {
        let mut spec = EndpointSpec::new("svc", "img");
        spec.traffic = TrafficAllocation::new(vec![
            TrafficRoute::new(TrafficTarget::Latest, 60),
            TrafficRoute::new(TrafficTarget::Revision("rev-1".into()), 30),
        ]);
        assert_eq!(
            spec.validate(),
            Err(SpecValidationError::InvalidTrafficAllocation(90))
        );

        spec.traffic = TrafficAllocation::new(vec![
            TrafficRoute::new(TrafficTarget::Latest, 70),
            TrafficRoute::new(TrafficTarget::Tag("blue".into()), 30),
        ]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_traffic_default_detection() {
        assert!(TrafficAllocation::default().is_default());
        assert!(TrafficAllocation::latest_only().is_default());
        let split = TrafficAllocation::new(vec![
            TrafficRoute::new(TrafficTarget::Latest, 50),
            TrafficRoute::new(TrafficTarget::Tag("canary".into()), 50),
        ]);
        assert!(!split.is_default());
    }

    #[test]
    fn test_traffic_target_string_form() {
        assert_eq!(TrafficTarget::from("LATEST".to_string()), TrafficTarget::Latest);
        assert_eq!(
            TrafficTarget::from("tag:green".to_string()),
            TrafficTarget::Tag("green".into())
        );
        assert_eq!(
            TrafficTarget::from("rev-7".to_string()),
            TrafficTarget::Revision("rev-7".into())
        );

        let json = serde_json::to_string(&TrafficRoute::new(TrafficTarget::Tag("a".into()), 10))
            .unwrap();
        assert_eq!(json, r#"{"target":"tag:a","percent":10}"#);
    }

    #[test]
    fn test_private_network_must_be_object() {
        let mut spec = EndpointSpec::new("svc", "img");
        spec.network.private_network = Some("[1, 2]".into());
        assert!(matches!(
            spec.validate(),
            Err(SpecValidationError::InvalidPrivateNetwork(_))
        ));

        spec.network.private_network = Some(r#"{"VpcId": "vpc-1"}"#.into());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_debug_hides_secret_values() {
        let mut spec = EndpointSpec::new("svc", "img");
        spec.secrets.insert("API_KEY".into(), "hunter2".into());
        let rendered = format!("{:?}", spec);
        assert!(rendered.contains("API_KEY"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_start_command_joins_command_and_args() {
        let entrypoint = ServingEntrypoint::new(
            vec!["python".into(), "-m".into(), "serve".into()],
            vec!["--port".into(), "8080".into()],
        );
        assert_eq!(entrypoint.start_command(), "python -m serve --port 8080");
    }
}
