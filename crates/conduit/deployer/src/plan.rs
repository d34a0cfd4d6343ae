//! Reconciliation planning
//!
//! Decides between create, in-place update and replacement, and builds the
//! configuration submitted to the platform. Nothing here talks to the
//! platform, so every rule is testable on plain values.

use crate::config::DeployerConfig;
use crate::error::Result;
use crate::remote::{
    HealthCheckConfig, InstanceConfig, NetworkConfig, RegistryKind, RemoteService,
    ServiceConfig, SourceConfig,
};
use crate::tiers::ResourceTier;
use conduit_types::{EndpointSpec, HealthCheckProtocol};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Value of the `managed-by` owner tag
pub const MANAGED_BY: &str = "conduit";

/// Why a service has to be replaced instead of updated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementReason {
    /// Public/private ingress changed
    Visibility,
    /// A private network attachment was added or removed
    PrivateNetwork,
    /// The encryption key reference changed
    EncryptionKey,
}

impl fmt::Display for ReplacementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacementReason::Visibility => write!(f, "network visibility changed"),
            ReplacementReason::PrivateNetwork => write!(f, "private network attachment changed"),
            ReplacementReason::EncryptionKey => write!(f, "encryption key changed"),
        }
    }
}

/// What a provision call does to the primary resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Create,
    Update,
    Replace(ReplacementReason),
}

/// Properties the platform fixes per service identity. Everything else
/// (image, resources, environment, scaling, health check, traffic) is
/// applied in place.
pub fn replacement_reason(
    current: &ServiceConfig,
    spec: &EndpointSpec,
) -> Option<ReplacementReason> {
    if current.network.is_public != spec.network.is_public() {
        return Some(ReplacementReason::Visibility);
    }
    if current.network.private_network.is_some() != spec.network.private_network.is_some() {
        return Some(ReplacementReason::PrivateNetwork);
    }
    if current.encryption_key != spec.encryption_key {
        return Some(ReplacementReason::EncryptionKey);
    }
    None
}

/// Decide how to converge `existing` onto `spec`
pub fn decide(existing: Option<&RemoteService>, spec: &EndpointSpec) -> ReconcileAction {
    match existing {
        None => ReconcileAction::Create,
        Some(service) => match replacement_reason(&service.config, spec) {
            Some(reason) => ReconcileAction::Replace(reason),
            None => ReconcileAction::Update,
        },
    }
}

/// Registry an image is pulled from; unknown hosts count as public.
pub fn registry_kind(image: &str, config: &DeployerConfig) -> RegistryKind {
    let matches = |hosts: &[String]| hosts.iter().any(|h| image.contains(h.as_str()));
    if matches(&config.public_registry_hosts) {
        RegistryKind::Public
    } else if matches(&config.private_registry_hosts) {
        RegistryKind::Private
    } else {
        RegistryKind::Public
    }
}

/// Tags identifying the owner of a managed resource
pub fn owner_tags(spec: &EndpointSpec, config: &DeployerConfig) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::from([
        ("conduit-endpoint-id".to_string(), spec.id.to_string()),
        ("conduit-endpoint-name".to_string(), spec.name.clone()),
        ("conduit-deployer-name".to_string(), config.deployer_name.clone()),
        ("managed-by".to_string(), MANAGED_BY.to_string()),
    ]);
    if let Some(id) = &config.deployer_id {
        tags.insert("conduit-deployer-id".to_string(), id.clone());
    }
    tags
}

/// Values resolved before the service configuration can be built
#[derive(Debug, Clone)]
pub struct ResolvedInputs {
    pub service_name: String,
    pub tier: ResourceTier,
    pub scaling_policy_ref: String,
    /// Plaintext variables, including sensitive ones when the secret store
    /// was unavailable
    pub environment: BTreeMap<String, String>,
    /// Variable name -> per-key secret reference
    pub secret_refs: BTreeMap<String, String>,
}

/// Full configuration to submit for `spec`
pub fn service_config(
    spec: &EndpointSpec,
    inputs: ResolvedInputs,
    config: &DeployerConfig,
) -> Result<ServiceConfig> {
    let registry = registry_kind(&spec.image, config);
    if registry == RegistryKind::Private && config.access_role.is_none() {
        warn!(
            image = %spec.image,
            "Private registry without an access role; the platform's default role needs pull permissions"
        );
    }
    if !inputs.secret_refs.is_empty() && config.instance_role.is_none() {
        warn!("Secrets referenced without an instance role; the default role needs read access to them");
    }

    let health = &spec.health_check;
    let health_check = HealthCheckConfig {
        protocol: health.protocol,
        path: (health.protocol == HealthCheckProtocol::Http).then(|| health.path.clone()),
        interval_seconds: health.interval_seconds,
        timeout_seconds: health.timeout_seconds,
        healthy_threshold: health.healthy_threshold,
        unhealthy_threshold: health.unhealthy_threshold,
    };

    let mut tags = owner_tags(spec, config);
    tags.extend(spec.tags.iter().map(|(k, v)| (k.clone(), v.clone())));

    Ok(ServiceConfig {
        service_name: inputs.service_name,
        source: SourceConfig {
            image: spec.image.clone(),
            registry,
            port: spec.port,
            start_command: spec.entrypoint.start_command(),
            environment: inputs.environment,
            secret_refs: inputs.secret_refs,
            auto_deployments: false,
            access_role: config.access_role.clone(),
        },
        instance: InstanceConfig {
            cpu: inputs.tier.cpu_label,
            memory: inputs.tier.memory_label,
            instance_role: config.instance_role.clone(),
        },
        scaling_policy_ref: inputs.scaling_policy_ref,
        health_check,
        network: NetworkConfig {
            is_public: spec.network.is_public(),
            private_network: spec.network.private_network_config()?,
        },
        encryption_key: spec.encryption_key.clone(),
        observability_sink: spec.observability_sink.clone(),
        traffic: (!spec.traffic.is_default()).then(|| spec.traffic.routes().to_vec()),
        tags,
    })
}
