//! Remote service -> operational state

use crate::remote::{RemoteService, RemoteServiceStatus};
use conduit_types::{
    EndpointMetadata, EndpointOperationalState, EndpointStatus, HealthCheckPolicy,
    TrafficAllocation,
};

/// Status table from platform status to endpoint status
pub fn map_status(status: &RemoteServiceStatus) -> EndpointStatus {
    match status {
        RemoteServiceStatus::CreateFailed | RemoteServiceStatus::DeleteFailed => {
            EndpointStatus::Error
        }
        RemoteServiceStatus::OperationInProgress => EndpointStatus::Pending,
        RemoteServiceStatus::Running => EndpointStatus::Running,
        RemoteServiceStatus::Deleted => EndpointStatus::Absent,
        RemoteServiceStatus::Paused => EndpointStatus::Pending,
        RemoteServiceStatus::Other(_) => EndpointStatus::Unknown,
    }
}

/// Prefix `https://` unless the URL already carries it
pub fn https_url(raw: &str) -> String {
    if raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    }
}

/// Metadata mirroring `service`. Secret values never appear here: only
/// plaintext variables and the secret reference.
///
/// The stale-policy ledger and unknown keys carry over from `previous`.
pub fn service_metadata(
    service: &RemoteService,
    region: &str,
    secret_ref: Option<&str>,
    previous: Option<&EndpointMetadata>,
) -> EndpointMetadata {
    let config = &service.config;
    let health = &config.health_check;
    let scaling = service.scaling.as_ref();

    let (stale_scaling_policies, extra) = previous
        .map(|m| (m.stale_scaling_policies.clone(), m.extra.clone()))
        .unwrap_or_default();

    EndpointMetadata {
        service_name: Some(config.service_name.clone()),
        service_id: Some(service.service_id.clone()),
        service_ref: Some(service.service_ref.clone()),
        service_url: service.service_url.clone(),
        region: Some(region.to_string()),
        remote_status: Some(service.status.to_string()),
        cpu: Some(config.instance.cpu.clone()),
        memory: Some(config.instance.memory.clone()),
        port: Some(config.source.port),
        min_instances: scaling.map(|s| s.min_size),
        max_instances: scaling.map(|s| s.max_size),
        max_concurrency: scaling.map(|s| s.max_concurrency),
        scaling_policy_ref: Some(config.scaling_policy_ref.clone()),
        stale_scaling_policies,
        secret_ref: secret_ref.map(String::from),
        is_public: Some(config.network.is_public),
        private_network: config
            .network
            .private_network
            .clone()
            .map(serde_json::Value::Object),
        encryption_key: config.encryption_key.clone(),
        observability_sink: config.observability_sink.clone(),
        health_check: Some(HealthCheckPolicy {
            protocol: health.protocol,
            path: health.path.clone().unwrap_or_default(),
            interval_seconds: health.interval_seconds,
            timeout_seconds: health.timeout_seconds,
            healthy_threshold: health.healthy_threshold,
            unhealthy_threshold: health.unhealthy_threshold,
        }),
        environment: Some(config.source.environment.clone()),
        traffic: Some(
            config
                .traffic
                .clone()
                .map(TrafficAllocation::new)
                .unwrap_or_else(TrafficAllocation::latest_only),
        ),
        tags: Some(config.tags.clone()),
        created_at: service.created_at,
        updated_at: service.updated_at,
        deleted_at: service.deleted_at,
        extra,
    }
}

/// Operational state of `service`
pub fn service_state(
    service: &RemoteService,
    region: &str,
    secret_ref: Option<&str>,
    previous: Option<&EndpointMetadata>,
) -> EndpointOperationalState {
    let status = map_status(&service.status);
    let url = service.service_url.as_deref().map(https_url);
    EndpointOperationalState::new(
        status,
        url,
        service_metadata(service, region, secret_ref, previous),
    )
}
