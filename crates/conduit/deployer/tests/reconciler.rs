//! End-to-end reconciliation against the in-memory platform

use conduit_deployer::{
    DeployerConfig, DeployerError, EndpointReconciler, InMemoryPlatform, LogOptions,
    OperationPoller, RemoteError, RemoteOp, SecondaryResourceKind, StaticSessionProvider,
};
use conduit_types::{
    EndpointMetadata, EndpointOperationalState, EndpointRef, EndpointSpec, EndpointStatus,
    Visibility,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup() -> (Arc<InMemoryPlatform>, EndpointReconciler) {
    init_tracing();
    let platform = Arc::new(InMemoryPlatform::new());
    let reconciler = EndpointReconciler::new(
        DeployerConfig::default(),
        Arc::new(platform.session_provider("eu-west-1")),
    )
    .with_poller(OperationPoller::new(Duration::from_millis(10)));
    (platform, reconciler)
}

fn spec_with_secret() -> EndpointSpec {
    let mut spec = EndpointSpec::new("weather agent", "registry.example.com/weather:1");
    spec.environment.insert("MODE".into(), "fast".into());
    spec.secrets.insert("API_KEY".into(), "k-123".into());
    spec
}

#[tokio::test]
async fn test_create_then_wait_until_running() {
    let (platform, reconciler) = setup();
    let spec = EndpointSpec::new("weather", "registry.example.com/weather:1");

    let state = reconciler.provision(&spec, None).await.unwrap();
    assert_eq!(state.status(), EndpointStatus::Pending);
    assert!(state.url().is_none());
    assert_eq!(state.metadata().region.as_deref(), Some("eu-west-1"));
    assert!(state.metadata().service_ref.is_some());
    assert_eq!(platform.call_count(RemoteOp::CreateService), 1);

    let endpoint = EndpointRef::from_spec(&spec, state);
    let outcome = reconciler
        .wait_for_status(&endpoint, EndpointStatus::Running, TIMEOUT)
        .await
        .unwrap();
    assert!(outcome.reached_target);
    assert!(outcome
        .state
        .url()
        .is_some_and(|url| url.starts_with("https://")));
}

#[tokio::test]
async fn test_unlimited_max_replicas_updates_in_place() {
    let (platform, reconciler) = setup();
    platform.set_settle_after(0);

    let mut spec = EndpointSpec::new("weather", "registry.example.com/weather:1");
    spec.resources.max_replicas = Some(10);
    let first = reconciler.provision(&spec, None).await.unwrap();
    assert_eq!(first.status(), EndpointStatus::Running);
    assert_eq!(first.metadata().max_instances, Some(10));

    spec.resources.max_replicas = Some(0);
    let second = reconciler.provision(&spec, Some(&first)).await.unwrap();

    assert_eq!(platform.call_count(RemoteOp::CreateService), 1);
    assert_eq!(platform.call_count(RemoteOp::UpdateService), 1);
    assert_ne!(second.status(), EndpointStatus::Error);
    assert_eq!(second.metadata().max_instances, Some(1000));
    assert_eq!(second.metadata().service_ref, first.metadata().service_ref);

    // the old policy waits for teardown
    let old_policy = first.metadata().scaling_policy_ref.clone().unwrap();
    assert_eq!(second.metadata().stale_scaling_policies, vec![old_policy]);
}

#[tokio::test]
async fn test_image_change_updates_and_visibility_change_replaces() {
    let (platform, reconciler) = setup();
    platform.set_settle_after(0);

    let mut spec = spec_with_secret();
    let first = reconciler.provision(&spec, None).await.unwrap();

    spec.image = "registry.example.com/weather:2".into();
    let second = reconciler.provision(&spec, Some(&first)).await.unwrap();
    assert_eq!(platform.call_count(RemoteOp::CreateService), 1);
    assert_eq!(platform.call_count(RemoteOp::DeleteService), 0);

    spec.network.visibility = Visibility::Private;
    let third = reconciler.provision(&spec, Some(&second)).await.unwrap();
    assert_eq!(platform.call_count(RemoteOp::DeleteService), 1);
    assert_eq!(platform.call_count(RemoteOp::CreateService), 2);
    assert_ne!(third.metadata().service_ref, second.metadata().service_ref);
    assert_eq!(third.metadata().is_public, Some(false));

    let live = platform.live_services();
    assert_eq!(live.len(), 1);
    assert!(!live[0].config.network.is_public);

    // the replacement got a fresh secret and a single policy
    assert_eq!(platform.secret_count(), 1);
    assert_eq!(platform.scaling_policy_count(), 1);
    assert!(third.metadata().secret_ref.is_some());
}

#[tokio::test]
async fn test_secrets_are_injected_by_reference() {
    let (platform, reconciler) = setup();
    let spec = spec_with_secret();

    let state = reconciler.provision(&spec, None).await.unwrap();
    let secret_id = state.metadata().secret_ref.clone().unwrap();

    let service = platform.live_services().remove(0);
    assert_eq!(
        service.config.source.secret_refs["API_KEY"],
        format!("{}:API_KEY::", secret_id)
    );
    assert!(!service.config.source.environment.contains_key("API_KEY"));

    let rendered = serde_json::to_string(state.metadata()).unwrap();
    assert!(!rendered.contains("k-123"));

    let tags = platform.secret_tags(&secret_id).unwrap();
    assert_eq!(tags["managed-by"], "conduit");
    assert_eq!(tags["conduit-endpoint-id"], spec.id.to_string());
}

#[tokio::test]
async fn test_secret_store_failure_falls_back_to_plaintext() {
    let (platform, reconciler) = setup();
    platform.fail(RemoteOp::UpdateSecret, RemoteError::Transport("unreachable".into()));

    let spec = spec_with_secret();
    let state = reconciler.provision(&spec, None).await.unwrap();

    assert_ne!(state.status(), EndpointStatus::Error);
    assert!(state.metadata().secret_ref.is_none());

    let service = platform.live_services().remove(0);
    assert_eq!(service.config.source.environment["API_KEY"], "k-123");
    assert!(service.config.source.secret_refs.is_empty());
}

#[tokio::test]
async fn test_disabled_secret_store_injects_plaintext() {
    init_tracing();
    let platform = Arc::new(InMemoryPlatform::new());
    let config = DeployerConfig {
        use_secret_store: false,
        ..Default::default()
    };
    let reconciler =
        EndpointReconciler::new(config, Arc::new(platform.session_provider("eu-west-1")));

    reconciler.provision(&spec_with_secret(), None).await.unwrap();

    assert_eq!(platform.call_count(RemoteOp::CreateSecret), 0);
    let service = platform.live_services().remove(0);
    assert_eq!(service.config.source.environment["API_KEY"], "k-123");
}

#[tokio::test]
async fn test_removed_secrets_delete_the_old_blob() {
    let (platform, reconciler) = setup();
    platform.set_settle_after(0);

    let mut spec = spec_with_secret();
    let first = reconciler.provision(&spec, None).await.unwrap();
    assert_eq!(platform.secret_count(), 1);

    spec.secrets.clear();
    let second = reconciler.provision(&spec, Some(&first)).await.unwrap();
    assert_eq!(platform.secret_count(), 0);
    assert!(second.metadata().secret_ref.is_none());
}

#[tokio::test]
async fn test_unchanged_reprovision_reuses_secondary_resources() {
    let (platform, reconciler) = setup();
    platform.set_settle_after(0);

    let spec = spec_with_secret();
    let first = reconciler.provision(&spec, None).await.unwrap();
    let second = reconciler.provision(&spec, Some(&first)).await.unwrap();

    assert_eq!(platform.call_count(RemoteOp::CreateScalingPolicy), 1);
    assert_eq!(platform.call_count(RemoteOp::CreateSecret), 1);
    assert_eq!(
        second.metadata().scaling_policy_ref,
        first.metadata().scaling_policy_ref
    );
    assert!(second.metadata().stale_scaling_policies.is_empty());
    assert_eq!(second.metadata().secret_ref, first.metadata().secret_ref);
}

#[tokio::test]
async fn test_scaling_lookup_failure_aborts_reprovision() {
    let (platform, reconciler) = setup();
    platform.set_settle_after(0);

    let spec = EndpointSpec::new("weather", "registry.example.com/weather:1");
    let first = reconciler.provision(&spec, None).await.unwrap();

    platform.fail(RemoteOp::DescribeScalingPolicy, RemoteError::Transport("reset".into()));
    let err = reconciler.provision(&spec, Some(&first)).await.unwrap_err();

    assert!(matches!(err, DeployerError::ScalingPolicy { .. }));
    assert_eq!(platform.call_count(RemoteOp::CreateScalingPolicy), 1);
    assert_eq!(platform.call_count(RemoteOp::UpdateService), 0);
    assert_eq!(platform.scaling_policy_count(), 1);
}

#[tokio::test]
async fn test_failed_update_removes_new_scaling_policy() {
    let (platform, reconciler) = setup();
    platform.set_settle_after(0);

    let mut spec = EndpointSpec::new("weather", "registry.example.com/weather:1");
    spec.resources.max_replicas = Some(10);
    let first = reconciler.provision(&spec, None).await.unwrap();

    platform.fail(RemoteOp::UpdateService, RemoteError::api("InternalFailure", "boom"));
    spec.resources.max_replicas = Some(20);
    let err = reconciler.provision(&spec, Some(&first)).await.unwrap_err();

    assert!(matches!(err, DeployerError::Deployment { .. }));
    assert_eq!(platform.call_count(RemoteOp::CreateScalingPolicy), 2);
    assert_eq!(platform.scaling_policy_count(), 1);
    let kept = first.metadata().scaling_policy_ref.clone().unwrap();
    assert!(platform.scaling_policy(&kept).is_some());
}

#[tokio::test]
async fn test_deprovision_cleans_up_every_policy() {
    let (platform, reconciler) = setup();
    platform.set_settle_after(0);

    let mut spec = spec_with_secret();
    spec.resources.max_replicas = Some(10);
    let first = reconciler.provision(&spec, None).await.unwrap();
    spec.resources.max_replicas = Some(20);
    let second = reconciler.provision(&spec, Some(&first)).await.unwrap();
    assert_eq!(platform.scaling_policy_count(), 2);

    let endpoint = EndpointRef::from_spec(&spec, second);
    let outcome = reconciler.deprovision(&endpoint, TIMEOUT).await.unwrap();

    assert!(outcome.is_complete());
    assert!(outcome.secondary_error.is_none());
    assert_eq!(platform.scaling_policy_count(), 0);
    assert_eq!(platform.secret_count(), 0);
    assert!(platform.live_services().is_empty());
}

#[tokio::test]
async fn test_secret_cleanup_failure_does_not_fail_deprovision() {
    let (platform, reconciler) = setup();
    let spec = spec_with_secret();
    let state = reconciler.provision(&spec, None).await.unwrap();

    platform.fail(RemoteOp::DeleteSecret, RemoteError::api("AccessDenied", "denied"));

    let endpoint = EndpointRef::from_spec(&spec, state);
    let outcome = reconciler.deprovision(&endpoint, TIMEOUT).await.unwrap();

    assert_eq!(outcome.state.status(), EndpointStatus::Absent);
    let secondary = outcome.secondary_error.expect("secondary error reported");
    assert_eq!(secondary.failures.len(), 1);
    assert_eq!(secondary.failures[0].kind, SecondaryResourceKind::Secret);

    // the policy is still cleaned up
    assert_eq!(platform.scaling_policy_count(), 0);
    assert!(platform.live_services().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deprovision_timeout_keeps_secondary_resources() {
    let (platform, reconciler) = setup();
    platform.set_settle_after(0);
    let spec = spec_with_secret();
    let state = reconciler.provision(&spec, None).await.unwrap();

    platform.set_settle_after(u32::MAX);
    let endpoint = EndpointRef::from_spec(&spec, state);
    let outcome = reconciler
        .deprovision(&endpoint, Duration::from_millis(50))
        .await
        .unwrap();

    assert!(!outcome.is_complete());
    assert_eq!(outcome.state.status(), EndpointStatus::Pending);
    assert_eq!(platform.secret_count(), 1);
    assert_eq!(platform.scaling_policy_count(), 1);
}

#[tokio::test]
async fn test_deprovision_primary_failure_is_typed() {
    let (platform, reconciler) = setup();
    let spec = EndpointSpec::new("weather", "registry.example.com/weather:1");
    let state = reconciler.provision(&spec, None).await.unwrap();

    platform.fail(RemoteOp::DeleteService, RemoteError::api("InternalFailure", "boom"));
    let endpoint = EndpointRef::from_spec(&spec, state);
    let err = reconciler.deprovision(&endpoint, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, DeployerError::Deprovision { .. }));
}

#[tokio::test]
async fn test_unknown_endpoints() {
    let (_platform, reconciler) = setup();

    let metadata = EndpointMetadata {
        service_ref: Some("service/none/1".into()),
        region: Some("eu-west-1".into()),
        service_name: Some("none".into()),
        ..Default::default()
    };
    let endpoint = EndpointRef::new(
        conduit_types::EndpointId::generate(),
        "ghost",
        EndpointOperationalState::new(EndpointStatus::Running, None, metadata),
    );

    assert!(reconciler.inspect(&endpoint).await.unwrap_err().is_not_found());
    assert!(reconciler
        .deprovision(&endpoint, TIMEOUT)
        .await
        .unwrap_err()
        .is_not_found());
    assert!(reconciler
        .fetch_logs(&endpoint, LogOptions::default())
        .await
        .unwrap_err()
        .is_not_found());

    let blank = EndpointRef::new(
        conduit_types::EndpointId::generate(),
        "blank",
        EndpointOperationalState::default(),
    );
    assert!(matches!(
        reconciler.deprovision(&blank, TIMEOUT).await.unwrap_err(),
        DeployerError::Configuration(_)
    ));
}

#[tokio::test]
async fn test_inspect_requires_recorded_region() {
    let (_platform, reconciler) = setup();
    let spec = EndpointSpec::new("weather", "registry.example.com/weather:1");
    let state = reconciler.provision(&spec, None).await.unwrap();

    let mut metadata = state.metadata().clone();
    metadata.region = None;
    let endpoint = EndpointRef::from_spec(
        &spec,
        EndpointOperationalState::new(state.status(), None, metadata),
    );

    assert!(matches!(
        reconciler.inspect(&endpoint).await.unwrap_err(),
        DeployerError::Configuration(_)
    ));
}

#[tokio::test]
async fn test_fetch_logs_sorted_and_tailed() {
    let (platform, reconciler) = setup();
    let spec = EndpointSpec::new("weather", "registry.example.com/weather:1");
    let state = reconciler.provision(&spec, None).await.unwrap();

    let group = format!(
        "/aws/apprunner/{}/service",
        state.metadata().service_name.clone().unwrap()
    );
    platform.push_log(&group, "instance/b", 1_700_000_002_000, "serving");
    platform.push_log(&group, "instance/a", 1_700_000_000_000, "starting");
    platform.push_log(&group, "instance/a", 1_700_000_001_000, "loaded");

    let endpoint = EndpointRef::from_spec(&spec, state);
    let lines: Vec<String> = reconciler
        .fetch_logs(&endpoint, LogOptions::tail(2))
        .await
        .unwrap()
        .collect();

    assert_eq!(
        lines,
        vec![
            "[2023-11-14T22:13:21.000Z] loaded".to_string(),
            "[2023-11-14T22:13:22.000Z] serving".to_string(),
        ]
    );

    let follow = LogOptions {
        follow: true,
        tail: None,
    };
    assert!(matches!(
        reconciler.fetch_logs(&endpoint, follow).await.unwrap_err(),
        DeployerError::Unsupported(_)
    ));
}

#[tokio::test]
async fn test_missing_log_group() {
    let (_platform, reconciler) = setup();
    let spec = EndpointSpec::new("weather", "registry.example.com/weather:1");
    let state = reconciler.provision(&spec, None).await.unwrap();

    let endpoint = EndpointRef::from_spec(&spec, state);
    assert!(matches!(
        reconciler
            .fetch_logs(&endpoint, LogOptions::default())
            .await
            .unwrap_err(),
        DeployerError::LogsNotFound { .. }
    ));
}

#[tokio::test]
async fn test_region_falls_back_to_config() {
    init_tracing();
    let platform = Arc::new(InMemoryPlatform::new());
    let provider = StaticSessionProvider::new(
        None,
        platform.clone(),
        platform.clone(),
        platform.clone(),
    );
    let config = DeployerConfig {
        region: Some("ap-south-1".into()),
        ..Default::default()
    };
    let reconciler = EndpointReconciler::new(config, Arc::new(provider));

    let spec = EndpointSpec::new("weather", "registry.example.com/weather:1");
    let state = reconciler.provision(&spec, None).await.unwrap();
    assert_eq!(state.metadata().region.as_deref(), Some("ap-south-1"));
}

#[tokio::test]
async fn test_unknown_metadata_keys_survive_updates() {
    let (platform, reconciler) = setup();
    platform.set_settle_after(0);
    let mut spec = EndpointSpec::new("weather", "registry.example.com/weather:1");
    let first = reconciler.provision(&spec, None).await.unwrap();

    let mut value = first.metadata().to_value().unwrap();
    value["added_by_newer_version"] = serde_json::json!({"a": 1});
    let metadata = EndpointMetadata::from_value(value).unwrap();
    let existing = EndpointOperationalState::new(first.status(), None, metadata);

    spec.image = "registry.example.com/weather:2".into();
    let second = reconciler.provision(&spec, Some(&existing)).await.unwrap();
    assert_eq!(
        second.metadata().extra["added_by_newer_version"],
        serde_json::json!({"a": 1})
    );
}

#[tokio::test]
async fn test_invalid_spec_is_rejected_before_any_call() {
    let (platform, reconciler) = setup();
    let mut spec = EndpointSpec::new("weather", "registry.example.com/weather:1");
    spec.network.private_network = Some("not json".into());

    let err = reconciler.provision(&spec, None).await.unwrap_err();
    assert!(matches!(err, DeployerError::InvalidSpec(_)));
    assert_eq!(platform.write_count(), 0);
}

#[tokio::test]
async fn test_unnameable_endpoint_is_rejected() {
    init_tracing();
    let platform = Arc::new(InMemoryPlatform::new());
    let mut config = DeployerConfig::default();
    config.service_name_prefix.clear();
    let reconciler =
        EndpointReconciler::new(config, Arc::new(platform.session_provider("eu-west-1")));

    let spec = EndpointSpec::new("!!!", "registry.example.com/weather:1");
    assert!(matches!(
        reconciler.provision(&spec, None).await.unwrap_err(),
        DeployerError::InvalidName(_)
    ));
    assert_eq!(platform.write_count(), 0);
}
