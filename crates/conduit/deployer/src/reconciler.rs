//! Endpoint reconciliation
//!
//! The [`EndpointReconciler`] converges the platform onto an
//! [`EndpointSpec`]. It keeps no state between calls apart from cached
//! client handles: the remote service, its secret and its scaling policy
//! are found again through the metadata of the last operational state.

use crate::config::DeployerConfig;
use crate::error::{DeployerError, Result, SecondaryResourceError};
use crate::logs::{self, LogLines, LogOptions};
use crate::mapping;
use crate::naming::{resource_name, NameKind};
use crate::plan::{self, ReconcileAction, ResolvedInputs};
use crate::poller::{OperationPoller, PollOutcome};
use crate::remote::{ComputeApi, RemoteService, RemoteServiceStatus, ServiceConfig};
use crate::scaling::ScalingPolicyManager;
use crate::secrets::{SecretManager, SecretReference};
use crate::session::{ClientCache, SessionProvider};
use crate::tiers::TierCatalog;
use conduit_types::{
    EndpointMetadata, EndpointOperationalState, EndpointRef, EndpointSpec, EndpointStatus,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Result of a deprovision call
#[derive(Debug)]
pub struct DeprovisionOutcome {
    /// `Absent` once the service is gone; otherwise the last observed state,
    /// and secondary resources were left in place
    pub state: EndpointOperationalState,

    /// Secret or scaling policy cleanup that failed after the service was
    /// already gone
    pub secondary_error: Option<SecondaryResourceError>,
}

impl DeprovisionOutcome {
    pub fn is_complete(&self) -> bool {
        self.state.status() == EndpointStatus::Absent
    }
}

/// Reconciles endpoint specs onto the platform
pub struct EndpointReconciler {
    config: DeployerConfig,
    clients: ClientCache,
    tiers: TierCatalog,
    poller: OperationPoller,
}

impl EndpointReconciler {
    pub fn new(config: DeployerConfig, provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            clients: ClientCache::new(provider, config.region.clone()),
            poller: OperationPoller::new(config.poll_interval),
            tiers: TierCatalog::default(),
            config,
        }
    }

    /// Use a different tier catalog
    pub fn with_tiers(mut self, tiers: TierCatalog) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_poller(mut self, poller: OperationPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    /// Create, update or replace the service of `spec`.
    ///
    /// Returns as soon as the platform accepted the configuration; use
    /// [`wait_for_status`](Self::wait_for_status) to block until it runs.
    #[instrument(skip(self, spec, existing), fields(endpoint = %spec.name, id = %spec.id))]
    pub async fn provision(
        &self,
        spec: &EndpointSpec,
        existing: Option<&EndpointOperationalState>,
    ) -> Result<EndpointOperationalState> {
        spec.validate()?;
        let clients = self.clients.clients().await?;
        let compute = clients.compute.as_ref();

        let tier = self
            .tiers
            .select(spec.resources.cpu, spec.resources.memory_gb)
            .clone();
        let bounds = self.config.limits.normalize(
            spec.resources.min_replicas,
            spec.resources.max_replicas,
            spec.resources.max_concurrency,
        );
        let service_name = resource_name(
            NameKind::Service,
            &self.config.service_name_prefix,
            &spec.name,
            &spec.id,
        )?;

        let mut previous = existing.map(|s| s.metadata().clone()).unwrap_or_default();
        let mut current = self
            .fetch_service(compute, &previous)
            .await?
            .filter(|s| s.status != RemoteServiceStatus::Deleted);

        let action = plan::decide(current.as_ref(), spec);
        debug!(?action, "Reconcile action decided");

        if let ReconcileAction::Replace(reason) = action {
            info!(%reason, "Replacing service");
            previous = self.tear_down_for_replacement(spec, existing).await;
            current = None;
        }

        // Sensitive variables
        let owner_tags = plan::owner_tags(spec, &self.config);
        let secrets = SecretManager::new(clients.secrets.clone());
        let mut environment = spec.environment.clone();
        let mut secret_refs = BTreeMap::new();
        let mut active_secret: Option<SecretReference> = None;

        if !spec.secrets.is_empty() {
            if self.config.use_secret_store {
                let secret_name = resource_name(
                    NameKind::Secret,
                    &self.config.secret_name_prefix,
                    &spec.name,
                    &spec.id,
                )?;
                match secrets.upsert(&secret_name, &spec.secrets, &owner_tags).await {
                    Ok(reference) => {
                        secret_refs = reference.key_refs(spec.secrets.keys());
                        active_secret = Some(reference);
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to store secrets, injecting them as plain environment variables");
                        environment.extend(spec.secrets.clone());
                    }
                }
            } else {
                warn!("Secret store disabled, injecting secrets as plain environment variables");
                environment.extend(spec.secrets.clone());
            }
        }

        let stale_secret = secrets
            .resolve_existing(&previous)
            .await
            .filter(|old| active_secret.as_ref().map_or(true, |a| a.secret_id != old.secret_id));

        // Scaling policy
        let policy_name = resource_name(
            NameKind::ScalingPolicy,
            &self.config.scaling_policy_prefix,
            &spec.name,
            &spec.id,
        )?;
        let scaling = ScalingPolicyManager::new(clients.compute.clone());
        let policy = scaling
            .ensure(
                &policy_name,
                bounds,
                previous.scaling_policy_ref.as_deref(),
                &owner_tags,
            )
            .await?;
        let policy_created =
            previous.scaling_policy_ref.as_deref() != Some(policy.policy_ref.as_str());

        let applied = match plan::service_config(
            spec,
            ResolvedInputs {
                service_name,
                tier,
                scaling_policy_ref: policy.policy_ref.clone(),
                environment,
                secret_refs,
            },
            &self.config,
        ) {
            Ok(desired) => {
                self.apply_service(spec, &clients.region, compute, current, &desired)
                    .await
            }
            Err(e) => Err(e),
        };

        let service = match applied {
            Ok(service) => service,
            Err(e) => {
                if policy_created {
                    // Nothing references the new policy yet.
                    let _ = scaling.delete(&policy.policy_ref).await;
                }
                return Err(e);
            }
        };

        if let Some(old) = previous.scaling_policy_ref.take() {
            if old != policy.policy_ref && !previous.stale_scaling_policies.contains(&old) {
                debug!(policy_ref = %old, "Scaling policy replaced, deferring deletion to teardown");
                previous.stale_scaling_policies.push(old);
            }
        }

        if let Some(old) = stale_secret {
            // A failed delete is logged by the manager; it does not fail the deploy.
            let _ = secrets.delete(&old.secret_id).await;
        }

        Ok(mapping::service_state(
            &service,
            &clients.region,
            active_secret.as_ref().map(|s| s.secret_id.as_str()),
            Some(&previous),
        ))
    }

    /// Update `current` in place, or create the service when there is none.
    async fn apply_service(
        &self,
        spec: &EndpointSpec,
        region: &str,
        compute: &dyn ComputeApi,
        current: Option<RemoteService>,
        desired: &ServiceConfig,
    ) -> Result<RemoteService> {
        let deployment_error = |source| DeployerError::Deployment {
            endpoint: spec.name.clone(),
            source,
        };

        match current {
            Some(existing_service) => {
                let mut updated = compute
                    .update_service(&existing_service.service_ref, desired)
                    .await
                    .map_err(deployment_error)?;
                compute
                    .tag_service(&updated.service_ref, &desired.tags)
                    .await
                    .map_err(deployment_error)?;
                updated
                    .config
                    .tags
                    .extend(desired.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
                info!(service_ref = %updated.service_ref, "Updated service");
                Ok(updated)
            }
            None => {
                let created = compute
                    .create_service(desired)
                    .await
                    .map_err(deployment_error)?;
                info!(service_ref = %created.service_ref, region = %region, "Created service");
                Ok(created)
            }
        }
    }

    /// Delete the service, wait for it to disappear, then clean up its
    /// secret and scaling policies.
    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint.name, id = %endpoint.id))]
    pub async fn deprovision(
        &self,
        endpoint: &EndpointRef,
        timeout: Duration,
    ) -> Result<DeprovisionOutcome> {
        let metadata = endpoint.metadata();
        let service_ref = metadata.service_ref.as_deref().ok_or_else(|| {
            DeployerError::Configuration(format!(
                "no service reference recorded for endpoint '{}'",
                endpoint.name
            ))
        })?;

        let clients = self.clients.clients().await?;
        let compute = clients.compute.as_ref();
        let service = self
            .fetch_service(compute, metadata)
            .await?
            .ok_or_else(|| DeployerError::EndpointNotFound(endpoint.name.clone()))?;

        if service.status == RemoteServiceStatus::Deleted {
            debug!("Service already deleted");
        } else {
            compute
                .delete_service(service_ref)
                .await
                .map_err(|source| {
                    if source.is_not_found() {
                        DeployerError::EndpointNotFound(endpoint.name.clone())
                    } else {
                        DeployerError::Deprovision {
                            endpoint: endpoint.name.clone(),
                            source,
                        }
                    }
                })?;
            info!(service_ref = %service_ref, "Service deletion started");
        }

        let region = metadata
            .region
            .clone()
            .unwrap_or_else(|| clients.region.clone());
        let PollOutcome {
            state,
            reached_target,
        } = self
            .poller
            .poll_until(
                || self.observe(compute, service_ref, &region, metadata),
                EndpointStatus::Absent,
                timeout,
            )
            .await?;

        if !reached_target {
            warn!(status = %state.status(), "Service not gone yet, leaving secondary resources in place");
            return Ok(DeprovisionOutcome {
                state,
                secondary_error: None,
            });
        }

        let mut failures = Vec::new();

        if let Some(secret) = metadata.secret_ref.as_deref() {
            let secrets = SecretManager::new(clients.secrets.clone());
            if let Err(failure) = secrets.delete(secret).await {
                failures.push(failure);
            }
        }

        let policies = ScalingPolicyManager::new(clients.compute.clone());
        let mut policy_refs: Vec<&String> = metadata.stale_scaling_policies.iter().collect();
        if let Some(current) = &metadata.scaling_policy_ref {
            if !policy_refs.contains(&current) {
                policy_refs.push(current);
            }
        }
        for policy_ref in policy_refs {
            if let Err(failure) = policies.delete(policy_ref).await {
                failures.push(failure);
            }
        }

        let secondary_error = if failures.is_empty() {
            info!("Endpoint deprovisioned");
            None
        } else {
            warn!(failures = failures.len(), "Endpoint deprovisioned, secondary cleanup incomplete");
            Some(SecondaryResourceError {
                endpoint: endpoint.name.clone(),
                failures,
            })
        };

        Ok(DeprovisionOutcome {
            state,
            secondary_error,
        })
    }

    /// Current state of an endpoint, without changing anything.
    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint.name))]
    pub async fn inspect(&self, endpoint: &EndpointRef) -> Result<EndpointOperationalState> {
        let clients = self.clients.clients().await?;
        let metadata = endpoint.metadata();

        let service = self
            .fetch_service(clients.compute.as_ref(), metadata)
            .await?
            .ok_or_else(|| DeployerError::EndpointNotFound(endpoint.name.clone()))?;

        let region = metadata.region.as_deref().ok_or_else(|| {
            DeployerError::Configuration(format!(
                "no region recorded for endpoint '{}'",
                endpoint.name
            ))
        })?;

        let secret = SecretManager::new(clients.secrets.clone())
            .resolve_existing(metadata)
            .await;

        Ok(mapping::service_state(
            &service,
            region,
            secret.as_ref().map(|s| s.secret_id.as_str()),
            Some(metadata),
        ))
    }

    /// Poll [`inspect`](Self::inspect) until `target`, an error or `timeout`
    pub async fn wait_for_status(
        &self,
        endpoint: &EndpointRef,
        target: EndpointStatus,
        timeout: Duration,
    ) -> Result<PollOutcome> {
        self.poller
            .poll_until(|| self.inspect(endpoint), target, timeout)
            .await
    }

    /// Log lines of the endpoint, oldest first.
    ///
    /// Following is not supported and fails before anything is fetched.
    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint.name))]
    pub async fn fetch_logs(
        &self,
        endpoint: &EndpointRef,
        options: LogOptions,
    ) -> Result<LogLines> {
        if options.follow {
            return Err(DeployerError::Unsupported(
                "following logs is not implemented".into(),
            ));
        }

        let clients = self.clients.clients().await?;
        let metadata = endpoint.metadata();

        self.fetch_service(clients.compute.as_ref(), metadata)
            .await?
            .ok_or_else(|| DeployerError::EndpointNotFound(endpoint.name.clone()))?;

        let service_name = metadata.service_name.as_deref().ok_or_else(|| {
            DeployerError::Configuration(format!(
                "no service name recorded for endpoint '{}'",
                endpoint.name
            ))
        })?;

        let group = logs::log_group(&self.config.log_group_prefix, service_name);
        logs::read_group(clients.logs.as_ref(), &endpoint.name, &group, options).await
    }

    /// The service recorded in `metadata`; `None` when nothing is recorded
    /// or the platform no longer knows it.
    async fn fetch_service(
        &self,
        compute: &dyn ComputeApi,
        metadata: &EndpointMetadata,
    ) -> Result<Option<RemoteService>> {
        let Some(service_ref) = metadata.service_ref.as_deref() else {
            return Ok(None);
        };

        match compute.describe_service(service_ref).await {
            Ok(service) => Ok(Some(service)),
            Err(e) if e.is_not_found() => {
                debug!(service_ref = %service_ref, "Recorded service no longer exists");
                Ok(None)
            }
            Err(e) => Err(DeployerError::remote("describe", service_ref, e)),
        }
    }

    async fn observe(
        &self,
        compute: &dyn ComputeApi,
        service_ref: &str,
        region: &str,
        metadata: &EndpointMetadata,
    ) -> Result<EndpointOperationalState> {
        match compute.describe_service(service_ref).await {
            Ok(service) => Ok(mapping::service_state(
                &service,
                region,
                metadata.secret_ref.as_deref(),
                Some(metadata),
            )),
            Err(e) if e.is_not_found() => Ok(EndpointOperationalState::absent(metadata.clone())),
            Err(e) => Err(DeployerError::remote("describe", service_ref, e)),
        }
    }

    /// Deprovision the old service before a replacement. Failures are
    /// logged and creation goes ahead.
    ///
    /// Returns the metadata the new service starts from.
    async fn tear_down_for_replacement(
        &self,
        spec: &EndpointSpec,
        existing: Option<&EndpointOperationalState>,
    ) -> EndpointMetadata {
        let existing = existing.cloned().unwrap_or_default();
        let previous = existing.metadata().clone();
        let old = EndpointRef::from_spec(spec, existing);

        match self.deprovision(&old, self.config.operation_timeout).await {
            Ok(outcome) if outcome.is_complete() => {
                if let Some(e) = outcome.secondary_error {
                    warn!(error = %e, "Old service removed, secondary cleanup incomplete");
                }
                EndpointMetadata {
                    extra: previous.extra,
                    ..Default::default()
                }
            }
            Ok(outcome) => {
                warn!(status = %outcome.state.status(), "Old service was not removed in time");
                previous
            }
            Err(e) => {
                warn!(error = %e, "Failed to deprovision the old service");
                previous
            }
        }
    }
}
