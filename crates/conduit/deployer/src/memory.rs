//! In-memory platform
//!
//! Implements Compute, Secrets and Logs against DashMaps. Asynchronous
//! operations settle after a configurable number of describe calls, and any
//! operation can be made to fail, so reconciliation can be exercised without
//! a live platform.

use crate::remote::{
    ComputeApi, LogEvent, LogStream, LogsApi, RemoteError, RemoteResult, RemoteService,
    RemoteServiceStatus, ScalingPolicy, ScalingPolicyRequest, ScalingSummary, SecretHandle,
    SecretsApi, ServiceConfig,
};
use crate::session::StaticSessionProvider;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Remote operations, for call counting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    CreateService,
    UpdateService,
    TagService,
    DescribeService,
    DeleteService,
    CreateScalingPolicy,
    DescribeScalingPolicy,
    DeleteScalingPolicy,
    CreateSecret,
    UpdateSecret,
    DescribeSecret,
    DeleteSecret,
    ListStreams,
    GetEvents,
}

impl RemoteOp {
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            RemoteOp::DescribeService
                | RemoteOp::DescribeScalingPolicy
                | RemoteOp::DescribeSecret
                | RemoteOp::ListStreams
                | RemoteOp::GetEvents
        )
    }
}

#[derive(Debug, Clone)]
struct ServiceRecord {
    service: RemoteService,
    /// Status reached after `remaining` more describes
    pending: Option<(RemoteServiceStatus, u32)>,
}

#[derive(Debug, Clone)]
struct StoredSecret {
    handle: SecretHandle,
    value: String,
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
struct LogStreamRecord {
    last_event_ms: i64,
    events: Vec<LogEvent>,
}

/// DashMap-backed fake of the three platform services
pub struct InMemoryPlatform {
    services: DashMap<String, ServiceRecord>,
    policies: DashMap<String, ScalingPolicy>,
    secrets: DashMap<String, StoredSecret>,
    log_groups: DashMap<String, BTreeMap<String, LogStreamRecord>>,
    calls: DashMap<RemoteOp, u64>,
    faults: DashMap<RemoteOp, RemoteError>,
    settle_after: AtomicU32,
    sequence: AtomicU64,
}

impl InMemoryPlatform {
    /// Asynchronous operations settle on the first describe
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            policies: DashMap::new(),
            secrets: DashMap::new(),
            log_groups: DashMap::new(),
            calls: DashMap::new(),
            faults: DashMap::new(),
            settle_after: AtomicU32::new(1),
            sequence: AtomicU64::new(0),
        }
    }

    /// Provider handing out this platform's handles
    pub fn session_provider(self: &Arc<Self>, region: &str) -> StaticSessionProvider {
        StaticSessionProvider::new(
            Some(region.to_string()),
            self.clone(),
            self.clone(),
            self.clone(),
        )
    }

    /// Describes needed before an in-progress operation settles; 0 settles
    /// immediately.
    pub fn set_settle_after(&self, describes: u32) {
        self.settle_after.store(describes, Ordering::SeqCst);
    }

    /// Make every subsequent `op` fail with `error`
    pub fn fail(&self, op: RemoteOp, error: RemoteError) {
        self.faults.insert(op, error);
    }

    pub fn clear_fault(&self, op: RemoteOp) {
        self.faults.remove(&op);
    }

    pub fn call_count(&self, op: RemoteOp) -> u64 {
        self.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    /// Calls that change remote state
    pub fn write_count(&self) -> u64 {
        self.calls
            .iter()
            .filter(|entry| entry.key().is_write())
            .map(|entry| *entry.value())
            .sum()
    }

    /// Force the status of a service
    pub fn set_status(&self, service_ref: &str, status: RemoteServiceStatus) {
        if let Some(mut record) = self.services.get_mut(service_ref) {
            record.service.status = status;
            record.pending = None;
        }
    }

    pub fn service(&self, service_ref: &str) -> Option<RemoteService> {
        self.services.get(service_ref).map(|r| r.service.clone())
    }

    /// Services that are not deleted
    pub fn live_services(&self) -> Vec<RemoteService> {
        self.services
            .iter()
            .filter(|r| r.service.status != RemoteServiceStatus::Deleted)
            .map(|r| r.service.clone())
            .collect()
    }

    pub fn scaling_policy(&self, policy_ref: &str) -> Option<ScalingPolicy> {
        self.policies.get(policy_ref).map(|p| p.clone())
    }

    pub fn scaling_policy_count(&self) -> usize {
        self.policies.len()
    }

    pub fn secret_value(&self, secret: &str) -> Option<String> {
        self.find_secret_id(secret)
            .and_then(|id| self.secrets.get(&id).map(|s| s.value.clone()))
    }

    pub fn secret_tags(&self, secret: &str) -> Option<BTreeMap<String, String>> {
        self.find_secret_id(secret)
            .and_then(|id| self.secrets.get(&id).map(|s| s.tags.clone()))
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }

    /// Append an event to a log stream, creating group and stream on demand
    pub fn push_log(&self, group: &str, stream: &str, timestamp_ms: i64, message: &str) {
        let mut streams = self.log_groups.entry(group.to_string()).or_default();
        let record = streams.entry(stream.to_string()).or_default();
        record.last_event_ms = record.last_event_ms.max(timestamp_ms);
        record.events.push(LogEvent {
            timestamp_ms,
            message: message.to_string(),
        });
    }

    fn enter(&self, op: RemoteOp) -> RemoteResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.faults.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn transition_to(
        &self,
        target: RemoteServiceStatus,
    ) -> (RemoteServiceStatus, Option<(RemoteServiceStatus, u32)>) {
        match self.settle_after.load(Ordering::SeqCst) {
            0 => (target, None),
            n => (RemoteServiceStatus::OperationInProgress, Some((target, n))),
        }
    }

    fn scaling_summary(&self, policy_ref: &str) -> RemoteResult<ScalingSummary> {
        let policy = self.policies.get(policy_ref).ok_or_else(|| {
            RemoteError::InvalidRequest(format!("unknown scaling policy {}", policy_ref))
        })?;
        Ok(ScalingSummary {
            policy_ref: policy.policy_ref.clone(),
            min_size: policy.min_size,
            max_size: policy.max_size,
            max_concurrency: policy.max_concurrency,
        })
    }

    fn find_secret_id(&self, secret: &str) -> Option<String> {
        if self.secrets.contains_key(secret) {
            return Some(secret.to_string());
        }
        self.secrets
            .iter()
            .find(|s| s.handle.name == secret)
            .map(|s| s.key().clone())
    }
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComputeApi for InMemoryPlatform {
    async fn create_service(&self, config: &ServiceConfig) -> RemoteResult<RemoteService> {
        self.enter(RemoteOp::CreateService)?;

        let name_taken = self.services.iter().any(|r| {
            r.service.config.service_name == config.service_name
                && r.service.status != RemoteServiceStatus::Deleted
        });
        if name_taken {
            return Err(RemoteError::InvalidRequest(format!(
                "service {} already exists",
                config.service_name
            )));
        }

        let scaling = self.scaling_summary(&config.scaling_policy_ref)?;
        let service_id = Uuid::new_v4().simple().to_string();
        let service_ref = format!("service/{}/{}", config.service_name, service_id);
        let (status, pending) = self.transition_to(RemoteServiceStatus::Running);
        let now = Utc::now();

        let service = RemoteService {
            service_ref: service_ref.clone(),
            service_url: Some(format!("{}.conduit.example.com", &service_id[..10])),
            service_id,
            status,
            config: config.clone(),
            scaling: Some(scaling),
            created_at: Some(now),
            updated_at: Some(now),
            deleted_at: None,
        };

        self.services.insert(
            service_ref,
            ServiceRecord {
                service: service.clone(),
                pending,
            },
        );
        Ok(service)
    }

    async fn update_service(
        &self,
        service_ref: &str,
        config: &ServiceConfig,
    ) -> RemoteResult<RemoteService> {
        self.enter(RemoteOp::UpdateService)?;
        let scaling = self.scaling_summary(&config.scaling_policy_ref)?;
        let (status, pending) = self.transition_to(RemoteServiceStatus::Running);

        let mut record = self
            .services
            .get_mut(service_ref)
            .filter(|r| r.service.status != RemoteServiceStatus::Deleted)
            .ok_or_else(|| RemoteError::not_found("service", service_ref))?;

        if record.service.status == RemoteServiceStatus::OperationInProgress {
            return Err(RemoteError::InvalidRequest(format!(
                "service {} has an operation in progress",
                service_ref
            )));
        }

        let service_name = record.service.config.service_name.clone();
        let tags = record.service.config.tags.clone();
        record.service.config = ServiceConfig {
            service_name,
            tags,
            ..config.clone()
        };
        record.service.scaling = Some(scaling);
        record.service.status = status;
        record.service.updated_at = Some(Utc::now());
        record.pending = pending;
        Ok(record.service.clone())
    }

    async fn tag_service(
        &self,
        service_ref: &str,
        tags: &BTreeMap<String, String>,
    ) -> RemoteResult<()> {
        self.enter(RemoteOp::TagService)?;
        let mut record = self
            .services
            .get_mut(service_ref)
            .ok_or_else(|| RemoteError::not_found("service", service_ref))?;
        record
            .service
            .config
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn describe_service(&self, service_ref: &str) -> RemoteResult<RemoteService> {
        self.enter(RemoteOp::DescribeService)?;
        let mut record = self
            .services
            .get_mut(service_ref)
            .ok_or_else(|| RemoteError::not_found("service", service_ref))?;

        if let Some((target, remaining)) = record.pending.take() {
            if remaining <= 1 {
                if target == RemoteServiceStatus::Deleted {
                    record.service.deleted_at = Some(Utc::now());
                }
                record.service.status = target;
            } else {
                record.pending = Some((target, remaining - 1));
            }
        }
        Ok(record.service.clone())
    }

    async fn delete_service(&self, service_ref: &str) -> RemoteResult<RemoteService> {
        self.enter(RemoteOp::DeleteService)?;
        let (status, pending) = self.transition_to(RemoteServiceStatus::Deleted);

        let mut record = self
            .services
            .get_mut(service_ref)
            .filter(|r| r.service.status != RemoteServiceStatus::Deleted)
            .ok_or_else(|| RemoteError::not_found("service", service_ref))?;

        record.service.status = status;
        record.pending = pending;
        if record.service.status == RemoteServiceStatus::Deleted {
            record.service.deleted_at = Some(Utc::now());
        }
        Ok(record.service.clone())
    }

    async fn create_scaling_policy(
        &self,
        request: &ScalingPolicyRequest,
    ) -> RemoteResult<ScalingPolicy> {
        self.enter(RemoteOp::CreateScalingPolicy)?;
        let policy = ScalingPolicy {
            policy_ref: format!("scaling/{}/{}", request.name, self.next_seq()),
            name: request.name.clone(),
            min_size: request.min_size,
            max_size: request.max_size,
            max_concurrency: request.max_concurrency,
        };
        self.policies.insert(policy.policy_ref.clone(), policy.clone());
        Ok(policy)
    }

    async fn describe_scaling_policy(&self, policy_ref: &str) -> RemoteResult<ScalingPolicy> {
        self.enter(RemoteOp::DescribeScalingPolicy)?;
        self.policies
            .get(policy_ref)
            .map(|p| p.clone())
            .ok_or_else(|| RemoteError::not_found("scaling policy", policy_ref))
    }

    async fn delete_scaling_policy(&self, policy_ref: &str) -> RemoteResult<()> {
        self.enter(RemoteOp::DeleteScalingPolicy)?;
        self.policies
            .remove(policy_ref)
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found("scaling policy", policy_ref))
    }
}

#[async_trait]
impl SecretsApi for InMemoryPlatform {
    async fn create_secret(
        &self,
        name: &str,
        value: &str,
        _description: &str,
        tags: &BTreeMap<String, String>,
    ) -> RemoteResult<SecretHandle> {
        self.enter(RemoteOp::CreateSecret)?;
        if self.find_secret_id(name).is_some() {
            return Err(RemoteError::api(
                "ResourceExists",
                format!("secret {} already exists", name),
            ));
        }
        let handle = SecretHandle {
            secret_id: format!("secret:{}-{:06}", name, self.next_seq()),
            name: name.to_string(),
        };
        self.secrets.insert(
            handle.secret_id.clone(),
            StoredSecret {
                handle: handle.clone(),
                value: value.to_string(),
                tags: tags.clone(),
            },
        );
        Ok(handle)
    }

    async fn update_secret(&self, secret: &str, value: &str) -> RemoteResult<SecretHandle> {
        self.enter(RemoteOp::UpdateSecret)?;
        let id = self
            .find_secret_id(secret)
            .ok_or_else(|| RemoteError::not_found("secret", secret))?;
        let mut stored = self
            .secrets
            .get_mut(&id)
            .ok_or_else(|| RemoteError::not_found("secret", secret))?;
        stored.value = value.to_string();
        Ok(stored.handle.clone())
    }

    async fn describe_secret(&self, secret: &str) -> RemoteResult<SecretHandle> {
        self.enter(RemoteOp::DescribeSecret)?;
        self.find_secret_id(secret)
            .and_then(|id| self.secrets.get(&id).map(|s| s.handle.clone()))
            .ok_or_else(|| RemoteError::not_found("secret", secret))
    }

    async fn delete_secret(&self, secret: &str) -> RemoteResult<()> {
        self.enter(RemoteOp::DeleteSecret)?;
        let id = self
            .find_secret_id(secret)
            .ok_or_else(|| RemoteError::not_found("secret", secret))?;
        self.secrets.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl LogsApi for InMemoryPlatform {
    async fn list_streams(&self, group: &str) -> RemoteResult<Vec<LogStream>> {
        self.enter(RemoteOp::ListStreams)?;
        let streams = self
            .log_groups
            .get(group)
            .ok_or_else(|| RemoteError::not_found("log group", group))?;
        let mut listed: Vec<LogStream> = streams
            .iter()
            .map(|(name, record)| LogStream {
                name: name.clone(),
                last_event_ms: record.last_event_ms,
            })
            .collect();
        listed.sort_by(|a, b| b.last_event_ms.cmp(&a.last_event_ms));
        Ok(listed)
    }

    async fn get_events(&self, group: &str, stream: &str) -> RemoteResult<Vec<LogEvent>> {
        self.enter(RemoteOp::GetEvents)?;
        self.log_groups
            .get(group)
            .and_then(|streams| streams.get(stream).map(|r| r.events.clone()))
            .ok_or_else(|| RemoteError::not_found("log stream", stream))
    }
}
