//! Autoscaling policy management
//!
//! Policies are immutable on the platform: changing any value means a new
//! policy. A replaced policy stays alive until teardown because an in-flight
//! revision may still reference it.

use crate::error::{DeployerError, Result, SecondaryFailure, SecondaryResourceKind};
use crate::remote::{ComputeApi, ScalingPolicy, ScalingPolicyRequest};
use crate::tiers::ScalingBounds;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A scaling policy and the values it holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingPolicyReference {
    pub policy_ref: String,
    pub name: String,
    pub bounds: ScalingBounds,
}

impl From<ScalingPolicy> for ScalingPolicyReference {
    fn from(policy: ScalingPolicy) -> Self {
        Self {
            bounds: ScalingBounds {
                min_instances: policy.min_size,
                max_instances: policy.max_size,
                max_concurrency: policy.max_concurrency,
            },
            policy_ref: policy.policy_ref,
            name: policy.name,
        }
    }
}

pub struct ScalingPolicyManager {
    api: Arc<dyn ComputeApi>,
}

impl ScalingPolicyManager {
    pub fn new(api: Arc<dyn ComputeApi>) -> Self {
        Self { api }
    }

    /// Reuse `previous` if it still resolves with equal values, otherwise
    /// create a new policy named `name`.
    ///
    /// The caller owns deleting `previous` once it has been replaced.
    #[instrument(skip(self, tags), fields(min = bounds.min_instances, max = bounds.max_instances))]
    pub async fn ensure(
        &self,
        name: &str,
        bounds: ScalingBounds,
        previous: Option<&str>,
        tags: &BTreeMap<String, String>,
    ) -> Result<ScalingPolicyReference> {
        if let Some(previous) = previous {
            match self.api.describe_scaling_policy(previous).await {
                Ok(policy) => {
                    let existing = ScalingPolicyReference::from(policy);
                    if existing.bounds == bounds {
                        debug!(policy_ref = %existing.policy_ref, "Scaling policy up to date");
                        return Ok(existing);
                    }
                    debug!(policy_ref = %existing.policy_ref, "Scaling values changed");
                }
                Err(e) if e.is_not_found() => {
                    debug!(policy_ref = %previous, "Recorded scaling policy no longer exists");
                }
                Err(source) => {
                    warn!(policy_ref = %previous, error = %source, "Could not describe scaling policy");
                    return Err(DeployerError::ScalingPolicy {
                        name: name.to_string(),
                        source,
                    });
                }
            }
        }

        let request = ScalingPolicyRequest {
            name: name.to_string(),
            min_size: bounds.min_instances,
            max_size: bounds.max_instances,
            max_concurrency: bounds.max_concurrency,
            tags: tags.clone(),
        };

        let policy = self
            .api
            .create_scaling_policy(&request)
            .await
            .map_err(|source| DeployerError::ScalingPolicy {
                name: name.to_string(),
                source,
            })?;

        info!(policy_ref = %policy.policy_ref, "Created scaling policy");
        Ok(policy.into())
    }

    /// Delete a policy. Not found counts as deleted.
    pub async fn delete(&self, policy_ref: &str) -> std::result::Result<(), SecondaryFailure> {
        match self.api.delete_scaling_policy(policy_ref).await {
            Ok(()) => {
                info!(policy_ref = %policy_ref, "Deleted scaling policy");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(source) => {
                warn!(policy_ref = %policy_ref, error = %source, "Failed to delete scaling policy");
                Err(SecondaryFailure {
                    kind: SecondaryResourceKind::ScalingPolicy,
                    resource: policy_ref.to_string(),
                    source,
                })
            }
        }
    }
}
