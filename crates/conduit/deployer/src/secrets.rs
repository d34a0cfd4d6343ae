//! Secret blob management
//!
//! Each endpoint owns at most one secret: a JSON object whose keys are the
//! sensitive variable names. Containers resolve single keys through
//! per-key references, so plaintext values never reach operational state.

use crate::error::{DeployerError, Result, SecondaryFailure, SecondaryResourceKind};
use crate::remote::{SecretHandle, SecretsApi};
use conduit_types::EndpointMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A stored secret blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub secret_id: String,
    pub name: String,
}

impl SecretReference {
    /// Reference resolving one key of the blob at container start
    pub fn key_ref(&self, key: &str) -> String {
        format!("{}:{}::", self.secret_id, key)
    }

    /// Per-key references for every variable name
    pub fn key_refs<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a String>,
    ) -> BTreeMap<String, String> {
        keys.into_iter()
            .map(|key| (key.clone(), self.key_ref(key)))
            .collect()
    }
}

impl From<SecretHandle> for SecretReference {
    fn from(handle: SecretHandle) -> Self {
        Self {
            secret_id: handle.secret_id,
            name: handle.name,
        }
    }
}

/// Create-or-update and delete of secret blobs
pub struct SecretManager {
    api: Arc<dyn SecretsApi>,
}

impl SecretManager {
    pub fn new(api: Arc<dyn SecretsApi>) -> Self {
        Self { api }
    }

    /// Store `values` under `name`, updating in place when the secret exists.
    #[instrument(skip(self, values, tags), fields(keys = values.len()))]
    pub async fn upsert(
        &self,
        name: &str,
        values: &BTreeMap<String, String>,
        tags: &BTreeMap<String, String>,
    ) -> Result<SecretReference> {
        let blob = serde_json::to_string(values)
            .map_err(|e| DeployerError::Internal(format!("cannot encode secret blob: {}", e)))?;

        match self.api.update_secret(name, &blob).await {
            Ok(handle) => {
                debug!(secret_id = %handle.secret_id, "Updated secret");
                return Ok(handle.into());
            }
            Err(e) if e.is_not_found() => {
                debug!("Secret does not exist yet, creating");
            }
            Err(source) => {
                return Err(DeployerError::SecretPersist {
                    name: name.to_string(),
                    source,
                })
            }
        }

        let description = "Sensitive environment variables of a conduit endpoint";
        let handle = self
            .api
            .create_secret(name, &blob, description, tags)
            .await
            .map_err(|source| DeployerError::SecretPersist {
                name: name.to_string(),
                source,
            })?;

        info!(secret_id = %handle.secret_id, "Created secret");
        Ok(handle.into())
    }

    /// The secret recorded in `metadata`, if it still exists remotely.
    pub async fn resolve_existing(&self, metadata: &EndpointMetadata) -> Option<SecretReference> {
        let secret_ref = metadata.secret_ref.as_deref()?;

        match self.api.describe_secret(secret_ref).await {
            Ok(handle) => Some(handle.into()),
            Err(e) if e.is_not_found() => {
                debug!(secret = %secret_ref, "Recorded secret no longer exists");
                None
            }
            Err(e) => {
                warn!(secret = %secret_ref, error = %e, "Could not verify recorded secret");
                None
            }
        }
    }

    /// Delete a secret. Not found counts as deleted.
    pub async fn delete(&self, secret: &str) -> std::result::Result<(), SecondaryFailure> {
        match self.api.delete_secret(secret).await {
            Ok(()) => {
                info!(secret = %secret, "Deleted secret");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(secret = %secret, "Secret already gone");
                Ok(())
            }
            Err(source) => {
                warn!(secret = %secret, error = %source, "Failed to delete secret");
                Err(SecondaryFailure {
                    kind: SecondaryResourceKind::Secret,
                    resource: secret.to_string(),
                    source,
                })
            }
        }
    }
}
