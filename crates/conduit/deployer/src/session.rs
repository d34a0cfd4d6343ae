//! Platform sessions and cached client handles
//!
//! Client handles are built lazily from a [`SessionProvider`] and reused
//! until the session that produced them expires.

use crate::error::{DeployerError, Result};
use crate::remote::{ComputeApi, LogsApi, RemoteResult, SecretsApi};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Region used when neither the session nor the configuration names one
pub const DEFAULT_REGION: &str = "us-east-1";

/// An authenticated session against the platform
#[derive(Clone)]
pub struct PlatformSession {
    /// Region bound to the credentials, if any
    pub region: Option<String>,
    pub compute: Arc<dyn ComputeApi>,
    pub secrets: Arc<dyn SecretsApi>,
    pub logs: Arc<dyn LogsApi>,
    /// `None` for sessions that never expire
    pub expires_at: Option<DateTime<Utc>>,
}

/// Produces platform sessions, e.g. from a credential connector
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn connect(&self) -> RemoteResult<PlatformSession>;
}

/// Provider handing out the same, never-expiring handles
pub struct StaticSessionProvider {
    region: Option<String>,
    compute: Arc<dyn ComputeApi>,
    secrets: Arc<dyn SecretsApi>,
    logs: Arc<dyn LogsApi>,
}

impl StaticSessionProvider {
    pub fn new(
        region: Option<String>,
        compute: Arc<dyn ComputeApi>,
        secrets: Arc<dyn SecretsApi>,
        logs: Arc<dyn LogsApi>,
    ) -> Self {
        Self {
            region,
            compute,
            secrets,
            logs,
        }
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn connect(&self) -> RemoteResult<PlatformSession> {
        Ok(PlatformSession {
            region: self.region.clone(),
            compute: self.compute.clone(),
            secrets: self.secrets.clone(),
            logs: self.logs.clone(),
            expires_at: None,
        })
    }
}

/// Client handles resolved from a session
pub struct PlatformClients {
    pub region: String,
    pub compute: Arc<dyn ComputeApi>,
    pub secrets: Arc<dyn SecretsApi>,
    pub logs: Arc<dyn LogsApi>,
}

struct CachedClients {
    clients: Arc<PlatformClients>,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedClients {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Lazily connected, self-refreshing client handles
pub struct ClientCache {
    provider: Arc<dyn SessionProvider>,
    fallback_region: Option<String>,
    cached: Mutex<Option<CachedClients>>,
}

impl ClientCache {
    pub fn new(provider: Arc<dyn SessionProvider>, fallback_region: Option<String>) -> Self {
        Self {
            provider,
            fallback_region,
            cached: Mutex::new(None),
        }
    }

    /// Current client handles, reconnecting if the session expired
    pub async fn clients(&self) -> Result<Arc<PlatformClients>> {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            if !entry.is_expired() {
                return Ok(entry.clients.clone());
            }
            debug!("Platform session expired, reconnecting");
        }

        let session = self
            .provider
            .connect()
            .await
            .map_err(|e| DeployerError::remote("connect", "platform session", e))?;

        let region = match session.region.filter(|r| !r.is_empty()) {
            Some(region) => region,
            None => {
                let region = self
                    .fallback_region
                    .clone()
                    .unwrap_or_else(|| DEFAULT_REGION.to_string());
                warn!(region = %region, "No region found in platform session, using fallback");
                region
            }
        };

        let clients = Arc::new(PlatformClients {
            region,
            compute: session.compute,
            secrets: session.secrets,
            logs: session.logs,
        });

        *cached = Some(CachedClients {
            clients: clients.clone(),
            expires_at: session.expires_at,
        });

        Ok(clients)
    }

    /// Region of the current session
    pub async fn region(&self) -> Result<String> {
        Ok(self.clients().await?.region.clone())
    }

    /// Drop cached handles; the next call reconnects
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
