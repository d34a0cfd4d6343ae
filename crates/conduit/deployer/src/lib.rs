//! Conduit Deployer
//!
//! Reconciles a desired [`EndpointSpec`](conduit_types::EndpointSpec) onto a
//! managed compute platform whose API is imperative and eventually
//! consistent.
//!
//! ## Architectural Boundaries
//!
//! - `conduit-types` owns: desired/observed state and their persisted form
//! - `conduit-deployer` owns: naming, tier selection, secondary resources,
//!   create/update/replace decisions, polling, log retrieval
//! - `conduit-runtime` owns: what happens inside the container per request
//!
//! ## Key Principle
//!
//! The reconciler is stateless across calls. Everything it needs to find the
//! remote resources again travels in the operational-state metadata that the
//! caller persists. Remote services are reached only through the
//! [`remote`] traits, so a fake platform can stand in for the real one.
//!
//! ## Usage
//!
//! ```no_run
//! use conduit_deployer::{DeployerConfig, EndpointReconciler, InMemoryPlatform};
//! use conduit_types::EndpointSpec;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let platform = Arc::new(InMemoryPlatform::new());
//! let reconciler = EndpointReconciler::new(
//!     DeployerConfig::default(),
//!     Arc::new(platform.session_provider("eu-west-1")),
//! );
//!
//! let spec = EndpointSpec::new("weather-agent", "registry.example.com/weather:1");
//! let state = reconciler.provision(&spec, None).await?;
//! println!("{} -> {:?}", state.status(), state.url());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod logs;
pub mod mapping;
pub mod memory;
pub mod naming;
pub mod plan;
pub mod poller;
pub mod reconciler;
pub mod remote;
pub mod scaling;
pub mod secrets;
pub mod session;
pub mod tiers;

pub use config::DeployerConfig;
pub use error::{
    DeployerError, Result, SecondaryFailure, SecondaryResourceError, SecondaryResourceKind,
};
pub use logs::{LogLines, LogOptions};
pub use memory::{InMemoryPlatform, RemoteOp};
pub use naming::{sanitize, InvalidNameError, NameKind, NameRule};
pub use plan::{ReconcileAction, ReplacementReason};
pub use poller::{OperationPoller, PollOutcome, MIN_POLL_INTERVAL};
pub use reconciler::{DeprovisionOutcome, EndpointReconciler};
pub use remote::{ComputeApi, LogsApi, RemoteError, RemoteResult, SecretsApi};
pub use scaling::{ScalingPolicyManager, ScalingPolicyReference};
pub use secrets::{SecretManager, SecretReference};
pub use session::{
    ClientCache, PlatformClients, PlatformSession, SessionProvider, StaticSessionProvider,
};
pub use tiers::{PlatformLimits, ResourceTier, ScalingBounds, TierCatalog};
