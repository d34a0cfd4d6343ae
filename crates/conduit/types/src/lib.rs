//! Conduit Types - Core types for pipeline endpoint deployment
//!
//! Conduit turns a packaged pipeline into a continuously running HTTP
//! endpoint on a managed compute platform and serves individual requests
//! against it.
//!
//! ## Architectural Boundaries
//!
//! - **conduit-types** owns: desired and observed endpoint state, ids
//! - **conduit-deployer** owns: reconciling desired state onto the platform
//! - **conduit-runtime** owns: request-scoped state while a pipeline runs
//!
//! ## Key Concepts
//!
//! - **EndpointSpec**: Desired state, immutable for one reconciliation run
//! - **EndpointOperationalState**: Observed state returned by every call
//! - **EndpointMetadata**: Schema-backed mirror of the remote resource, with a
//!   passthrough bag for keys this version does not know about
//! - **EndpointRef**: What the metadata store hands back between calls

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod ids;
pub mod spec;
pub mod state;

pub use ids::{EndpointId, SnapshotId};
pub use spec::{
    EndpointSpec, HealthCheckPolicy, HealthCheckProtocol, NetworkPolicy, ResourceRequest,
    ServingEntrypoint, SpecValidationError, TrafficAllocation, TrafficRoute, TrafficTarget,
    Visibility,
};
pub use state::{EndpointMetadata, EndpointOperationalState, EndpointRef, EndpointStatus};
