//! Conduit Runtime - Request-scoped state for serving pipelines
//!
//! A deployed endpoint runs many pipeline requests at once on shared worker
//! threads. Each request needs its own parameter overrides, its own captured
//! step outputs and, optionally, its own in-memory artifact cache.
//!
//! ## Architectural Boundaries
//!
//! - `conduit-deployer` owns: getting the endpoint onto the platform
//! - `conduit-runtime` owns: isolating requests once they arrive
//! - The execution engine owns: actually running steps, calling into
//!   [`context`] to read overrides and record outputs
//!
//! ## Key Principle
//!
//! Request state lives in task-local storage opened per request, never in a
//! process-wide map keyed by request id. A request that ends, fails, or is
//! cancelled takes its state with it.
//!
//! ## Usage
//!
//! ```no_run
//! use conduit_runtime::{context, serve_request, PipelineRequest};
//! use conduit_types::SnapshotId;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = PipelineRequest::new(SnapshotId::generate())
//!     .with_parameter("city", json!("Paris"));
//!
//! let response = serve_request(request, || async {
//!     let city = context::get_parameter_override("city");
//!     let mut outputs = serde_json::Map::new();
//!     outputs.insert("city".into(), city.unwrap_or_default());
//!     context::record_step_outputs("echo", outputs);
//!     Ok(())
//! })
//! .await?;
//! println!("{:?}", response.outputs);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod context;
pub mod error;
pub mod serving;

pub use context::{InMemoryValue, RequestGuard, StepOutputs};
pub use error::{Result, RuntimeError};
pub use serving::{
    serve_request, Pipeline, PipelineRequest, PipelineResponse, PipelineService, ServingConfig,
};
