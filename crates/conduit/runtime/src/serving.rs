//! Running pipelines inside a request context

use crate::context::{self, StepOutputs};
use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use conduit_types::SnapshotId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// One inbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub request_id: String,
    pub snapshot_id: SnapshotId,
    /// Top-level parameter overrides
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Pass artifacts in memory; `None` defers to the serving default
    #[serde(default)]
    pub use_in_memory: Option<bool>,
}

impl PipelineRequest {
    pub fn new(snapshot_id: SnapshotId) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            snapshot_id,
            parameters: Map::new(),
            use_in_memory: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn in_memory(mut self, use_in_memory: bool) -> Self {
        self.use_in_memory = Some(use_in_memory);
        self
    }
}

/// Outputs captured while serving one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub request_id: String,
    pub snapshot_id: SnapshotId,
    pub outputs: StepOutputs,
    pub duration_ms: u64,
}

/// Run `pipeline` inside a fresh request context.
///
/// The context is stopped when the run finishes, fails, or is dropped.
#[instrument(skip(request, pipeline), fields(request_id = %request.request_id))]
pub async fn serve_request<F, Fut>(
    request: PipelineRequest,
    pipeline: F,
) -> Result<PipelineResponse>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    context::scope(run_in_scope(request, pipeline)).await
}

async fn run_in_scope<F, Fut>(request: PipelineRequest, pipeline: F) -> Result<PipelineResponse>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let started = Instant::now();
    let _guard = context::activate(
        request.request_id.clone(),
        request.snapshot_id,
        request.parameters,
        request.use_in_memory.unwrap_or(false),
    )?;

    if let Err(e) = pipeline().await {
        warn!(error = %e, "Pipeline run failed");
        return Err(RuntimeError::Pipeline(format!("{:#}", e)));
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    info!(duration_ms, "Pipeline run completed");
    Ok(PipelineResponse {
        request_id: request.request_id,
        snapshot_id: request.snapshot_id,
        outputs: context::get_outputs(),
        duration_ms,
    })
}

/// A pipeline that reads its overrides from, and records its outputs into,
/// the current request context
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

/// Serving configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Requests allowed to run at once; later ones wait
    pub max_concurrent_requests: usize,
    /// In-memory mode for requests that do not choose
    pub use_in_memory: bool,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 16,
            use_in_memory: false,
        }
    }
}

/// Serves requests against one pipeline with bounded concurrency
pub struct PipelineService<P> {
    pipeline: Arc<P>,
    config: ServingConfig,
    permits: Arc<Semaphore>,
}

impl<P> Clone for PipelineService<P> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            config: self.config,
            permits: Arc::clone(&self.permits),
        }
    }
}

impl<P: Pipeline> PipelineService<P> {
    pub fn new(pipeline: P, config: ServingConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
        Self {
            pipeline: Arc::new(pipeline),
            config,
            permits,
        }
    }

    pub fn config(&self) -> &ServingConfig {
        &self.config
    }

    /// Requests that could start right now
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Serve `request`, waiting for a free slot first.
    pub async fn handle(&self, mut request: PipelineRequest) -> Result<PipelineResponse> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RuntimeError::ShuttingDown)?;

        request
            .use_in_memory
            .get_or_insert(self.config.use_in_memory);
        let pipeline = Arc::clone(&self.pipeline);
        serve_request(request, move || async move { pipeline.run().await }).await
    }

    /// Reject new requests. Requests already running finish normally.
    pub fn close(&self) {
        info!("Pipeline service closing");
        self.permits.close();
    }
}
