//! Polling of asynchronous remote operations

use crate::error::Result;
use conduit_types::{EndpointOperationalState, EndpointStatus};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of a poll
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// Last observed state
    pub state: EndpointOperationalState,
    pub reached_target: bool,
}

/// Shortest interval between fetches
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Fixed-interval, deadline-bounded poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationPoller {
    interval: Duration,
}

impl Default for OperationPoller {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl OperationPoller {
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetch until the status is `target`, an error, or `timeout` elapses.
    ///
    /// The first fetch happens immediately; later ones wait one interval,
    /// shortened so no sleep runs past the deadline.
    pub async fn poll_until<F, Fut>(
        &self,
        mut fetch: F,
        target: EndpointStatus,
        timeout: Duration,
    ) -> Result<PollOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<EndpointOperationalState>>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut state = fetch().await?;

        loop {
            let status = state.status();
            if status == target {
                return Ok(PollOutcome {
                    state,
                    reached_target: true,
                });
            }
            if status == EndpointStatus::Error {
                warn!(target = %target, "Remote operation ended in error");
                return Ok(PollOutcome {
                    state,
                    reached_target: false,
                });
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(
                    target = %target,
                    status = %status,
                    timeout_secs = timeout.as_secs(),
                    "Timed out waiting for remote operation"
                );
                return Ok(PollOutcome {
                    state,
                    reached_target: false,
                });
            }

            debug!(status = %status, target = %target, "Waiting for remote operation");
            tokio::time::sleep(self.interval.min(deadline - now)).await;
            state = fetch().await?;
        }
    }
}
