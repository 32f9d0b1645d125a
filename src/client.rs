//! Execution client - one test execution against a supervised worker
//!
//! Sends the payload, waits for the response frame under a deadline, and
//! classifies the result. A worker that misses the deadline or dies mid-frame
//! is discarded, so it never serves another request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::classifier::classify;
use crate::error::HarnessError;
use crate::outcome::Outcome;
use crate::payload::TestPayload;
use crate::protocol::{self, ResponseFrame};
use crate::supervisor::Supervisor;

/// Default per-test deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Something that can execute test payloads
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute one payload. Only fatal harness errors are returned as `Err`.
    async fn execute(&self, payload: &TestPayload) -> Result<Outcome, HarnessError>;

    /// Release any worker held by this executor
    async fn shutdown(&self);
}

/// Executes payloads on the worker of one supervisor slot
pub struct ExecutionClient {
    supervisor: Arc<Supervisor>,
    timeout: Duration,
}

impl ExecutionClient {
    pub fn new(supervisor: Arc<Supervisor>, timeout: Duration) -> Self {
        Self {
            supervisor,
            timeout,
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub async fn execute(&self, payload: &TestPayload) -> Result<Outcome, HarnessError> {
        let frame = match protocol::encode_request(&payload.includes, &payload.body) {
            Ok(frame) => frame,
            Err(e) => {
                return Ok(Outcome::UnexpectedFailure {
                    detail: format!("payload not sent: {}", e),
                })
            }
        };

        let mut lease = self.supervisor.acquire().await?;
        let worker = lease.id();

        // Dropping the exchange on timeout abandons the pending read; the
        // worker behind it is killed before anyone can read from it again.
        let exchange = tokio::time::timeout(self.timeout, lease.exchange(&frame)).await;

        match exchange {
            Err(_) => {
                warn!(
                    "Worker timed out after {:?}: generation={}, pid={}",
                    self.timeout, worker.generation, worker.pid
                );
                lease.discard().await;
                Ok(Outcome::TimedOut)
            }
            Ok(Err(e)) => {
                let report = lease.crash_report().await;
                warn!(
                    "Worker transport failed: generation={}, error={}",
                    worker.generation, e
                );
                lease.discard().await;
                Ok(Outcome::crashed(format!("{}; {}", e, report)))
            }
            Ok(Ok(ResponseFrame::Truncated(partial))) => {
                let report = lease.crash_report().await;
                warn!(
                    "Worker exited mid-frame: generation={}, {}",
                    worker.generation,
                    report.lines().next().unwrap_or("")
                );
                lease.discard().await;
                let detail = if partial.is_empty() {
                    report
                } else {
                    format!("{}\npartial output:\n{}", report, partial)
                };
                Ok(Outcome::crashed(detail))
            }
            Ok(Ok(ResponseFrame::Complete(raw))) => {
                drop(lease);
                let outcome = classify(&raw, &payload.expectation);
                debug!(
                    "Executed payload: generation={}, outcome={}",
                    worker.generation, outcome
                );
                Ok(outcome)
            }
        }
    }

    /// Stop the slot's worker.
    pub async fn shutdown(&self) {
        self.supervisor.terminate().await;
    }
}

#[async_trait]
impl Executor for ExecutionClient {
    async fn execute(&self, payload: &TestPayload) -> Result<Outcome, HarnessError> {
        ExecutionClient::execute(self, payload).await
    }

    async fn shutdown(&self) {
        ExecutionClient::shutdown(self).await
    }
}
