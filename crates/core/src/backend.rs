//! The seam between the dispatcher and a concrete generation service.
//!
//! Each backend materializes the canonical parameters into its own request
//! body, submits it, and reports job status when polled. Polling cadence is
//! owned by the backend through its [`PollPolicy`].

use std::time::Duration;

use async_trait::async_trait;

use crate::params::GenerationParameters;
use crate::result::{Artifact, BackendId};

/// Fixed-interval polling budget for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between consecutive status checks.
    pub interval: Duration,
    /// Maximum number of status checks before giving up.
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// A submitted job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    /// Backend-assigned identifier (`prompt_id` or grid request id).
    pub id: String,
    /// The exact request body that was submitted.
    pub request: serde_json::Value,
}

/// Status reported by a single poll.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Queued or running.
    Pending,
    /// Finished; `artifacts` may be empty if nothing was produced.
    Succeeded { artifacts: Vec<Artifact> },
    /// The backend reported an explicit failure.
    Faulted { reason: String },
}

/// Errors from a backend interaction.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The request could not be built from the parameters.
    #[error("Materialization failed: {0}")]
    Materialize(String),

    /// Submission failed or returned a malformed response.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// A status check failed. Treated as transient by the poll loop.
    #[error("Status check failed: {0}")]
    Poll(String),
}

/// A generation service reachable over the network.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn id(&self) -> BackendId;

    fn poll_policy(&self) -> PollPolicy;

    /// Materialize `params` and submit the job.
    async fn submit(&self, params: &GenerationParameters) -> Result<JobHandle, BackendError>;

    /// Check the status of a submitted job once.
    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, BackendError>;
}
