//! [`GenerationBackend`] implementation for the remote grid.

use std::time::Duration;

use aipg_core::backend::{BackendError, GenerationBackend, JobHandle, JobStatus, PollPolicy};
use aipg_core::params::GenerationParameters;
use aipg_core::result::BackendId;
use async_trait::async_trait;

use crate::api::GridApi;
use crate::request::GridRequest;

/// Default remote polling: every 3 s, up to 60 checks.
pub const DEFAULT_POLL_POLICY: PollPolicy = PollPolicy::new(Duration::from_millis(3000), 60);

pub struct GridBackend {
    api: GridApi,
    /// Pin jobs to a single worker when set.
    worker: Option<String>,
    policy: PollPolicy,
}

impl GridBackend {
    pub fn new(api: GridApi) -> Self {
        Self {
            api,
            worker: None,
            policy: DEFAULT_POLL_POLICY,
        }
    }

    pub fn with_worker(mut self, worker: Option<String>) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn request_for(&self, params: &GenerationParameters) -> GridRequest {
        GridRequest::from_params(params, self.worker.as_deref())
    }
}

#[async_trait]
impl GenerationBackend for GridBackend {
    fn id(&self) -> BackendId {
        BackendId::Grid
    }

    fn poll_policy(&self) -> PollPolicy {
        self.policy
    }

    async fn submit(&self, params: &GenerationParameters) -> Result<JobHandle, BackendError> {
        let request = self.request_for(params);
        let body = serde_json::to_value(&request)
            .map_err(|e| BackendError::Materialize(e.to_string()))?;

        let job_id = self
            .api
            .submit(&request)
            .await
            .map_err(|e| BackendError::Submission(e.to_string()))?;

        tracing::info!(
            job_id = %job_id,
            worker = self.worker.as_deref().unwrap_or("any"),
            seed = params.seed,
            "Submitted job to grid",
        );

        Ok(JobHandle {
            id: job_id,
            request: body,
        })
    }

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, BackendError> {
        let status = self
            .api
            .status(&job.id)
            .await
            .map_err(|e| BackendError::Poll(e.to_string()))?;

        tracing::debug!(
            job_id = %job.id,
            phase = status.phase(),
            queue_position = status.queue_position,
            "Grid job status",
        );

        Ok(status.job_status())
    }
}
