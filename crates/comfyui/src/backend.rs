//! [`GenerationBackend`] implementation for a local ComfyUI instance.

use std::time::Duration;

use aipg_core::backend::{BackendError, GenerationBackend, JobHandle, JobStatus, PollPolicy};
use aipg_core::params::GenerationParameters;
use aipg_core::result::BackendId;
use async_trait::async_trait;

use crate::api::ComfyUIApi;
use crate::history::parse_history;
use crate::workflow::WorkflowTemplate;

/// Default local polling: every 2 s, up to 30 checks.
pub const DEFAULT_POLL_POLICY: PollPolicy = PollPolicy::new(Duration::from_millis(2000), 30);

pub struct ComfyUIBackend {
    api: ComfyUIApi,
    template: WorkflowTemplate,
    policy: PollPolicy,
}

impl ComfyUIBackend {
    pub fn new(api: ComfyUIApi, template: WorkflowTemplate) -> Self {
        Self {
            api,
            template,
            policy: DEFAULT_POLL_POLICY,
        }
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    pub fn template(&self) -> &WorkflowTemplate {
        &self.template
    }
}

#[async_trait]
impl GenerationBackend for ComfyUIBackend {
    fn id(&self) -> BackendId {
        BackendId::ComfyUI
    }

    fn poll_policy(&self) -> PollPolicy {
        self.policy
    }

    async fn submit(&self, params: &GenerationParameters) -> Result<JobHandle, BackendError> {
        let workflow = self.template.materialize(params);
        let client_id = uuid::Uuid::new_v4().to_string();

        let response = self
            .api
            .submit_workflow(&workflow, &client_id)
            .await
            .map_err(|e| BackendError::Submission(e.to_string()))?;

        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            seed = params.seed,
            "Submitted workflow to ComfyUI",
        );

        Ok(JobHandle {
            id: response.prompt_id,
            request: workflow,
        })
    }

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, BackendError> {
        let history = self
            .api
            .get_history(&job.id)
            .await
            .map_err(|e| BackendError::Poll(e.to_string()))?;

        parse_history(&job.id, &history).map_err(|e| {
            BackendError::Poll(format!("Malformed history for {}: {e}", job.id))
        })
    }
}
