//! Submit-then-poll flow for a single backend.
//!
//! The loop checks job status at the backend's fixed interval until the job
//! settles or the attempt budget runs out. Poll errors are transient and
//! consume an attempt. Waiting goes through a [`Sleeper`] so tests can
//! observe the schedule without wall-clock delays.

use std::time::Duration;

use aipg_core::backend::{GenerationBackend, JobHandle, JobStatus};
use aipg_core::params::GenerationParameters;
use aipg_core::result::{FailureKind, GenerationResult};
use async_trait::async_trait;

/// Reason recorded when a job finishes without producing images.
pub const NO_ARTIFACTS_REASON: &str = "No images generated";

/// Suspends the current task between poll attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Submit `params` to `backend` and poll until a terminal result.
///
/// Never fails: every outcome, including a rejected submission, is a
/// [`GenerationResult`].
pub async fn run_backend(
    backend: &dyn GenerationBackend,
    params: &GenerationParameters,
    sleeper: &dyn Sleeper,
) -> GenerationResult {
    let id = backend.id();

    let job = match backend.submit(params).await {
        Ok(job) => job,
        Err(e) => {
            tracing::warn!(backend = %id, error = %e, "Submission failed");
            return GenerationResult::failure(id, FailureKind::Submission, e.to_string());
        }
    };

    poll_until_settled(backend, job, sleeper).await
}

/// Poll a submitted job within the backend's [`PollPolicy`] budget.
///
/// No sleep follows the final attempt.
///
/// [`PollPolicy`]: aipg_core::backend::PollPolicy
pub async fn poll_until_settled(
    backend: &dyn GenerationBackend,
    job: JobHandle,
    sleeper: &dyn Sleeper,
) -> GenerationResult {
    let id = backend.id();
    let policy = backend.poll_policy();

    for attempt in 1..=policy.max_attempts {
        let status = backend.poll(&job).await;
        match status {
            Ok(JobStatus::Pending) => {
                tracing::debug!(backend = %id, job_id = %job.id, attempt, "Job still pending");
            }
            Ok(JobStatus::Succeeded { artifacts }) if artifacts.is_empty() => {
                tracing::warn!(
                    backend = %id,
                    job_id = %job.id,
                    attempt,
                    "Job reported done without images, not polling further",
                );
                return GenerationResult::failure(id, FailureKind::NoArtifacts, NO_ARTIFACTS_REASON);
            }
            Ok(JobStatus::Succeeded { artifacts }) => {
                tracing::info!(
                    backend = %id,
                    job_id = %job.id,
                    attempt,
                    artifacts = artifacts.len(),
                    "Job succeeded",
                );
                return GenerationResult::Success {
                    backend: id,
                    job_id: job.id,
                    artifacts,
                    raw_params: job.request,
                };
            }
            Ok(JobStatus::Faulted { reason }) => {
                tracing::warn!(backend = %id, job_id = %job.id, reason = %reason, "Job faulted");
                return GenerationResult::failure(id, FailureKind::Faulted, reason);
            }
            Err(e) => {
                tracing::warn!(
                    backend = %id,
                    job_id = %job.id,
                    attempt,
                    error = %e,
                    "Status check failed, retrying",
                );
            }
        }

        if attempt < policy.max_attempts {
            sleeper.sleep(policy.interval).await;
        }
    }

    tracing::warn!(
        backend = %id,
        job_id = %job.id,
        attempts = policy.max_attempts,
        "Polling budget exhausted",
    );
    GenerationResult::timeout(id)
}
