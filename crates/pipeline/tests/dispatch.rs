//! Integration tests for the polling loop and the dual-backend dispatcher,
//! driven by scripted fake backends and a sleeper that only records.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aipg_core::backend::{BackendError, GenerationBackend, JobHandle, JobStatus, PollPolicy};
use aipg_core::fingerprint::Fingerprinter;
use aipg_core::params::{normalize, GenerationParameters, PartialParams};
use aipg_core::result::{Artifact, BackendId, FailureKind, GenerationResult};
use aipg_pipeline::dispatcher::Dispatcher;
use aipg_pipeline::polling::{run_backend, Sleeper, NO_ARTIFACTS_REASON};
use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::TimeZone;
use serde_json::json;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Records every requested sleep instead of waiting.
#[derive(Default)]
struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Backend answering polls from a script; `Pending` once the script runs out.
struct FakeBackend {
    id: BackendId,
    policy: PollPolicy,
    submit_error: Option<String>,
    /// Submission blocks until this is notified.
    waits_on: Option<Arc<Notify>>,
    /// Notified once submission starts.
    signals: Option<Arc<Notify>>,
    script: Mutex<VecDeque<Result<JobStatus, BackendError>>>,
    polls: Mutex<u32>,
}

impl FakeBackend {
    fn new(id: BackendId, attempts: u32) -> Self {
        Self {
            id,
            policy: PollPolicy::new(Duration::from_millis(100), attempts),
            submit_error: None,
            waits_on: None,
            signals: None,
            script: Mutex::new(VecDeque::new()),
            polls: Mutex::new(0),
        }
    }

    fn rejecting(mut self, message: &str) -> Self {
        self.submit_error = Some(message.to_string());
        self
    }

    fn waiting_on(mut self, notify: Arc<Notify>) -> Self {
        self.waits_on = Some(notify);
        self
    }

    fn signalling(mut self, notify: Arc<Notify>) -> Self {
        self.signals = Some(notify);
        self
    }

    fn then(self, status: Result<JobStatus, BackendError>) -> Self {
        self.script.lock().unwrap().push_back(status);
        self
    }

    fn polls(&self) -> u32 {
        *self.polls.lock().unwrap()
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn poll_policy(&self) -> PollPolicy {
        self.policy
    }

    async fn submit(&self, params: &GenerationParameters) -> Result<JobHandle, BackendError> {
        if let Some(notify) = &self.signals {
            notify.notify_one();
        }
        if let Some(notify) = &self.waits_on {
            notify.notified().await;
        }
        if let Some(message) = &self.submit_error {
            return Err(BackendError::Submission(message.clone()));
        }
        Ok(JobHandle {
            id: format!("{}-job", self.id),
            request: json!({"seed": params.seed}),
        })
    }

    async fn poll(&self, _job: &JobHandle) -> Result<JobStatus, BackendError> {
        *self.polls.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(JobStatus::Pending))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn params() -> GenerationParameters {
    let forced = PartialParams {
        steps: Some(20),
        cfg_scale: Some(1.0),
        sampler: Some("euler".into()),
        scheduler: Some("simple".into()),
        model: Some("flux.1-krea-dev".into()),
        ..Default::default()
    };
    let variable = PartialParams {
        seed: Some(123_456_789),
        prompt: Some("test".into()),
        ..Default::default()
    };
    normalize(&forced, &variable, None).unwrap()
}

fn image(name: &str) -> Vec<Artifact> {
    vec![Artifact::File {
        filename: name.into(),
        subfolder: String::new(),
        folder_type: "output".into(),
    }]
}

fn remote_image() -> Vec<Artifact> {
    vec![Artifact::Remote {
        img: "https://grid.example/img.webp".into(),
    }]
}

fn dispatcher(local: Arc<FakeBackend>, remote: Arc<FakeBackend>, sleeper: Arc<RecordingSleeper>) -> Dispatcher {
    Dispatcher::new(local, remote, Fingerprinter::default()).with_sleeper(sleeper)
}

fn rendered_at() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Polling loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_then_success_sleeps_between_attempts() {
    let backend = FakeBackend::new(BackendId::ComfyUI, 5)
        .then(Ok(JobStatus::Pending))
        .then(Ok(JobStatus::Pending))
        .then(Ok(JobStatus::Succeeded { artifacts: image("a.png") }));
    let sleeper = RecordingSleeper::default();

    let result = run_backend(&backend, &params(), &sleeper).await;

    assert_matches!(
        &result,
        GenerationResult::Success { backend: BackendId::ComfyUI, job_id, artifacts, raw_params }
            if job_id == "comfyui-job" && artifacts.len() == 1 && raw_params["seed"] == 123_456_789
    );
    assert_eq!(backend.polls(), 3);
    assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(100); 2]);
}

#[tokio::test]
async fn exhausted_budget_is_a_timeout() {
    let backend = FakeBackend::new(BackendId::Grid, 4);
    let sleeper = RecordingSleeper::default();

    let result = run_backend(&backend, &params(), &sleeper).await;

    assert_eq!(result, GenerationResult::timeout(BackendId::Grid));
    assert_matches!(
        &result,
        GenerationResult::Failure { kind: FailureKind::Timeout, reason, .. } if reason == "timeout"
    );
    assert_eq!(backend.polls(), 4);
    // No sleep after the final attempt.
    assert_eq!(sleeper.sleeps().len(), 3);
}

#[tokio::test]
async fn transient_poll_errors_are_retried() {
    let backend = FakeBackend::new(BackendId::Grid, 5)
        .then(Err(BackendError::Poll("connection reset".into())))
        .then(Err(BackendError::Poll("502 bad gateway".into())))
        .then(Ok(JobStatus::Succeeded { artifacts: remote_image() }));
    let sleeper = RecordingSleeper::default();

    let result = run_backend(&backend, &params(), &sleeper).await;

    assert!(result.is_success());
    assert_eq!(backend.polls(), 3);
}

#[tokio::test]
async fn poll_errors_count_against_the_budget() {
    let backend = FakeBackend::new(BackendId::ComfyUI, 2)
        .then(Err(BackendError::Poll("down".into())))
        .then(Err(BackendError::Poll("down".into())))
        .then(Ok(JobStatus::Succeeded { artifacts: image("late.png") }));
    let sleeper = RecordingSleeper::default();

    let result = run_backend(&backend, &params(), &sleeper).await;

    assert_eq!(result, GenerationResult::timeout(BackendId::ComfyUI));
    assert_eq!(backend.polls(), 2);
}

#[tokio::test]
async fn faulted_job_stops_polling() {
    let backend = FakeBackend::new(BackendId::Grid, 10)
        .then(Ok(JobStatus::Pending))
        .then(Ok(JobStatus::Faulted { reason: "worker crashed".into() }));
    let sleeper = RecordingSleeper::default();

    let result = run_backend(&backend, &params(), &sleeper).await;

    assert_eq!(
        result,
        GenerationResult::failure(BackendId::Grid, FailureKind::Faulted, "worker crashed")
    );
    assert_eq!(backend.polls(), 2);
}

#[tokio::test]
async fn success_without_images_is_a_failure() {
    let backend = FakeBackend::new(BackendId::Grid, 3)
        .then(Ok(JobStatus::Succeeded { artifacts: vec![] }));
    let sleeper = RecordingSleeper::default();

    let result = run_backend(&backend, &params(), &sleeper).await;

    assert_eq!(
        result,
        GenerationResult::failure(BackendId::Grid, FailureKind::NoArtifacts, NO_ARTIFACTS_REASON)
    );
}

#[tokio::test]
async fn rejected_submission_never_polls() {
    let backend = FakeBackend::new(BackendId::Grid, 3).rejecting("invalid api key");
    let sleeper = RecordingSleeper::default();

    let result = run_backend(&backend, &params(), &sleeper).await;

    assert_matches!(
        &result,
        GenerationResult::Failure { kind: FailureKind::Submission, reason, .. }
            if reason.contains("invalid api key")
    );
    assert_eq!(backend.polls(), 0);
    assert!(sleeper.sleeps().is_empty());
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[tokio::test]
async fn both_backends_succeed() {
    let local = Arc::new(
        FakeBackend::new(BackendId::ComfyUI, 3)
            .then(Ok(JobStatus::Succeeded { artifacts: image("a.png") })),
    );
    let remote = Arc::new(
        FakeBackend::new(BackendId::Grid, 3).then(Ok(JobStatus::Succeeded { artifacts: remote_image() })),
    );
    let sleeper = Arc::new(RecordingSleeper::default());

    let record = dispatcher(local, remote, sleeper)
        .dispatch(&params(), rendered_at())
        .await
        .unwrap();

    assert!(record.both_succeeded);
    assert_eq!(record.seed, 123_456_789);
    assert_eq!(record.local.backend(), BackendId::ComfyUI);
    assert_eq!(record.remote.backend(), BackendId::Grid);
}

#[tokio::test]
async fn remote_submission_failure_leaves_local_success() {
    let local = Arc::new(
        FakeBackend::new(BackendId::ComfyUI, 3)
            .then(Ok(JobStatus::Pending))
            .then(Ok(JobStatus::Succeeded { artifacts: image("a.png") })),
    );
    let remote = Arc::new(FakeBackend::new(BackendId::Grid, 3).rejecting("503 maintenance"));
    let sleeper = Arc::new(RecordingSleeper::default());

    let record = dispatcher(local.clone(), remote.clone(), sleeper)
        .dispatch(&params(), rendered_at())
        .await
        .unwrap();

    assert!(record.local.is_success());
    assert_matches!(
        record.remote,
        GenerationResult::Failure { kind: FailureKind::Submission, .. }
    );
    assert!(!record.both_succeeded);
    assert_eq!(local.polls(), 2);
    assert_eq!(remote.polls(), 0);
}

#[tokio::test]
async fn local_timeout_leaves_remote_success() {
    let local = Arc::new(FakeBackend::new(BackendId::ComfyUI, 2));
    let remote = Arc::new(
        FakeBackend::new(BackendId::Grid, 6)
            .then(Ok(JobStatus::Pending))
            .then(Ok(JobStatus::Pending))
            .then(Ok(JobStatus::Pending))
            .then(Ok(JobStatus::Succeeded { artifacts: remote_image() })),
    );
    let sleeper = Arc::new(RecordingSleeper::default());

    let record = dispatcher(local, remote, sleeper)
        .dispatch(&params(), rendered_at())
        .await
        .unwrap();

    assert_eq!(record.local, GenerationResult::timeout(BackendId::ComfyUI));
    assert!(record.remote.is_success());
    assert!(!record.both_succeeded);
}

#[tokio::test]
async fn record_carries_recomputable_fingerprints() {
    let local = Arc::new(FakeBackend::new(BackendId::ComfyUI, 1));
    let remote = Arc::new(FakeBackend::new(BackendId::Grid, 1));
    let sleeper = Arc::new(RecordingSleeper::default());
    let params = params();

    let record = dispatcher(local, remote, sleeper)
        .dispatch(&params, rendered_at())
        .await
        .unwrap();

    let fingerprinter = Fingerprinter::default();
    assert_eq!(
        record.recipe_fingerprint,
        fingerprinter.recipe_fingerprint(&params).unwrap()
    );
    assert_eq!(
        record.render_fingerprint,
        fingerprinter.render_fingerprint(&params, &rendered_at()).unwrap()
    );
}

#[tokio::test]
async fn both_flows_run_concurrently() {
    // Local submission only completes once remote submission has started,
    // so running the flows one after the other would never finish.
    let gate = Arc::new(Notify::new());
    let local = Arc::new(
        FakeBackend::new(BackendId::ComfyUI, 2)
            .waiting_on(gate.clone())
            .then(Ok(JobStatus::Succeeded { artifacts: image("a.png") })),
    );
    let remote = Arc::new(
        FakeBackend::new(BackendId::Grid, 2)
            .signalling(gate)
            .then(Ok(JobStatus::Succeeded { artifacts: remote_image() })),
    );
    let sleeper = Arc::new(RecordingSleeper::default());

    let record = tokio::time::timeout(
        Duration::from_secs(5),
        dispatcher(local, remote, sleeper).dispatch(&params(), rendered_at()),
    )
    .await
    .expect("local and remote flows did not overlap")
    .unwrap();

    assert!(record.both_succeeded);
}
