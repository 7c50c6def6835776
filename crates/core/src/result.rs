//! Per-backend generation outcomes and the combined comparison record.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::types::Seed;

/// Identifies which generation backend produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendId {
    /// Local node-graph generator (ComfyUI).
    #[serde(rename = "comfyui")]
    ComfyUI,
    /// Remote generation grid (AI Horde v2 API).
    #[serde(rename = "grid")]
    Grid,
}

impl BackendId {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendId::ComfyUI => "comfyui",
            BackendId::Grid => "grid",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a generated image can be fetched from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    /// A file in the local backend's output store, fetched via `/view`.
    File {
        filename: String,
        subfolder: String,
        folder_type: String,
    },
    /// An image reference returned by the remote backend (URL or inline data).
    Remote { img: String },
}

/// Why a backend flow ended without an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Submission was rejected or its response was malformed.
    Submission,
    /// The backend reported the job as failed.
    Faulted,
    /// The polling attempt budget ran out.
    Timeout,
    /// The job finished but produced no images.
    NoArtifacts,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Submission => "submission",
            FailureKind::Faulted => "faulted",
            FailureKind::Timeout => "timeout",
            FailureKind::NoArtifacts => "no_artifacts",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of one backend's flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationResult {
    Success {
        backend: BackendId,
        job_id: String,
        artifacts: Vec<Artifact>,
        /// The exact request body sent to the backend.
        raw_params: serde_json::Value,
    },
    Failure {
        backend: BackendId,
        kind: FailureKind,
        reason: String,
    },
}

impl GenerationResult {
    pub fn failure(backend: BackendId, kind: FailureKind, reason: impl Into<String>) -> Self {
        GenerationResult::Failure {
            backend,
            kind,
            reason: reason.into(),
        }
    }

    pub fn timeout(backend: BackendId) -> Self {
        Self::failure(backend, FailureKind::Timeout, "timeout")
    }

    pub fn backend(&self) -> BackendId {
        match self {
            GenerationResult::Success { backend, .. } | GenerationResult::Failure { backend, .. } => {
                *backend
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GenerationResult::Success { .. })
    }

    /// First artifact of a successful result.
    pub fn primary_artifact(&self) -> Option<&Artifact> {
        match self {
            GenerationResult::Success { artifacts, .. } => artifacts.first(),
            GenerationResult::Failure { .. } => None,
        }
    }
}

/// Both backends' outcomes for one canonical parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub recipe_fingerprint: Fingerprint,
    pub render_fingerprint: Fingerprint,
    pub seed: Seed,
    pub local: GenerationResult,
    pub remote: GenerationResult,
    pub both_succeeded: bool,
}

impl ComparisonRecord {
    pub fn new(
        recipe_fingerprint: Fingerprint,
        render_fingerprint: Fingerprint,
        seed: Seed,
        local: GenerationResult,
        remote: GenerationResult,
    ) -> Self {
        let both_succeeded = local.is_success() && remote.is_success();
        Self {
            recipe_fingerprint,
            render_fingerprint,
            seed,
            local,
            remote,
            both_succeeded,
        }
    }
}
