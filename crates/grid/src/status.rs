//! Typed grid responses.

use aipg_core::backend::JobStatus;
use aipg_core::result::Artifact;
use serde::Deserialize;

/// Response of `POST /v2/generate/async`.
///
/// The grid answers some rejections with a 2xx and no `id`, so both fields
/// are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `GET /v2/generate/status/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GridStatus {
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub faulted: bool,
    #[serde(default)]
    pub processing: u32,
    #[serde(default)]
    pub waiting: u32,
    #[serde(default)]
    pub queue_position: u32,
    #[serde(default)]
    pub generations: Vec<Generation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Generation {
    /// Image URL or base64 payload.
    pub img: String,
    #[serde(default)]
    pub seed: Option<String>,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub worker_name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl GridStatus {
    /// Map the grid's flags onto a [`JobStatus`]. `faulted` wins over `done`.
    ///
    /// `done` with an empty `generations` list still maps to `Succeeded`,
    /// which the poll loop settles as a no-artifacts failure. Grid clients
    /// that keep polling until images appear behave differently here.
    pub fn job_status(&self) -> JobStatus {
        if self.faulted {
            JobStatus::Faulted {
                reason: "Grid reported the job as faulted".to_string(),
            }
        } else if self.done {
            JobStatus::Succeeded {
                artifacts: self
                    .generations
                    .iter()
                    .map(|g| Artifact::Remote { img: g.img.clone() })
                    .collect(),
            }
        } else {
            JobStatus::Pending
        }
    }

    /// Short human-readable queue state for logging.
    pub fn phase(&self) -> &'static str {
        if self.done {
            "done"
        } else if self.processing > 0 {
            "processing"
        } else {
            "waiting"
        }
    }
}
