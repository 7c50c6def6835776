//! Typed parsing of ComfyUI `/history/{prompt_id}` responses.
//!
//! The endpoint returns `{}` while a prompt is queued or running, and
//! `{"<prompt_id>": {"status": {...}, "outputs": {...}}}` once it has
//! finished. Completion is read from `status.status_str` when present,
//! otherwise from the presence of image outputs.

use std::collections::BTreeMap;

use aipg_core::backend::JobStatus;
use aipg_core::result::Artifact;
use serde::Deserialize;

/// `status_str` value for a completed prompt.
const STATUS_SUCCESS: &str = "success";
/// `status_str` value for a failed prompt.
const STATUS_ERROR: &str = "error";
/// Message kind carrying the failing node's exception.
const EXECUTION_ERROR_MESSAGE: &str = "execution_error";

/// One prompt's entry in the history response.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: Option<HistoryStatus>,
    /// Outputs keyed by node id.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// `[kind, payload]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<(String, serde_json::Value)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// Reference to an image in ComfyUI's output store.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_folder_type")]
    pub folder_type: String,
}

fn default_folder_type() -> String {
    "output".to_string()
}

impl From<ImageRef> for Artifact {
    fn from(image: ImageRef) -> Self {
        Artifact::File {
            filename: image.filename,
            subfolder: image.subfolder,
            folder_type: image.folder_type,
        }
    }
}

impl HistoryEntry {
    /// All images across output nodes, in node id order.
    pub fn images(&self) -> Vec<ImageRef> {
        self.outputs
            .values()
            .flat_map(|output| output.images.iter().cloned())
            .collect()
    }

    /// Interpret the entry as a job status.
    pub fn job_status(&self) -> JobStatus {
        let status_str = self.status.as_ref().and_then(|s| s.status_str.as_deref());
        match status_str {
            Some(STATUS_ERROR) => JobStatus::Faulted {
                reason: self.error_message(),
            },
            Some(STATUS_SUCCESS) => JobStatus::Succeeded {
                artifacts: self.images().into_iter().map(Artifact::from).collect(),
            },
            _ => {
                let images = self.images();
                if images.is_empty() {
                    JobStatus::Pending
                } else {
                    JobStatus::Succeeded {
                        artifacts: images.into_iter().map(Artifact::from).collect(),
                    }
                }
            }
        }
    }

    fn error_message(&self) -> String {
        self.status
            .as_ref()
            .and_then(|status| {
                status
                    .messages
                    .iter()
                    .find(|(kind, _)| kind == EXECUTION_ERROR_MESSAGE)
                    .map(|(_, payload)| {
                        let node = payload["node_id"].as_str().unwrap_or("?");
                        let message = payload["exception_message"]
                            .as_str()
                            .unwrap_or("unknown error")
                            .trim();
                        format!("node {node}: {message}")
                    })
            })
            .unwrap_or_else(|| "ComfyUI reported an execution error".to_string())
    }
}

/// Extract the status of `prompt_id` from a raw history response.
///
/// A missing entry means the prompt has not finished yet.
pub fn parse_history(
    prompt_id: &str,
    history: &serde_json::Value,
) -> Result<JobStatus, serde_json::Error> {
    match history.get(prompt_id) {
        None => Ok(JobStatus::Pending),
        Some(entry) => {
            let entry: HistoryEntry = serde_json::from_value(entry.clone())?;
            Ok(entry.job_status())
        }
    }
}
