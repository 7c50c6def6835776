//! Reconciliation of stored and recomputed fingerprints, and the
//! persistable summary of a comparison run.
//!
//! A mismatch is meaningful output (the artifact is not reproducible from
//! its recorded parameters), so it is returned as a value, never an error.

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::result::{ComparisonRecord, GenerationResult};
use crate::types::{Seed, Timestamp};

/// Outcome of comparing a stored fingerprint with a recomputed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Reconciliation {
    Match,
    Mismatch {
        stored: Fingerprint,
        recomputed: Fingerprint,
    },
}

impl Reconciliation {
    pub fn is_match(&self) -> bool {
        matches!(self, Reconciliation::Match)
    }
}

pub fn reconcile(stored: &Fingerprint, recomputed: &Fingerprint) -> Reconciliation {
    if stored == recomputed {
        Reconciliation::Match
    } else {
        Reconciliation::Mismatch {
            stored: *stored,
            recomputed: *recomputed,
        }
    }
}

/// Success flags for a comparison run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryFlags {
    pub both_succeeded: bool,
    pub local_success: bool,
    pub remote_success: bool,
}

/// Serializable record of one dual-backend run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub generated_at: Timestamp,
    pub seed: Seed,
    pub recipe_fingerprint: Fingerprint,
    pub render_fingerprint: Fingerprint,
    pub local: GenerationResult,
    pub remote: GenerationResult,
    pub summary: SummaryFlags,
    /// Present when a stored recipe root was checked during the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_reconciliation: Option<Reconciliation>,
}

impl ComparisonSummary {
    pub fn from_record(record: &ComparisonRecord, generated_at: Timestamp) -> Self {
        Self {
            generated_at,
            seed: record.seed,
            recipe_fingerprint: record.recipe_fingerprint,
            render_fingerprint: record.render_fingerprint,
            local: record.local.clone(),
            remote: record.remote.clone(),
            summary: SummaryFlags {
                both_succeeded: record.both_succeeded,
                local_success: record.local.is_success(),
                remote_success: record.remote.is_success(),
            },
            recipe_reconciliation: None,
        }
    }

    pub fn with_reconciliation(mut self, reconciliation: Reconciliation) -> Self {
        self.recipe_reconciliation = Some(reconciliation);
        self
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::result::{BackendId, FailureKind};

    #[test]
    fn identical_fingerprints_match() {
        let h = Fingerprint::from_bytes([7; 32]);
        assert_eq!(reconcile(&h, &h), Reconciliation::Match);
    }

    #[test]
    fn different_fingerprints_mismatch() {
        let h = Fingerprint::from_bytes([7; 32]);
        let other = Fingerprint::from_bytes([8; 32]);
        let outcome = reconcile(&h, &other);
        assert!(!outcome.is_match());
        assert_eq!(
            outcome,
            Reconciliation::Mismatch {
                stored: h,
                recomputed: other
            }
        );
    }

    #[test]
    fn summary_flags_follow_record() {
        let fp = Fingerprint::from_bytes([3; 32]);
        let record = ComparisonRecord::new(
            fp,
            fp,
            42,
            GenerationResult::Success {
                backend: BackendId::ComfyUI,
                job_id: "p-1".into(),
                artifacts: vec![],
                raw_params: serde_json::json!({"31": {}}),
            },
            GenerationResult::failure(BackendId::Grid, FailureKind::Submission, "HTTP 401"),
        );
        let at = chrono::Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let summary = ComparisonSummary::from_record(&record, at);

        assert!(summary.summary.local_success);
        assert!(!summary.summary.remote_success);
        assert!(!summary.summary.both_succeeded);

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["seed"], 42);
        assert!(value.get("recipe_reconciliation").is_none());

        let value = serde_json::to_value(summary.with_reconciliation(Reconciliation::Match)).unwrap();
        assert_eq!(value["recipe_reconciliation"]["outcome"], "match");
    }
}
