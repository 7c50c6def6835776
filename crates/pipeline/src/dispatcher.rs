//! Fan-out of one canonical parameter set to both backends.

use std::sync::Arc;

use aipg_core::backend::GenerationBackend;
use aipg_core::error::CoreError;
use aipg_core::fingerprint::Fingerprinter;
use aipg_core::params::GenerationParameters;
use aipg_core::result::ComparisonRecord;
use aipg_core::types::Timestamp;

use crate::polling::{run_backend, Sleeper, TokioSleeper};

/// Runs the local and remote flows concurrently for one request.
///
/// The two flows share nothing. A failure in one is recorded in its own
/// result and never cancels or delays the other.
pub struct Dispatcher {
    local: Arc<dyn GenerationBackend>,
    remote: Arc<dyn GenerationBackend>,
    fingerprinter: Fingerprinter,
    sleeper: Arc<dyn Sleeper>,
}

impl Dispatcher {
    pub fn new(
        local: Arc<dyn GenerationBackend>,
        remote: Arc<dyn GenerationBackend>,
        fingerprinter: Fingerprinter,
    ) -> Self {
        Self {
            local,
            remote,
            fingerprinter,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    /// Fingerprint `params`, then generate on both backends.
    ///
    /// Only fingerprinting can fail; it happens before anything is
    /// submitted. Backend outcomes are always values in the record.
    pub async fn dispatch(
        &self,
        params: &GenerationParameters,
        rendered_at: Timestamp,
    ) -> Result<ComparisonRecord, CoreError> {
        let recipe_fingerprint = self.fingerprinter.recipe_fingerprint(params)?;
        let render_fingerprint = self.fingerprinter.render_fingerprint(params, &rendered_at)?;

        tracing::info!(
            seed = params.seed,
            recipe = %recipe_fingerprint,
            render = %render_fingerprint,
            local = %self.local.id(),
            remote = %self.remote.id(),
            "Dispatching to both backends",
        );

        let (local, remote) = tokio::join!(
            run_backend(self.local.as_ref(), params, self.sleeper.as_ref()),
            run_backend(self.remote.as_ref(), params, self.sleeper.as_ref()),
        );

        let record = ComparisonRecord::new(
            recipe_fingerprint,
            render_fingerprint,
            params.seed,
            local,
            remote,
        );

        tracing::info!(
            both_succeeded = record.both_succeeded,
            local_success = record.local.is_success(),
            remote_success = record.remote.is_success(),
            "Dispatch complete",
        );

        Ok(record)
    }
}
