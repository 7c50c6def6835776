//! `aipg-generate` -- run one recipe on the local and remote backends.
//!
//! Normalizes the configured parameters against the pinned FLUX KREA
//! recipe, fingerprints them, generates on ComfyUI and the grid
//! concurrently, downloads whatever images were produced, and writes a
//! `generation-comparison-<timestamp>.json` summary into `OUTPUT_DIR`.
//!
//! See [`GenerateConfig::from_env`] for the environment variables.

use std::path::Path;
use std::sync::Arc;

use aipg_cli::config::GenerateConfig;
use aipg_cli::{report, telemetry};
use aipg_comfyui::api::ComfyUIApi;
use aipg_comfyui::backend::ComfyUIBackend;
use aipg_comfyui::workflow::{ModelFiles, WorkflowTemplate};
use aipg_core::fingerprint::Fingerprinter;
use aipg_core::params::normalize;
use aipg_core::reconcile::{reconcile, ComparisonSummary};
use aipg_core::result::{Artifact, GenerationResult};
use aipg_grid::api::GridApi;
use aipg_grid::backend::GridBackend;
use aipg_pipeline::dispatcher::Dispatcher;
use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();

    let config = GenerateConfig::from_env()?;
    tracing::info!(
        comfyui_url = %config.comfyui_url,
        grid_api_url = %config.grid_api_url,
        hash_algorithm = %config.hash_algorithm,
        "Loaded configuration",
    );

    // --- Parameters ---
    let params = normalize(
        &config.forced_params(),
        &config.variable_params(|| u64::from(rand::random::<u32>())),
        None,
    )?;
    let fingerprinter = Fingerprinter::new(config.hash_algorithm);

    // --- Backends ---
    let template_json = std::fs::read_to_string(&config.template_path)
        .with_context(|| format!("reading template {}", config.template_path.display()))?;
    let template = WorkflowTemplate::discover(serde_json::from_str(&template_json)?, ModelFiles::default())?;

    let http = reqwest::Client::new();
    let comfyui = Arc::new(
        ComfyUIBackend::new(
            ComfyUIApi::with_client(http.clone(), config.comfyui_url.clone()),
            template,
        )
        .with_poll_policy(config.local_poll),
    );
    let grid = Arc::new(
        GridBackend::new(GridApi::with_client(
            http.clone(),
            config.grid_api_url.clone(),
            config.grid_api_key.clone(),
            &config.grid_client_agent,
        )?)
        .with_worker(config.grid_worker.clone())
        .with_poll_policy(config.remote_poll),
    );

    // --- Dispatch ---
    let started_at = chrono::Utc::now();
    let dispatcher = Dispatcher::new(comfyui.clone(), grid, fingerprinter);
    let record = dispatcher.dispatch(&params, started_at).await?;

    let mut summary = ComparisonSummary::from_record(&record, started_at);
    if let Some(stored) = config.stored_recipe_root {
        let reconciliation = reconcile(&stored, &record.recipe_fingerprint);
        if reconciliation.is_match() {
            tracing::info!(root = %stored, "Stored recipe root matches");
        } else {
            tracing::warn!(
                stored = %stored,
                recomputed = %record.recipe_fingerprint,
                "Stored recipe root does not match recomputed fingerprint",
            );
        }
        summary = summary.with_reconciliation(reconciliation);
    }

    // --- Output ---
    for result in [&record.local, &record.remote] {
        match result {
            GenerationResult::Success { backend, .. } => {
                if let Err(e) =
                    save_primary_image(&config.output_dir, result, params.seed, &comfyui, &http).await
                {
                    tracing::warn!(backend = %backend, error = %e, "Could not save image");
                }
            }
            GenerationResult::Failure { backend, kind, reason } => {
                tracing::warn!(backend = %backend, kind = %kind, reason = %reason, "Backend failed");
            }
        }
    }

    let path = report::write_summary(&config.output_dir, &summary)?;
    tracing::info!(
        path = %path.display(),
        recipe = %record.recipe_fingerprint,
        render = %record.render_fingerprint,
        both_succeeded = record.both_succeeded,
        "Wrote comparison summary",
    );

    Ok(())
}

/// Download the first artifact of a successful result into `dir`.
async fn save_primary_image(
    dir: &Path,
    result: &GenerationResult,
    seed: u64,
    comfyui: &ComfyUIBackend,
    http: &reqwest::Client,
) -> anyhow::Result<()> {
    let Some(artifact) = result.primary_artifact() else {
        return Ok(());
    };

    let (bytes, extension) = match artifact {
        Artifact::File {
            filename,
            subfolder,
            folder_type,
        } => {
            let bytes = comfyui
                .api()
                .download_image(filename, subfolder, folder_type)
                .await?;
            (bytes, report::extension_of(filename))
        }
        Artifact::Remote { img } if img.starts_with("http://") || img.starts_with("https://") => {
            let bytes = http
                .get(img.as_str())
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?
                .to_vec();
            (bytes, report::extension_of(img))
        }
        Artifact::Remote { .. } => {
            tracing::info!("Remote image is inline data, not downloading");
            return Ok(());
        }
    };

    let name = report::image_file_name(result.backend(), seed, extension);
    let path = report::write_image(dir, &name, &bytes)?;
    tracing::info!(backend = %result.backend(), path = %path.display(), "Saved image");
    Ok(())
}
