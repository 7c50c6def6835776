//! `aipg-verify` -- check that a stored recipe blob reproduces its root.
//!
//! Reads the blob at `RECIPE_PATH` (raw bytes, or `0x`-hex text), undoes
//! `RECIPE_COMPRESSION`, fingerprints the decoded workflow and compares the
//! result with `RECIPE_ROOT`. Exits non-zero on a mismatch. Blobs larger than
//! `RECIPE_MAX_BYTES` are refused before decoding.
//!
//! The recipe parameters recoverable from the workflow graph are logged
//! alongside, so a drifted recipe can be diagnosed without opening it.

use std::process::ExitCode;

use aipg_cli::config::VerifyConfig;
use aipg_cli::telemetry;
use aipg_comfyui::workflow::{ModelFiles, WorkflowTemplate};
use aipg_core::fingerprint::Fingerprinter;
use aipg_core::recipe::{recipe_root, RecipeBlob};
use aipg_core::reconcile::Reconciliation;
use anyhow::Context;

fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    telemetry::init();

    let config = VerifyConfig::from_env()?;
    let fingerprinter = Fingerprinter::new(config.hash_algorithm);

    let raw = std::fs::read(&config.recipe_path)
        .with_context(|| format!("reading recipe {}", config.recipe_path.display()))?;
    let hex_text = std::str::from_utf8(&raw)
        .ok()
        .map(str::trim)
        .filter(|text| text.starts_with("0x"))
        .map(str::to_string);
    let blob = match hex_text {
        Some(text) => RecipeBlob::from_hex(config.compression, &text)?,
        None => RecipeBlob::new(config.compression, raw),
    };

    blob.check_size(config.max_bytes)?;
    let workflow = blob.decode_workflow()?;
    let computed = recipe_root(&workflow, &fingerprinter)?;
    tracing::info!(
        bytes = blob.len(),
        compression = %blob.compression,
        algorithm = %fingerprinter.algorithm(),
        root = %computed,
        "Decoded recipe",
    );

    let derived = WorkflowTemplate::discover(workflow.clone(), ModelFiles::default())
        .map(|template| template.derive_params(&workflow));
    match derived {
        Ok(params) => tracing::info!(
            steps = ?params.steps,
            cfg_scale = ?params.cfg_scale,
            sampler = ?params.sampler,
            scheduler = ?params.scheduler,
            model = ?params.model,
            "Recipe parameters",
        ),
        Err(e) => tracing::warn!(error = %e, "Workflow is not a node graph"),
    }

    let Some(stored) = config.recipe_root else {
        println!("{computed}");
        return Ok(ExitCode::SUCCESS);
    };

    match blob.verify(&stored, &fingerprinter)? {
        Reconciliation::Match => {
            tracing::info!(root = %stored, "Recipe root verified");
            Ok(ExitCode::SUCCESS)
        }
        Reconciliation::Mismatch { stored, recomputed } => {
            tracing::error!(
                stored = %stored,
                recomputed = %recomputed,
                "Recipe root mismatch",
            );
            Ok(ExitCode::FAILURE)
        }
    }
}
