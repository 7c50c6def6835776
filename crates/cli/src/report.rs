//! Writing run output to disk.

use std::path::{Path, PathBuf};

use aipg_core::reconcile::ComparisonSummary;
use aipg_core::result::BackendId;
use aipg_core::types::Timestamp;

/// File name of the comparison summary for a run started at `generated_at`.
pub fn summary_file_name(generated_at: &Timestamp) -> String {
    format!(
        "generation-comparison-{}.json",
        generated_at.format("%Y%m%dT%H%M%S%.3fZ")
    )
}

/// File name of a downloaded image for `backend` and `seed`.
pub fn image_file_name(backend: BackendId, seed: u64, extension: &str) -> String {
    format!("{backend}-{seed}.{extension}")
}

/// Pretty-print `summary` into `dir`, creating the directory if needed.
pub fn write_summary(dir: &Path, summary: &ComparisonSummary) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(summary_file_name(&summary.generated_at));
    let json = serde_json::to_vec_pretty(summary)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Store image bytes in `dir` under `file_name`.
pub fn write_image(dir: &Path, file_name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    std::fs::write(&path, bytes)?;
    Ok(path)
}

/// Extension of a file name or URL path, defaulting to `png`.
pub fn extension_of(name: &str) -> &str {
    let path = name.split(['?', '#']).next().unwrap_or(name);
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext,
        _ => "png",
    }
}
