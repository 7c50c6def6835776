//! Projection of canonical parameters onto the grid's async request body.

use aipg_core::params::GenerationParameters;
use serde::{Deserialize, Serialize};

/// Denoising strength for text-to-image jobs.
pub const TXT2IMG_DENOISING_STRENGTH: f64 = 1.0;

/// Separator the grid uses between positive and negative prompt text.
pub const NEGATIVE_PROMPT_SEPARATOR: &str = " ### ";

/// Local sampler names and their grid aliases.
const SAMPLER_ALIASES: &[(&str, &str)] = &[
    ("euler", "k_euler"),
    ("euler_ancestral", "k_euler_a"),
    ("heun", "k_heun"),
    ("dpm_2", "k_dpm_2"),
    ("dpm_2_ancestral", "k_dpm_2_a"),
    ("lms", "k_lms"),
    ("dpmpp_2m", "k_dpmpp_2m"),
    ("dpmpp_sde", "k_dpmpp_sde"),
    ("dpmpp_2s_ancestral", "k_dpmpp_2s_a"),
    ("ddim", "DDIM"),
];

/// Translate a sampler name to the grid's alias. Unknown names pass through.
pub fn grid_sampler_name(sampler: &str) -> &str {
    SAMPLER_ALIASES
        .iter()
        .find(|(local, _)| *local == sampler)
        .map(|(_, grid)| *grid)
        .unwrap_or(sampler)
}

/// Body of `POST /v2/generate/async`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRequest {
    pub prompt: String,
    pub params: GridParams,
    pub models: Vec<String>,
    /// Restrict the job to specific workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    pub sampler_name: String,
    pub cfg_scale: f64,
    pub denoising_strength: f64,
    /// Decimal string; the grid does not accept 64-bit integer seeds.
    pub seed: String,
    pub height: u32,
    pub width: u32,
    pub steps: u32,
}

impl GridRequest {
    /// Build the request for `params`, optionally pinned to one worker.
    pub fn from_params(params: &GenerationParameters, worker: Option<&str>) -> Self {
        let prompt = if params.negative_prompt.is_empty() {
            params.prompt.clone()
        } else {
            format!(
                "{}{NEGATIVE_PROMPT_SEPARATOR}{}",
                params.prompt, params.negative_prompt
            )
        };

        Self {
            prompt,
            params: GridParams {
                sampler_name: grid_sampler_name(&params.sampler).to_string(),
                cfg_scale: params.cfg_scale,
                denoising_strength: TXT2IMG_DENOISING_STRENGTH,
                seed: params.seed.to_string(),
                height: params.height,
                width: params.width,
                steps: params.steps,
            },
            models: vec![params.model.clone()],
            workers: worker.map(|w| vec![w.to_string()]),
        }
    }
}

/// Materialize `params` into the remote request body.
pub fn to_remote_backend(params: &GenerationParameters) -> GridRequest {
    GridRequest::from_params(params, None)
}

#[cfg(test)]
mod tests {
    use aipg_core::params::{normalize, PartialParams};
    use serde_json::json;

    use super::*;

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

    #[test]
    fn request_matches_wire_shape() {
        let body = serde_json::to_value(to_remote_backend(&params())).unwrap();
        assert_eq!(
            body,
            json!({
                "prompt": "test",
                "params": {
                    "sampler_name": "k_euler",
                    "cfg_scale": 1.0,
                    "denoising_strength": 1.0,
                    "seed": "123456789",
                    "height": 1024,
                    "width": 1024,
                    "steps": 20
                },
                "models": ["flux.1-krea-dev"]
            })
        );
    }

    #[test]
    fn sampler_table_translates_known_names() {
        assert_eq!(grid_sampler_name("euler_ancestral"), "k_euler_a");
        assert_eq!(grid_sampler_name("ddim"), "DDIM");
        assert_eq!(grid_sampler_name("k_euler"), "k_euler");
        assert_eq!(grid_sampler_name("uni_pc"), "uni_pc");
    }

    #[test]
    fn negative_prompt_is_appended() {
        let mut p = params();
        p.negative_prompt = "blurry".into();
        assert_eq!(to_remote_backend(&p).prompt, "test ### blurry");
    }

    #[test]
    fn worker_pin_is_optional() {
        let pinned = GridRequest::from_params(&params(), Some("worker-1"));
        assert_eq!(pinned.workers, Some(vec!["worker-1".to_string()]));
        let body = serde_json::to_value(to_remote_backend(&params())).unwrap();
        assert!(body.get("workers").is_none());
    }

    #[test]
    fn serialization_is_reproducible() {
        let a = serde_json::to_vec(&to_remote_backend(&params())).unwrap();
        let b = serde_json::to_vec(&to_remote_backend(&params())).unwrap();
        assert_eq!(a, b);
    }
}
