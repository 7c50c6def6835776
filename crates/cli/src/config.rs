//! Environment-driven configuration for both binaries.
//!
//! Values come from the process environment after `.env` has been loaded.
//! Empty variables count as unset. Malformed values are reported as
//! [`ConfigError`]s naming the offending variable.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use aipg_core::backend::PollPolicy;
use aipg_core::fingerprint::Fingerprint;
use aipg_core::hashing::HashAlgorithm;
use aipg_core::params::{PartialParams, DEFAULT_MODEL};
use aipg_core::recipe::Compression;
use aipg_grid::api::{DEFAULT_CLIENT_AGENT, DEFAULT_GRID_API_URL};

pub const DEFAULT_COMFYUI_URL: &str = "http://127.0.0.1:8188";
pub const DEFAULT_TEMPLATE_PATH: &str = "templates/flux_krea_template.json";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_PROMPT: &str = "a cinematic photograph of a lighthouse on a cliff at dusk";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Reads variables through a lookup function so tests need not touch the
/// process environment.
struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var).filter(|v| !v.trim().is_empty())
    }

    fn string_or(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.get(var).ok_or(ConfigError::Missing(var))
    }

    fn parsed<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(var)
            .map(|value| {
                value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                    var,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn poll_policy(
        &self,
        interval_var: &'static str,
        attempts_var: &'static str,
        default: PollPolicy,
    ) -> Result<PollPolicy, ConfigError> {
        let interval = self
            .parsed::<u64>(interval_var)?
            .map(Duration::from_millis)
            .unwrap_or(default.interval);
        let max_attempts = self.parsed::<u32>(attempts_var)?.unwrap_or(default.max_attempts);
        Ok(PollPolicy::new(interval, max_attempts))
    }
}

// ---------------------------------------------------------------------------
// aipg-generate
// ---------------------------------------------------------------------------

/// Configuration for `aipg-generate`.
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub comfyui_url: String,
    pub grid_api_url: String,
    pub grid_api_key: String,
    pub grid_client_agent: String,
    /// Pin remote jobs to one worker.
    pub grid_worker: Option<String>,
    pub template_path: PathBuf,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    /// Random when unset.
    pub seed: Option<u64>,
    pub output_dir: PathBuf,
    pub hash_algorithm: HashAlgorithm,
    /// Recipe root recorded elsewhere, checked against the recomputed one.
    pub stored_recipe_root: Option<Fingerprint>,
    pub local_poll: PollPolicy,
    pub remote_poll: PollPolicy,
}

impl GenerateConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                              |
    /// |---------------------------|--------------------------------------|
    /// | `COMFYUI_URL`             | `http://127.0.0.1:8188`              |
    /// | `GRID_API_URL`            | `https://api.aipowergrid.io/api`     |
    /// | `GRID_API_KEY`            | required                             |
    /// | `GRID_CLIENT_AGENT`       | `aipg-pipeline:0.1:deterministic`    |
    /// | `GRID_WORKER`             | unset (any worker)                   |
    /// | `TEMPLATE_PATH`           | `templates/flux_krea_template.json`  |
    /// | `PROMPT`                  | built-in sample prompt               |
    /// | `NEGATIVE_PROMPT`         | unset                                |
    /// | `SEED`                    | random                               |
    /// | `OUTPUT_DIR`              | `output`                             |
    /// | `HASH_ALGORITHM`          | `keccak256`                          |
    /// | `STORED_RECIPE_ROOT`      | unset                                |
    /// | `LOCAL_POLL_INTERVAL_MS`  | `2000`                               |
    /// | `LOCAL_POLL_ATTEMPTS`     | `30`                                 |
    /// | `REMOTE_POLL_INTERVAL_MS` | `3000`                               |
    /// | `REMOTE_POLL_ATTEMPTS`    | `60`                                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        Ok(Self {
            comfyui_url: env.string_or("COMFYUI_URL", DEFAULT_COMFYUI_URL),
            grid_api_url: env.string_or("GRID_API_URL", DEFAULT_GRID_API_URL),
            grid_api_key: env.required("GRID_API_KEY")?,
            grid_client_agent: env.string_or("GRID_CLIENT_AGENT", DEFAULT_CLIENT_AGENT),
            grid_worker: env.get("GRID_WORKER"),
            template_path: env.string_or("TEMPLATE_PATH", DEFAULT_TEMPLATE_PATH).into(),
            prompt: env.string_or("PROMPT", DEFAULT_PROMPT),
            negative_prompt: env.get("NEGATIVE_PROMPT"),
            seed: env.parsed("SEED")?,
            output_dir: env.string_or("OUTPUT_DIR", DEFAULT_OUTPUT_DIR).into(),
            hash_algorithm: env.parsed("HASH_ALGORITHM")?.unwrap_or_default(),
            stored_recipe_root: env.parsed("STORED_RECIPE_ROOT")?,
            local_poll: env.poll_policy(
                "LOCAL_POLL_INTERVAL_MS",
                "LOCAL_POLL_ATTEMPTS",
                aipg_comfyui::backend::DEFAULT_POLL_POLICY,
            )?,
            remote_poll: env.poll_policy(
                "REMOTE_POLL_INTERVAL_MS",
                "REMOTE_POLL_ATTEMPTS",
                aipg_grid::backend::DEFAULT_POLL_POLICY,
            )?,
        })
    }

    /// The parameters pinned for every run: the FLUX KREA deterministic
    /// recipe.
    pub fn forced_params(&self) -> PartialParams {
        PartialParams {
            steps: Some(20),
            cfg_scale: Some(1.0),
            sampler: Some("euler".to_string()),
            scheduler: Some("simple".to_string()),
            model: Some(DEFAULT_MODEL.to_string()),
            ..Default::default()
        }
    }

    /// Per-run parameters; `seed` is drawn when not configured.
    pub fn variable_params(&self, random_seed: impl FnOnce() -> u64) -> PartialParams {
        PartialParams {
            seed: Some(self.seed.unwrap_or_else(random_seed)),
            prompt: Some(self.prompt.clone()),
            negative_prompt: self.negative_prompt.clone(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// aipg-verify
// ---------------------------------------------------------------------------

/// Configuration for `aipg-verify`.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// File holding the recipe blob, raw or `0x`-hex.
    pub recipe_path: PathBuf,
    pub compression: Compression,
    /// Root to reconcile against; the computed root is only reported when
    /// unset.
    pub recipe_root: Option<Fingerprint>,
    pub hash_algorithm: HashAlgorithm,
    /// Largest stored blob accepted, in bytes; `0` disables the check.
    pub max_bytes: u64,
}

impl VerifyConfig {
    /// | Env Var              | Default      |
    /// |----------------------|--------------|
    /// | `RECIPE_PATH`        | required     |
    /// | `RECIPE_COMPRESSION` | `none`       |
    /// | `RECIPE_ROOT`        | unset        |
    /// | `HASH_ALGORITHM`     | `keccak256`  |
    /// | `RECIPE_MAX_BYTES`   | `0` (no cap) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        Ok(Self {
            recipe_path: env.required("RECIPE_PATH")?.into(),
            compression: env.parsed("RECIPE_COMPRESSION")?.unwrap_or(Compression::None),
            recipe_root: env.parsed("RECIPE_ROOT")?,
            hash_algorithm: env.parsed("HASH_ALGORITHM")?.unwrap_or_default(),
            max_bytes: env.parsed("RECIPE_MAX_BYTES")?.unwrap_or(0),
        })
    }
}
