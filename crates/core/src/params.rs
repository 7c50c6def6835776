//! Generation parameter normalization.
//!
//! A request is built from two partial parameter sets: the *forced* set
//! pinned by the calling policy (sampler, steps, cfg, model, ...) and the
//! *variable* set supplied per request (seed, prompt). Forced values always
//! win. The merged set is validated against optional model constraints,
//! collecting every violation before failing.

use serde::{Deserialize, Serialize};

use crate::canonical::MAX_SAFE_INTEGER;
use crate::error::{CoreError, ParamViolation};
use crate::types::Seed;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Output width used when neither side supplies one.
pub const DEFAULT_WIDTH: u32 = 1024;
/// Output height used when neither side supplies one.
pub const DEFAULT_HEIGHT: u32 = 1024;
/// Model identifier used when neither side supplies one.
pub const DEFAULT_MODEL: &str = "flux.1-krea-dev";
/// Workflow identifier folded into the recipe fingerprint.
pub const DEFAULT_WORKFLOW_ID: &str = "flux-krea-deterministic-v1";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A partially specified parameter set. Either side of a merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<Seed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

impl PartialParams {
    /// Field-wise merge where `self` wins wherever it has a value.
    pub fn overlay(self, lower: PartialParams) -> PartialParams {
        PartialParams {
            seed: self.seed.or(lower.seed),
            prompt: self.prompt.or(lower.prompt),
            negative_prompt: self.negative_prompt.or(lower.negative_prompt),
            steps: self.steps.or(lower.steps),
            cfg_scale: self.cfg_scale.or(lower.cfg_scale),
            width: self.width.or(lower.width),
            height: self.height.or(lower.height),
            model: self.model.or(lower.model),
            sampler: self.sampler.or(lower.sampler),
            scheduler: self.scheduler.or(lower.scheduler),
            workflow_id: self.workflow_id.or(lower.workflow_id),
        }
    }
}

impl From<&GenerationParameters> for PartialParams {
    fn from(p: &GenerationParameters) -> Self {
        PartialParams {
            seed: Some(p.seed),
            prompt: Some(p.prompt.clone()),
            negative_prompt: Some(p.negative_prompt.clone()),
            steps: Some(p.steps),
            cfg_scale: Some(p.cfg_scale),
            width: Some(p.width),
            height: Some(p.height),
            model: Some(p.model.clone()),
            sampler: Some(p.sampler.clone()),
            scheduler: Some(p.scheduler.clone()),
            workflow_id: Some(p.workflow_id.clone()),
        }
    }
}

/// The canonical, fully specified parameter set driving both backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParameters {
    pub seed: Seed,
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub cfg_scale: f64,
    pub width: u32,
    pub height: u32,
    pub model: String,
    pub sampler: String,
    pub scheduler: String,
    pub workflow_id: String,
}

/// Numeric ranges and identifier sets a model accepts.
///
/// Empty sampler or scheduler sets accept any identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConstraints {
    pub steps_min: u32,
    pub steps_max: u32,
    pub cfg_min: f64,
    pub cfg_max: f64,
    #[serde(default)]
    pub allowed_samplers: Vec<String>,
    #[serde(default)]
    pub allowed_schedulers: Vec<String>,
}

impl ModelConstraints {
    /// Build constraints from the ledger encoding, where cfg bounds are
    /// stored in tenths.
    pub fn from_ledger(
        steps_min: u16,
        steps_max: u16,
        cfg_min_tenths: u16,
        cfg_max_tenths: u16,
        allowed_samplers: Vec<String>,
        allowed_schedulers: Vec<String>,
    ) -> Self {
        Self {
            steps_min: steps_min.into(),
            steps_max: steps_max.into(),
            cfg_min: f64::from(cfg_min_tenths) / 10.0,
            cfg_max: f64::from(cfg_max_tenths) / 10.0,
            allowed_samplers,
            allowed_schedulers,
        }
    }

    /// Return every constraint `params` breaks.
    pub fn check(&self, params: &GenerationParameters) -> Vec<ParamViolation> {
        let mut violations = Vec::new();

        if params.steps < self.steps_min || params.steps > self.steps_max {
            violations.push(ParamViolation::new(
                "steps",
                format!(
                    "Steps {} outside range {}-{}",
                    params.steps, self.steps_min, self.steps_max
                ),
            ));
        }

        if params.cfg_scale < self.cfg_min || params.cfg_scale > self.cfg_max {
            violations.push(ParamViolation::new(
                "cfgScale",
                format!(
                    "CFG {} outside range {}-{}",
                    params.cfg_scale, self.cfg_min, self.cfg_max
                ),
            ));
        }

        if !self.allowed_samplers.is_empty() && !self.allowed_samplers.contains(&params.sampler) {
            violations.push(ParamViolation::new(
                "sampler",
                format!(
                    "Sampler '{}' not allowed. Must be one of: {}",
                    params.sampler,
                    self.allowed_samplers.join(", ")
                ),
            ));
        }

        if !self.allowed_schedulers.is_empty()
            && !self.allowed_schedulers.contains(&params.scheduler)
        {
            violations.push(ParamViolation::new(
                "scheduler",
                format!(
                    "Scheduler '{}' not allowed. Must be one of: {}",
                    params.scheduler,
                    self.allowed_schedulers.join(", ")
                ),
            ));
        }

        violations
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Merge `forced` over `variable`, fill defaults, and validate.
///
/// Fails with [`CoreError::InvalidParameters`] listing every missing,
/// malformed, or out-of-range field.
pub fn normalize(
    forced: &PartialParams,
    variable: &PartialParams,
    constraints: Option<&ModelConstraints>,
) -> Result<GenerationParameters, CoreError> {
    let merged = forced.clone().overlay(variable.clone());
    let mut violations = Vec::new();

    let seed = require(merged.seed, "seed", &mut violations);
    let prompt = require(merged.prompt, "prompt", &mut violations);
    let steps = require(merged.steps, "steps", &mut violations);
    let cfg_scale = require(merged.cfg_scale, "cfgScale", &mut violations);
    let sampler = require(merged.sampler, "sampler", &mut violations);
    let scheduler = require(merged.scheduler, "scheduler", &mut violations);

    let width = merged.width.unwrap_or(DEFAULT_WIDTH);
    let height = merged.height.unwrap_or(DEFAULT_HEIGHT);

    if let Some(seed) = seed {
        if seed > MAX_SAFE_INTEGER {
            violations.push(ParamViolation::new(
                "seed",
                format!("Seed {seed} exceeds {MAX_SAFE_INTEGER} and cannot be fingerprinted exactly"),
            ));
        }
    }
    if steps == Some(0) {
        violations.push(ParamViolation::new("steps", "Steps must be positive"));
    }
    if let Some(cfg) = cfg_scale {
        if !cfg.is_finite() || cfg <= 0.0 {
            violations.push(ParamViolation::new(
                "cfgScale",
                format!("CFG must be a positive finite number, got {cfg}"),
            ));
        }
    }
    if width == 0 {
        violations.push(ParamViolation::new("width", "Width must be positive"));
    }
    if height == 0 {
        violations.push(ParamViolation::new("height", "Height must be positive"));
    }

    let (
        Some(seed),
        Some(prompt),
        Some(steps),
        Some(cfg_scale),
        Some(sampler),
        Some(scheduler),
    ) = (seed, prompt, steps, cfg_scale, sampler, scheduler)
    else {
        return Err(CoreError::InvalidParameters(violations));
    };

    let params = GenerationParameters {
        seed,
        prompt,
        negative_prompt: merged.negative_prompt.unwrap_or_default(),
        steps,
        cfg_scale,
        width,
        height,
        model: merged.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        sampler,
        scheduler,
        workflow_id: merged
            .workflow_id
            .unwrap_or_else(|| DEFAULT_WORKFLOW_ID.to_string()),
    };

    if let Some(constraints) = constraints {
        violations.extend(constraints.check(&params));
    }

    if violations.is_empty() {
        Ok(params)
    } else {
        Err(CoreError::InvalidParameters(violations))
    }
}

fn require<T>(value: Option<T>, field: &'static str, violations: &mut Vec<ParamViolation>) -> Option<T> {
    if value.is_none() {
        violations.push(ParamViolation::new(field, "is required"));
    }
    value
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
