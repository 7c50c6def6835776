//! Materialization of canonical parameters into a ComfyUI node graph.
//!
//! A template is a ComfyUI API-format workflow: a JSON object keyed by
//! opaque node ids, each node carrying `class_type` and `inputs`. Values
//! are written in two passes:
//!
//! 1. `{{PLACEHOLDER}}` tokens anywhere in the graph are replaced.
//! 2. Known inputs on the slot nodes (sampler, prompt, latent, loader)
//!    are overwritten.
//!
//! Slots whose node is missing from the template are skipped, so older and
//! newer templates keep working.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use aipg_core::error::CoreError;
use aipg_core::params::{GenerationParameters, PartialParams};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Node ids and class types
// ---------------------------------------------------------------------------

/// `CLIPTextEncode` node id in the FLUX KREA template.
pub const FLUX_KREA_PROMPT_NODE: &str = "45";
/// `KSampler` node id in the FLUX KREA template.
pub const FLUX_KREA_SAMPLER_NODE: &str = "31";
/// `EmptySD3LatentImage` node id in the FLUX KREA template.
pub const FLUX_KREA_LATENT_NODE: &str = "27";
/// `UNETLoader` node id in the FLUX KREA template.
pub const FLUX_KREA_MODEL_NODE: &str = "38";

const SAMPLER_CLASSES: &[&str] = &["KSampler", "KSamplerAdvanced"];
const TEXT_ENCODE_CLASS: &str = "CLIPTextEncode";
const LATENT_CLASSES: &[&str] = &["EmptySD3LatentImage", "EmptyLatentImage"];
const MODEL_LOADER_CLASSES: &[&str] = &["UNETLoader", "CheckpointLoaderSimple"];

/// How many conditioning hops to follow when resolving a prompt node.
const MAX_CONDITIONING_HOPS: usize = 4;

/// Matches `{{NAME}}` placeholder tokens.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Z_]+)\}\}").expect("valid regex"));

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Node ids that receive canonical parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSlots {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub sampler: Option<String>,
    pub latent: Option<String>,
    pub model_loader: Option<String>,
}

impl Default for TemplateSlots {
    /// Slots of the FLUX KREA template.
    fn default() -> Self {
        Self {
            prompt: Some(FLUX_KREA_PROMPT_NODE.to_string()),
            negative_prompt: None,
            sampler: Some(FLUX_KREA_SAMPLER_NODE.to_string()),
            latent: Some(FLUX_KREA_LATENT_NODE.to_string()),
            model_loader: Some(FLUX_KREA_MODEL_NODE.to_string()),
        }
    }
}

impl TemplateSlots {
    /// Find slots by node `class_type`.
    ///
    /// The prompt nodes are resolved by following the sampler's
    /// `positive` / `negative` links through conditioning nodes. A negative
    /// link that resolves to the positive prompt node (e.g. through
    /// `ConditioningZeroOut`) leaves the negative slot empty.
    pub fn discover(graph: &Value) -> Self {
        let nodes = sorted_nodes(graph);
        let first_of = |classes: &[&str]| {
            nodes
                .iter()
                .find(|(_, node)| classes.contains(&class_type(node)))
                .map(|(id, _)| id.to_string())
        };

        let sampler = first_of(SAMPLER_CLASSES);
        let linked = |input: &str| {
            sampler
                .as_deref()
                .and_then(|id| graph[id]["inputs"].get(input))
                .and_then(|link| resolve_text_node(graph, link, MAX_CONDITIONING_HOPS))
        };

        let prompt = linked("positive").or_else(|| first_of(&[TEXT_ENCODE_CLASS]));
        let negative_prompt = linked("negative").filter(|id| Some(id) != prompt.as_ref());

        Self {
            prompt,
            negative_prompt,
            sampler,
            latent: first_of(LATENT_CLASSES),
            model_loader: first_of(MODEL_LOADER_CLASSES),
        }
    }
}

fn class_type(node: &Value) -> &str {
    node["class_type"].as_str().unwrap_or_default()
}

/// Nodes ordered numerically by id where ids are numeric.
fn sorted_nodes(graph: &Value) -> Vec<(&str, &Value)> {
    let mut nodes: Vec<(&str, &Value)> = graph
        .as_object()
        .map(|map| map.iter().map(|(id, node)| (id.as_str(), node)).collect())
        .unwrap_or_default();
    nodes.sort_by_key(|(id, _)| (id.parse::<u64>().unwrap_or(u64::MAX), id.to_string()));
    nodes
}

/// Follow a `["<node_id>", <slot>]` link to the text encoder feeding it.
fn resolve_text_node(graph: &Value, link: &Value, hops: usize) -> Option<String> {
    let id = link.get(0)?.as_str()?;
    let node = graph.get(id)?;
    if class_type(node) == TEXT_ENCODE_CLASS {
        return Some(id.to_string());
    }
    if hops == 0 {
        return None;
    }
    let upstream = node["inputs"].get("conditioning")?;
    resolve_text_node(graph, upstream, hops - 1)
}

// ---------------------------------------------------------------------------
// Model files
// ---------------------------------------------------------------------------

/// Maps model identifiers to the weight files a loader node expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFiles(BTreeMap<String, String>);

impl Default for ModelFiles {
    fn default() -> Self {
        Self::empty().with("flux.1-krea-dev", "flux1-krea-dev_fp8_scaled.safetensors")
    }
}

impl ModelFiles {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, model: impl Into<String>, file: impl Into<String>) -> Self {
        self.0.insert(model.into(), file.into());
        self
    }

    /// Weight file for `model`; unknown models pass through unchanged.
    pub fn file_for(&self, model: &str) -> String {
        self.0
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }

    /// Model identifier for a weight file; unknown files pass through.
    pub fn model_for(&self, file: &str) -> String {
        self.0
            .iter()
            .find(|(_, f)| f.as_str() == file)
            .map(|(model, _)| model.clone())
            .unwrap_or_else(|| file.to_string())
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// A workflow template together with its slot layout.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    graph: Value,
    slots: TemplateSlots,
    models: ModelFiles,
}

impl WorkflowTemplate {
    /// Wrap a template graph. Fails if the graph is not a JSON object.
    pub fn new(graph: Value, slots: TemplateSlots, models: ModelFiles) -> Result<Self, CoreError> {
        if !graph.is_object() {
            return Err(CoreError::Validation(
                "Workflow template must be a JSON object keyed by node id".to_string(),
            ));
        }
        Ok(Self {
            graph,
            slots,
            models,
        })
    }

    /// Wrap a template graph, discovering its slots by class type.
    pub fn discover(graph: Value, models: ModelFiles) -> Result<Self, CoreError> {
        let slots = TemplateSlots::discover(&graph);
        Self::new(graph, slots, models)
    }

    pub fn graph(&self) -> &Value {
        &self.graph
    }

    pub fn slots(&self) -> &TemplateSlots {
        &self.slots
    }

    pub fn models(&self) -> &ModelFiles {
        &self.models
    }

    /// Produce the workflow to submit for `params`.
    ///
    /// Identical parameters always produce byte-identical output.
    pub fn materialize(&self, params: &GenerationParameters) -> Value {
        let mut workflow = self.graph.clone();
        let values = placeholder_values(params, &self.models);
        substitute_placeholders(&mut workflow, &values);

        if let Some(id) = &self.slots.sampler {
            let seed_key = if has_input(&workflow, id, "noise_seed") {
                "noise_seed"
            } else {
                "seed"
            };
            set_input(&mut workflow, id, seed_key, Value::from(params.seed));
            set_input(&mut workflow, id, "steps", Value::from(params.steps));
            set_input(&mut workflow, id, "cfg", number(params.cfg_scale));
            set_input(&mut workflow, id, "sampler_name", Value::from(params.sampler.as_str()));
            set_input(&mut workflow, id, "scheduler", Value::from(params.scheduler.as_str()));
        }
        if let Some(id) = &self.slots.prompt {
            set_input(&mut workflow, id, "text", Value::from(params.prompt.as_str()));
        }
        if let Some(id) = &self.slots.negative_prompt {
            set_input(&mut workflow, id, "text", Value::from(params.negative_prompt.as_str()));
        }
        if let Some(id) = &self.slots.latent {
            set_input(&mut workflow, id, "width", Value::from(params.width));
            set_input(&mut workflow, id, "height", Value::from(params.height));
        }
        if let Some(id) = &self.slots.model_loader {
            let key = loader_key(&workflow, id);
            set_input(
                &mut workflow,
                id,
                key,
                Value::from(self.models.file_for(&params.model)),
            );
        }

        workflow
    }

    /// Read generation parameters back out of a materialized workflow.
    ///
    /// Inputs that are links or absent are left unset. The workflow id is
    /// never recorded in the graph and is always unset.
    pub fn derive_params(&self, workflow: &Value) -> PartialParams {
        let input = |slot: &Option<String>, key: &str| -> Option<&Value> {
            slot.as_deref().and_then(|id| workflow[id]["inputs"].get(key))
        };
        let text = |slot: &Option<String>, key: &str| {
            input(slot, key).and_then(Value::as_str).map(str::to_string)
        };
        let count = |slot: &Option<String>, key: &str| {
            input(slot, key)
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
        };

        let sampler = &self.slots.sampler;
        let seed = input(sampler, "noise_seed")
            .or_else(|| input(sampler, "seed"))
            .and_then(Value::as_u64);

        let model = self.slots.model_loader.as_deref().and_then(|id| {
            let key = loader_key(workflow, id);
            workflow[id]["inputs"][key]
                .as_str()
                .map(|file| self.models.model_for(file))
        });

        PartialParams {
            seed,
            prompt: text(&self.slots.prompt, "text"),
            negative_prompt: text(&self.slots.negative_prompt, "text"),
            steps: count(sampler, "steps"),
            cfg_scale: input(sampler, "cfg").and_then(Value::as_f64),
            width: count(&self.slots.latent, "width"),
            height: count(&self.slots.latent, "height"),
            model,
            sampler: text(sampler, "sampler_name"),
            scheduler: text(sampler, "scheduler"),
            workflow_id: None,
        }
    }
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn has_input(workflow: &Value, node_id: &str, key: &str) -> bool {
    workflow[node_id]["inputs"].get(key).is_some()
}

/// `ckpt_name` for checkpoint loaders, `unet_name` otherwise.
fn loader_key(workflow: &Value, node_id: &str) -> &'static str {
    if has_input(workflow, node_id, "ckpt_name") {
        "ckpt_name"
    } else {
        "unet_name"
    }
}

/// Write `inputs.<key>` on a node if the node and its inputs exist.
fn set_input(workflow: &mut Value, node_id: &str, key: &str, value: Value) {
    match workflow
        .get_mut(node_id)
        .and_then(|node| node.get_mut("inputs"))
        .and_then(Value::as_object_mut)
    {
        Some(inputs) => {
            inputs.insert(key.to_string(), value);
        }
        None => {
            tracing::debug!(node_id, key, "Template slot missing, skipping");
        }
    }
}

// ---------------------------------------------------------------------------
// Placeholders
// ---------------------------------------------------------------------------

/// Values for every supported `{{NAME}}` placeholder.
pub fn placeholder_values(params: &GenerationParameters, models: &ModelFiles) -> BTreeMap<&'static str, Value> {
    BTreeMap::from([
        ("WIDTH", Value::from(params.width)),
        ("HEIGHT", Value::from(params.height)),
        ("SEED", Value::from(params.seed)),
        ("STEPS", Value::from(params.steps)),
        ("CFG", number(params.cfg_scale)),
        ("SAMPLER", Value::from(params.sampler.as_str())),
        ("SCHEDULER", Value::from(params.scheduler.as_str())),
        ("PROMPT", Value::from(params.prompt.as_str())),
        ("NEGATIVE_PROMPT", Value::from(params.negative_prompt.as_str())),
        ("MODEL_FILE", Value::from(models.file_for(&params.model))),
    ])
}

/// Replace placeholders throughout `value`.
///
/// A string consisting of exactly one known placeholder takes the typed
/// value (so `"{{STEPS}}"` becomes the number `20`); placeholders embedded
/// in longer strings are replaced textually. Unknown names are left as-is.
pub fn substitute_placeholders(value: &mut Value, values: &BTreeMap<&'static str, Value>) {
    match value {
        Value::String(s) => {
            if let Some(replacement) = whole_placeholder(s, values) {
                *value = replacement;
            } else if PLACEHOLDER_RE.is_match(s) {
                let replaced = PLACEHOLDER_RE.replace_all(s, |caps: &regex::Captures<'_>| {
                    match values.get(&caps[1]) {
                        Some(Value::String(text)) => text.clone(),
                        Some(other) => other.to_string(),
                        None => caps[0].to_string(),
                    }
                });
                *s = replaced.into_owned();
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_placeholders(item, values);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute_placeholders(item, values);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn whole_placeholder(s: &str, values: &BTreeMap<&'static str, Value>) -> Option<Value> {
    let caps = PLACEHOLDER_RE.captures(s)?;
    let whole = caps.get(0)?;
    if whole.start() != 0 || whole.end() != s.len() {
        return None;
    }
    values.get(&caps[1]).cloned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
