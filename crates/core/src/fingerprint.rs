//! Recipe and render fingerprints.
//!
//! A *recipe fingerprint* identifies the deterministic workflow shape
//! (steps, cfg, sampler, scheduler, model, workflow id). A *render
//! fingerprint* identifies one concrete generation event (seed, prompt,
//! timestamp). Both hash the canonical JSON of exactly those fields, so
//! extra fields and key order never affect the result.

use std::fmt;
use std::str::FromStr;

use chrono::SecondsFormat;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::canonical::{number_from_f64, to_canonical_bytes};
use crate::error::CoreError;
use crate::hashing::HashAlgorithm;
use crate::params::GenerationParameters;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Fingerprint value
// ---------------------------------------------------------------------------

/// A 32-byte content hash, rendered as `0x`-prefixed lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| CoreError::Validation(format!("Invalid fingerprint '{s}': {e}")))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Commitments
// ---------------------------------------------------------------------------

/// Format a timestamp the way render commitments record it
/// (RFC 3339, UTC, millisecond precision, `Z` suffix).
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The fields hashed into a recipe fingerprint.
pub fn recipe_commitment(params: &GenerationParameters) -> Result<Value, CoreError> {
    let mut map = Map::new();
    map.insert("steps".into(), Value::from(params.steps));
    map.insert("cfgScale".into(), number_from_f64("cfgScale", params.cfg_scale)?);
    map.insert("sampler".into(), Value::from(params.sampler.as_str()));
    map.insert("scheduler".into(), Value::from(params.scheduler.as_str()));
    map.insert("model".into(), Value::from(params.model.as_str()));
    map.insert("workflowId".into(), Value::from(params.workflow_id.as_str()));
    Ok(Value::Object(map))
}

/// The fields hashed into a render fingerprint.
pub fn render_commitment(params: &GenerationParameters, timestamp: &Timestamp) -> Value {
    let mut map = Map::new();
    map.insert("seed".into(), Value::from(params.seed));
    map.insert("prompt".into(), Value::from(params.prompt.as_str()));
    map.insert("timestamp".into(), Value::from(format_timestamp(timestamp)));
    Value::Object(map)
}

// ---------------------------------------------------------------------------
// Fingerprinter
// ---------------------------------------------------------------------------

/// Computes fingerprints with one hash algorithm for every class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fingerprinter {
    algorithm: HashAlgorithm,
}

impl Fingerprinter {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hash the canonical serialization of an arbitrary JSON value.
    pub fn fingerprint_value(&self, value: &Value) -> Result<Fingerprint, CoreError> {
        let bytes = to_canonical_bytes(value)?;
        Ok(Fingerprint(self.algorithm.digest(&bytes)))
    }

    pub fn recipe_fingerprint(&self, params: &GenerationParameters) -> Result<Fingerprint, CoreError> {
        self.fingerprint_value(&recipe_commitment(params)?)
    }

    pub fn render_fingerprint(
        &self,
        params: &GenerationParameters,
        timestamp: &Timestamp,
    ) -> Result<Fingerprint, CoreError> {
        self.fingerprint_value(&render_commitment(params, timestamp))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::params::{normalize, PartialParams};

    fn scenario_params() -> GenerationParameters {
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

    fn minted_at() -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2025, 8, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn recipe_fingerprint_is_stable() {
        let fp = Fingerprinter::default();
        let params = scenario_params();
        assert_eq!(
            fp.recipe_fingerprint(&params).unwrap(),
            fp.recipe_fingerprint(&params).unwrap()
        );
    }

    #[test]
    fn recipe_fingerprint_hashes_sorted_commitment() {
        let fp = Fingerprinter::new(HashAlgorithm::Keccak256);
        let expected = hex::encode(HashAlgorithm::Keccak256.digest(
            br#"{"cfgScale":1,"model":"flux.1-krea-dev","sampler":"euler","scheduler":"simple","steps":20,"workflowId":"flux-krea-deterministic-v1"}"#,
        ));
        assert_eq!(
            fp.recipe_fingerprint(&scenario_params()).unwrap().to_hex(),
            format!("0x{expected}")
        );
    }

    #[test]
    fn recipe_fingerprint_survives_serde_cycle() {
        let fp = Fingerprinter::default();
        let params = scenario_params();
        let json = serde_json::to_string(&params).unwrap();
        let back: GenerationParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(
            fp.recipe_fingerprint(&params).unwrap(),
            fp.recipe_fingerprint(&back).unwrap()
        );
    }

    #[test]
    fn recipe_fingerprint_ignores_key_order_and_extra_fields() {
        let fp = Fingerprinter::default();
        let a: GenerationParameters = serde_json::from_str(
            r#"{"seed":1,"prompt":"p","negativePrompt":"","steps":20,"cfgScale":1.0,"width":1024,"height":1024,"model":"m","sampler":"euler","scheduler":"simple","workflowId":"w"}"#,
        )
        .unwrap();
        let b: GenerationParameters = serde_json::from_str(
            r#"{"workflowId":"w","scheduler":"simple","sampler":"euler","model":"m","height":512,"width":768,"cfgScale":1.0,"steps":20,"negativePrompt":"blurry","prompt":"other","seed":99}"#,
        )
        .unwrap();
        assert_eq!(
            fp.recipe_fingerprint(&a).unwrap(),
            fp.recipe_fingerprint(&b).unwrap()
        );
    }

    #[test]
    fn changing_any_recipe_field_changes_fingerprint() {
        let fp = Fingerprinter::default();
        let base = scenario_params();
        let original = fp.recipe_fingerprint(&base).unwrap();

        let mutations: Vec<GenerationParameters> = vec![
            GenerationParameters { steps: base.steps + 1, ..base.clone() },
            GenerationParameters { cfg_scale: 1.5, ..base.clone() },
            GenerationParameters { sampler: "heun".into(), ..base.clone() },
            GenerationParameters { scheduler: "karras".into(), ..base.clone() },
            GenerationParameters { model: "sdxl".into(), ..base.clone() },
            GenerationParameters { workflow_id: "other".into(), ..base.clone() },
        ];
        for mutated in mutations {
            assert_ne!(fp.recipe_fingerprint(&mutated).unwrap(), original);
        }
    }

    #[test]
    fn render_fingerprint_tracks_seed_prompt_and_time() {
        let fp = Fingerprinter::default();
        let base = scenario_params();
        let original = fp.render_fingerprint(&base, &minted_at()).unwrap();

        let other_seed = GenerationParameters { seed: 1, ..base.clone() };
        let other_prompt = GenerationParameters { prompt: "x".into(), ..base.clone() };
        let later = minted_at() + chrono::Duration::milliseconds(1);

        assert_ne!(fp.render_fingerprint(&other_seed, &minted_at()).unwrap(), original);
        assert_ne!(fp.render_fingerprint(&other_prompt, &minted_at()).unwrap(), original);
        assert_ne!(fp.render_fingerprint(&base, &later).unwrap(), original);

        let other_steps = GenerationParameters { steps: 42, ..base };
        assert_eq!(fp.render_fingerprint(&other_steps, &minted_at()).unwrap(), original);
    }

    #[test]
    fn render_commitment_uses_millisecond_timestamps() {
        let value = render_commitment(&scenario_params(), &minted_at());
        assert_eq!(value["timestamp"], "2025-08-01T12:30:00.000Z");
    }

    #[test]
    fn algorithm_choice_changes_digest() {
        let params = scenario_params();
        let keccak = Fingerprinter::new(HashAlgorithm::Keccak256)
            .recipe_fingerprint(&params)
            .unwrap();
        let sha = Fingerprinter::new(HashAlgorithm::Sha256)
            .recipe_fingerprint(&params)
            .unwrap();
        assert_ne!(keccak, sha);
    }

    #[test]
    fn non_finite_cfg_is_a_serialization_error() {
        let params = GenerationParameters {
            cfg_scale: f64::INFINITY,
            ..scenario_params()
        };
        assert!(matches!(
            Fingerprinter::default().recipe_fingerprint(&params),
            Err(CoreError::Serialization(_))
        ));
    }

    #[test]
    fn fingerprint_parses_and_serializes_as_hex() {
        let fp = Fingerprinter::default()
            .recipe_fingerprint(&scenario_params())
            .unwrap();
        let text = fp.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 66);
        assert_eq!(text.parse::<Fingerprint>().unwrap(), fp);

        let json = serde_json::to_value(fp).unwrap();
        assert_eq!(json, Value::String(text));
        let back: Fingerprint = serde_json::from_value(json).unwrap();
        assert_eq!(back, fp);
    }

    #[test]
    fn malformed_fingerprint_is_rejected() {
        assert!("0x1234".parse::<Fingerprint>().is_err());
        assert!("zz".repeat(32).parse::<Fingerprint>().is_err());
    }
}
