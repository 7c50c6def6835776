//! Recipe byte blobs as stored on the ledger.
//!
//! A recipe is a workflow template serialized as canonical JSON and stored
//! under a compression tag. The recipe root recorded alongside it must
//! equal the fingerprint of the decompressed, re-serialized workflow; that
//! equality is what makes a recipe verifiable.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::to_canonical_bytes;
use crate::error::CoreError;
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::reconcile::{reconcile, Reconciliation};

/// Buffer size handed to the brotli stream adapters.
const BROTLI_BUFFER_SIZE: usize = 4096;
/// Brotli quality (0-11) used when encoding.
const BROTLI_QUALITY: u32 = 11;
/// Brotli window size (log2) used when encoding.
const BROTLI_LG_WINDOW: u32 = 22;

// ---------------------------------------------------------------------------
// Compression tag
// ---------------------------------------------------------------------------

/// Compression applied to a stored workflow blob. Discriminants match the
/// ledger's `uint8` encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    None = 0,
    Gzip = 1,
    Brotli = 2,
}

impl TryFrom<u8> for Compression {
    type Error = CoreError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            2 => Ok(Compression::Brotli),
            other => Err(CoreError::RecipeDecode(format!(
                "Unknown compression tag {other}"
            ))),
        }
    }
}

impl From<Compression> for u8 {
    fn from(c: Compression) -> u8 {
        c as u8
    }
}

impl FromStr for Compression {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(Compression::None),
            "gzip" | "1" => Ok(Compression::Gzip),
            "brotli" | "2" => Ok(Compression::Brotli),
            other => Err(CoreError::Validation(format!(
                "Unknown compression '{other}'. Must be one of: none, gzip, brotli"
            ))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Brotli => "brotli",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// A (possibly compressed) workflow blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeBlob {
    pub compression: Compression,
    pub bytes: Vec<u8>,
}

impl RecipeBlob {
    pub fn new(compression: Compression, bytes: Vec<u8>) -> Self {
        Self { compression, bytes }
    }

    /// Parse a `0x`-prefixed hex string as returned by the ledger RPC.
    pub fn from_hex(compression: Compression, hex_bytes: &str) -> Result<Self, CoreError> {
        let trimmed = hex_bytes.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(digits)
            .map_err(|e| CoreError::RecipeDecode(format!("Invalid hex payload: {e}")))?;
        Ok(Self { compression, bytes })
    }

    /// Serialize `workflow` canonically and compress it.
    pub fn encode(workflow: &Value, compression: Compression) -> Result<Self, CoreError> {
        let json = to_canonical_bytes(workflow)?;
        let bytes = match compression {
            Compression::None => json,
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&json).map_err(encode_err)?;
                encoder.finish().map_err(encode_err)?
            }
            Compression::Brotli => {
                let mut writer = brotli::CompressorWriter::new(
                    Vec::new(),
                    BROTLI_BUFFER_SIZE,
                    BROTLI_QUALITY,
                    BROTLI_LG_WINDOW,
                );
                writer.write_all(&json).map_err(encode_err)?;
                writer.flush().map_err(encode_err)?;
                writer.into_inner()
            }
        };
        Ok(Self { compression, bytes })
    }

    /// Size of the stored (compressed) payload in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reject blobs larger than the ledger limit. A limit of `0` means
    /// unlimited.
    pub fn check_size(&self, max_bytes: u64) -> Result<(), CoreError> {
        if max_bytes > 0 && self.len() as u64 > max_bytes {
            return Err(CoreError::Validation(format!(
                "Workflow too large: {} bytes (max: {max_bytes})",
                self.len()
            )));
        }
        Ok(())
    }

    /// Undo the compression, returning the raw JSON bytes.
    pub fn decompress(&self) -> Result<Vec<u8>, CoreError> {
        let mut out = Vec::new();
        match self.compression {
            Compression::None => out.extend_from_slice(&self.bytes),
            Compression::Gzip => {
                GzDecoder::new(self.bytes.as_slice())
                    .read_to_end(&mut out)
                    .map_err(|e| CoreError::RecipeDecode(format!("gzip: {e}")))?;
            }
            Compression::Brotli => {
                brotli::Decompressor::new(self.bytes.as_slice(), BROTLI_BUFFER_SIZE)
                    .read_to_end(&mut out)
                    .map_err(|e| CoreError::RecipeDecode(format!("brotli: {e}")))?;
            }
        }
        Ok(out)
    }

    /// Decompress and parse the workflow JSON.
    pub fn decode_workflow(&self) -> Result<Value, CoreError> {
        let raw = self.decompress()?;
        let text = String::from_utf8(raw)
            .map_err(|e| CoreError::RecipeDecode(format!("workflow is not UTF-8: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| CoreError::RecipeDecode(format!("workflow is not JSON: {e}")))
    }

    /// Fingerprint of the decoded workflow.
    pub fn recipe_root(&self, fingerprinter: &Fingerprinter) -> Result<Fingerprint, CoreError> {
        fingerprinter.fingerprint_value(&self.decode_workflow()?)
    }

    /// Recompute the root and compare it with the one stored for this blob.
    pub fn verify(
        &self,
        stored_root: &Fingerprint,
        fingerprinter: &Fingerprinter,
    ) -> Result<Reconciliation, CoreError> {
        let recomputed = self.recipe_root(fingerprinter)?;
        Ok(reconcile(stored_root, &recomputed))
    }
}

fn encode_err(e: std::io::Error) -> CoreError {
    CoreError::Serialization(format!("compressing workflow: {e}"))
}

/// Fingerprint of a workflow template, as stored for a recipe.
pub fn recipe_root(workflow: &Value, fingerprinter: &Fingerprinter) -> Result<Fingerprint, CoreError> {
    fingerprinter.fingerprint_value(workflow)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn workflow() -> Value {
        json!({
            "31": {"class_type": "KSampler", "inputs": {"seed": 42, "steps": 25, "cfg": 3.5}},
            "45": {"class_type": "CLIPTextEncode", "inputs": {"text": "A stunning landscape"}}
        })
    }

    #[test]
    fn every_compression_decodes_to_the_same_workflow() {
        for compression in [Compression::None, Compression::Gzip, Compression::Brotli] {
            let blob = RecipeBlob::encode(&workflow(), compression).unwrap();
            assert_eq!(blob.decode_workflow().unwrap(), workflow(), "{compression}");
        }
    }

    #[test]
    fn gzip_actually_compresses_the_payload() {
        let big = json!({"text": "a".repeat(4096)});
        let blob = RecipeBlob::encode(&big, Compression::Gzip).unwrap();
        assert!(blob.len() < 4096);
        assert_eq!(&blob.bytes[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn stored_root_matches_recomputed_root() {
        let fp = Fingerprinter::default();
        let root = recipe_root(&workflow(), &fp).unwrap();
        let blob = RecipeBlob::encode(&workflow(), Compression::Gzip).unwrap();
        assert_eq!(blob.verify(&root, &fp).unwrap(), Reconciliation::Match);
    }

    #[test]
    fn tampered_blob_mismatches() {
        let fp = Fingerprinter::default();
        let root = recipe_root(&workflow(), &fp).unwrap();
        let mut tampered = workflow();
        tampered["31"]["inputs"]["steps"] = json!(26);
        let blob = RecipeBlob::encode(&tampered, Compression::None).unwrap();
        assert_matches!(
            blob.verify(&root, &fp).unwrap(),
            Reconciliation::Mismatch { stored, .. } if stored == root
        );
    }

    #[test]
    fn non_utf8_payload_is_a_decode_error() {
        let blob = RecipeBlob::new(Compression::None, vec![0xff, 0xfe, 0x00]);
        assert_matches!(blob.decode_workflow(), Err(CoreError::RecipeDecode(_)));
    }

    #[test]
    fn corrupt_gzip_is_a_decode_error() {
        let blob = RecipeBlob::new(Compression::Gzip, b"{not gzip}".to_vec());
        assert_matches!(blob.decode_workflow(), Err(CoreError::RecipeDecode(_)));
    }

    #[test]
    fn hex_payload_round_trips() {
        let blob = RecipeBlob::encode(&workflow(), Compression::None).unwrap();
        let hex_text = format!("0x{}", hex::encode(&blob.bytes));
        let parsed = RecipeBlob::from_hex(Compression::None, &hex_text).unwrap();
        assert_eq!(parsed, blob);
    }

    #[test]
    fn size_limit_is_enforced() {
        let blob = RecipeBlob::new(Compression::None, vec![b' '; 10]);
        assert!(blob.check_size(0).is_ok());
        assert!(blob.check_size(10).is_ok());
        assert!(blob.check_size(9).is_err());
    }

    #[test]
    fn compression_tags_follow_ledger_encoding() {
        assert_eq!(Compression::try_from(1).unwrap(), Compression::Gzip);
        assert_eq!(u8::from(Compression::Brotli), 2);
        assert!(Compression::try_from(3).is_err());
        assert_eq!("GZIP".parse::<Compression>().unwrap(), Compression::Gzip);
    }
}
