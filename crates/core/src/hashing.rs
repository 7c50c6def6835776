//! Shared digest utilities.
//!
//! Fingerprints bound to the ledger use Keccak-256 (what the contracts
//! compute); SHA-256 is kept for off-chain verification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// Digest primitive used for one fingerprint class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Keccak256,
    Sha256,
}

impl HashAlgorithm {
    /// Digest `data` into a 32-byte array.
    pub fn digest(self, data: &[u8]) -> [u8; 32] {
        match self {
            HashAlgorithm::Keccak256 => Keccak256::digest(data).into(),
            HashAlgorithm::Sha256 => Sha256::digest(data).into(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Keccak256 => "keccak256",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keccak256" | "keccak-256" | "keccak" => Ok(HashAlgorithm::Keccak256),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            other => Err(format!(
                "Unknown hash algorithm '{other}'. Must be one of: keccak256, sha256"
            )),
        }
    }
}
