//! Core domain logic for deterministic image generation.
//!
//! Parameter normalization, content fingerprints, recipe blob decoding,
//! result records and the backend trait shared by the ComfyUI and grid
//! clients. Nothing in this crate performs I/O.

pub mod backend;
pub mod canonical;
pub mod error;
pub mod fingerprint;
pub mod hashing;
pub mod params;
pub mod recipe;
pub mod reconcile;
pub mod result;
pub mod types;
