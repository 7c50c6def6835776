//! Shared pieces of the `aipg-generate` and `aipg-verify` binaries.

pub mod config;
pub mod report;
pub mod telemetry;
