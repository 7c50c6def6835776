//! Client for the remote generation grid (AI Horde v2 async API).
//!
//! Jobs are submitted with `POST /v2/generate/async` and tracked with
//! `GET /v2/generate/status/{id}`. The [`GridBackend`](backend::GridBackend)
//! adapts the client to the generation backend trait.

pub mod api;
pub mod backend;
pub mod request;
pub mod status;
