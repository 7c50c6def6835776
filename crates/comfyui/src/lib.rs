//! ComfyUI REST client and workflow materialization.
//!
//! Provides the HTTP API wrapper, typed `/history` parsing, template
//! substitution of canonical generation parameters into a node graph,
//! and the [`ComfyUIBackend`](backend::ComfyUIBackend) implementation of
//! the generation backend trait.

pub mod api;
pub mod backend;
pub mod history;
pub mod workflow;
