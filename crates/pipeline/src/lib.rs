//! Bounded job polling and the dual-backend dispatcher.
//!
//! [`polling::run_backend`] drives one backend from submission to a
//! terminal [`GenerationResult`](aipg_core::result::GenerationResult);
//! [`dispatcher::Dispatcher`] runs two of those flows concurrently and
//! joins them into a comparison record.

pub mod dispatcher;
pub mod polling;
