//! ComfyUI engine client library.
//!
//! Provides the typed REST wrapper around the engine's queueing API,
//! history and queue snapshot parsing, graph submission, and the polling
//! status tracker that follows a submitted job to completion.

pub mod api;
pub mod history;
pub mod queue;
pub mod submit;
pub mod tracker;
