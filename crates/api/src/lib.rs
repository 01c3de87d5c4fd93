//! HTTP surface of the ComfyUI job shim.
//!
//! Exposes `POST /run`, `GET /status/{job_id}` and `GET /health`, plus the
//! [`serverless::handle`] entry point for job-envelope platforms.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod routes;
pub mod serverless;
pub mod state;
