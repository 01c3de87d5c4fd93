//! Domain logic for the ComfyUI job shim.
//!
//! Everything here is free of HTTP concerns: graph templates (loading,
//! normalization, placeholder substitution), job records and the
//! injectable job store.

pub mod error;
pub mod job;
pub mod job_store;
pub mod template;
pub mod types;
