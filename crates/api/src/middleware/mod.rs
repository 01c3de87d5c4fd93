//! Request guards.
//!
//! - [`api_key::RequireApiKey`] -- Requires the shared secret in the
//!   `X-API-Key` header or the `api_key` query parameter.

pub mod api_key;
