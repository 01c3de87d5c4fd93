//! Shared-secret extractor for Axum handlers.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use shim_core::error::CoreError;

use crate::config::ApiKeyConfig;
use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Proof that the request carried the configured API key (or that the
/// check is disabled).
///
/// ```ignore
/// async fn my_handler(_key: RequireApiKey) -> AppResult<Json<()>> {
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RequireApiKey;

#[derive(Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

impl FromRequestParts<AppState> for RequireApiKey {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let provided = match header_key {
            Some(key) => Some(key),
            None => Query::<ApiKeyQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.api_key),
        };

        check_api_key(&state.config.auth, provided.as_deref())?;
        Ok(RequireApiKey)
    }
}

/// Validate a presented key against the configuration.
///
/// Fails closed: when a key is required but none is configured, every
/// request is refused.
pub fn check_api_key(config: &ApiKeyConfig, provided: Option<&str>) -> Result<(), AppError> {
    if !config.require {
        return Ok(());
    }
    let Some(expected) = config.api_key.as_deref() else {
        return Err(AppError::AuthNotConfigured);
    };

    match provided.filter(|key| !key.is_empty()) {
        None => Err(AppError::Core(CoreError::Unauthorized(
            "Missing API key".into(),
        ))),
        // Compare fixed-length digests rather than the raw strings.
        Some(key) if Sha256::digest(key.as_bytes()) == Sha256::digest(expected.as_bytes()) => {
            Ok(())
        }
        Some(_) => Err(AppError::Core(CoreError::Unauthorized(
            "Invalid API key".into(),
        ))),
    }
}
