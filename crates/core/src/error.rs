#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Template content is not valid structured data or has a broken shape.
    #[error("Invalid template format: {0}")]
    InvalidFormat(String),

    /// Template is recognizable but cannot be converted (e.g. an editor export).
    #[error("Unsupported template format: {0}")]
    UnsupportedFormat(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
