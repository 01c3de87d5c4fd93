/// Opaque job identifier assigned by the execution engine (its `prompt_id`).
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
