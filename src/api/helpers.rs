use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;

/// `{"message": ...}` body used by command endpoints.
pub fn message(msg: impl Into<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": msg.into() }))
}

/// A resource body with a `message` field alongside its own fields.
#[derive(Debug, Serialize)]
pub struct WithMessage<T> {
    #[serde(flatten)]
    pub inner: T,
    pub message: &'static str,
}

/// Parse a document id. Ids that are not UUIDs cannot exist, so they are
/// reported as not found with the caller's message.
pub fn parse_id(raw: &str, not_found: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::NotFound(not_found.to_owned()))
}
