use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),

    #[error("Session expired, please sign in again")]
    Unauthorized,

    #[error("Server error ({status}): {message}")]
    ServerError { status: StatusCode, message: String },

    #[error("Network error: {0}")]
    NetworkError(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Data error: {0}")]
    DecodingError(#[from] serde_json::Error),

    #[error("Failed to persist session: {0}")]
    Persistence(#[from] StoreError),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ApiError::InvalidUrl(err.to_string())
        } else {
            ApiError::NetworkError(Box::new(err))
        }
    }
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Transport-level failure described by a message rather than a source error.
    pub fn network(message: impl Into<String>) -> Self {
        ApiError::NetworkError(message.into().into())
    }

    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            _ => {
                let message = if body.trim().is_empty() {
                    "Unknown error".to_string()
                } else {
                    Self::truncate_body(body)
                };
                ApiError::ServerError { status, message }
            }
        }
    }

    /// True when the failure means the backend session is gone and the user
    /// has to sign in again.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_maps_401_to_unauthorized() {
        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, "bad token");
        assert!(err.is_session_expired());
        assert_eq!(err.to_string(), "Session expired, please sign in again");
    }

    #[test]
    fn test_from_status_keeps_body_for_other_statuses() {
        match ApiError::from_status(StatusCode::BAD_REQUEST, "missing id_token") {
            ApiError::ServerError { status, message } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(message, "missing id_token");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        match ApiError::from_status(StatusCode::BAD_GATEWAY, "  ") {
            ApiError::ServerError { message, .. } => assert_eq!(message, "Unknown error"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(ApiError::truncate_body("short"), "short");

        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.ends_with("(truncated, 520 total bytes)"));

        // Multi-byte characters straddling the limit must not split
        let accented = "é".repeat(MAX_ERROR_BODY_LENGTH);
        let truncated = ApiError::truncate_body(&accented);
        assert!(truncated.contains("truncated"));
    }
}
