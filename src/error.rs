//! Error types
//!
//! `GatewayError` covers every failure that can reach an HTTP caller. The
//! status mapping lives here so handlers can just use `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A required request field was absent or empty.
    #[error("\"{0}\" is required")]
    MissingField(&'static str),

    /// The `type` of a send request is not one we relay.
    #[error("invalid type: {0}")]
    InvalidType(String),

    /// The request body is not the JSON we expect.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// The recipient could not be turned into a JID.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("unauthorized")]
    Unauthorized,

    /// Protected routes are unusable until a token is configured.
    #[error("AUTH_TOKEN is not configured")]
    AuthNotConfigured,

    /// No authenticated socket is available right now.
    #[error("socket not ready")]
    NotReady,

    #[error("failed to fetch media: {0}")]
    Media(String),

    #[error("failed to send: {0}")]
    Send(String),

    #[error("session store error: {0}")]
    Store(String),

    #[error("QR rendering failed: {0}")]
    Qr(String),

    /// The session supervisor is gone (shutting down).
    #[error("session supervisor unavailable")]
    SupervisorGone,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingField(_)
            | Self::InvalidType(_)
            | Self::InvalidBody(_)
            | Self::InvalidRecipient(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotReady | Self::SupervisorGone => StatusCode::SERVICE_UNAVAILABLE,
            Self::AuthNotConfigured
            | Self::Media(_)
            | Self::Send(_)
            | Self::Store(_)
            | Self::Qr(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<wacore::store::error::StoreError> for GatewayError {
    fn from(err: wacore::store::error::StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Media(detail) | Self::Send(detail) => {
                json!({ "error": "failed to send", "detail": detail })
            }
            other if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!("request failed: {}", other);
                json!({ "error": other.to_string() })
            }
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_400() {
        assert_eq!(
            GatewayError::MissingField("to").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::InvalidType("sticker".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::InvalidRecipient("abc".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_auth_and_readiness_statuses() {
        assert_eq!(GatewayError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            GatewayError::AuthNotConfigured.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::NotReady.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_missing_field_message() {
        assert_eq!(
            GatewayError::MissingField("message").to_string(),
            "\"message\" is required"
        );
    }
}
