//! Error types for the OAuth proxy
//!
//! [`Error`] is the internal error used below the HTTP layer. Endpoints turn
//! every failure into an [`OAuthError`], which only ever speaks the standard
//! OAuth error vocabulary to callers.

use std::io;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for the proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Internal proxy errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing or unreadable provider credentials, bad config file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The upstream identity provider rejected an exchange or refresh
    #[error("Upstream provider error: {0}")]
    Upstream(String),

    /// The upstream provider rejected the presented access token
    #[error("Upstream provider rejected the access token")]
    TokenRejected,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// OAuth error codes (RFC 6749 §5.2, RFC 7591 §3.2.2)
pub mod codes {
    /// Missing or malformed parameter
    pub const INVALID_REQUEST: &str = "invalid_request";
    /// Client authentication failed
    pub const INVALID_CLIENT: &str = "invalid_client";
    /// Code, state or refresh token invalid, expired or already used
    pub const INVALID_GRANT: &str = "invalid_grant";
    /// Grant type not supported by this server
    pub const UNSUPPORTED_GRANT_TYPE: &str = "unsupported_grant_type";
    /// Response type not supported by this server
    pub const UNSUPPORTED_RESPONSE_TYPE: &str = "unsupported_response_type";
    /// Operator-side failure
    pub const SERVER_ERROR: &str = "server_error";
    /// Bearer token rejected by the provider
    pub const INVALID_TOKEN: &str = "invalid_token";
}

/// Error returned from an OAuth endpoint.
///
/// Serializes as `{"error": ..., "error_description": ...}`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OAuthError {
    /// HTTP status of the response
    #[serde(skip)]
    pub status: StatusCode,
    /// OAuth error code
    pub error: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl OAuthError {
    /// Create an error with an explicit status
    pub fn new(status: StatusCode, error: impl Into<String>, description: Option<String>) -> Self {
        Self {
            status,
            error: error.into(),
            error_description: description,
        }
    }

    /// 400 `invalid_request`
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::INVALID_REQUEST, Some(description.into()))
    }

    /// 401 `invalid_client`
    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, codes::INVALID_CLIENT, Some(description.into()))
    }

    /// 400 `invalid_grant`
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::INVALID_GRANT, Some(description.into()))
    }

    /// 400 `unsupported_grant_type`
    pub fn unsupported_grant_type(grant_type: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            codes::UNSUPPORTED_GRANT_TYPE,
            Some(format!("grant_type '{grant_type}' is not supported")),
        )
    }

    /// 400 `unsupported_response_type`
    pub fn unsupported_response_type(response_type: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            codes::UNSUPPORTED_RESPONSE_TYPE,
            Some(format!("response_type '{response_type}' is not supported")),
        )
    }

    /// 500 `server_error`
    pub fn server_error(description: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::SERVER_ERROR,
            Some(description.into()),
        )
    }
}

impl From<Error> for OAuthError {
    fn from(err: Error) -> Self {
        match err {
            Error::Config(_) => Self::server_error("authorization server is not configured"),
            Error::Upstream(_) | Error::TokenRejected | Error::Http(_) => {
                Self::invalid_grant("upstream authorization failed")
            }
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => {
                Self::server_error("internal error")
            }
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = self.status;
        let mut response = (status, Json(self)).into_response();
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

impl std::fmt::Display for OAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {desc}", self.error),
            None => f.write_str(&self.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_become_server_errors() {
        let err: OAuthError = Error::Config("no credentials".to_string()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error, codes::SERVER_ERROR);
        // Internal detail never leaks
        assert!(!err.to_string().contains("no credentials"));
    }

    #[test]
    fn upstream_errors_become_invalid_grant() {
        let err: OAuthError = Error::Upstream("HTTP 400 - bad code".to_string()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.error, codes::INVALID_GRANT);
        assert!(!err.to_string().contains("bad code"));
    }

    #[test]
    fn body_omits_missing_description() {
        let err = OAuthError::new(StatusCode::BAD_REQUEST, "access_denied", None);
        let body = serde_json::to_value(&err).unwrap();
        assert_eq!(body, serde_json::json!({"error": "access_denied"}));
    }

    #[test]
    fn invalid_client_is_unauthorized() {
        let err = OAuthError::invalid_client("client mismatch");
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.error, "invalid_client");
    }
}
