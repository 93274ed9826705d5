//! Bearer validation for the protected API
//!
//! The proxy hands provider tokens to clients verbatim, so it cannot tell its
//! own tokens from anyone else's. Validation is therefore deferred: the
//! middleware wraps the presented token into [`ProviderCredentials`] and the
//! provider decides on first use. A missing token is rejected up front with a
//! challenge pointing at the protected resource metadata.

use std::sync::Arc;

use axum::{
    Extension, Json,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, warn};

use super::ProxyState;
use super::metadata::resource_metadata_url;
use super::upstream::{UpstreamProvider, UpstreamToken};
use crate::error::codes;
use crate::{Error, Result};

/// Provider credentials resolved from a bearer token.
///
/// Inserted into request extensions by [`require_bearer`] for downstream
/// handlers to call the provider with.
pub struct ProviderCredentials {
    token: Mutex<UpstreamToken>,
    upstream: Arc<dyn UpstreamProvider>,
}

impl ProviderCredentials {
    /// Wrap a provider token.
    #[must_use]
    pub fn new(token: UpstreamToken, upstream: Arc<dyn UpstreamProvider>) -> Self {
        Self {
            token: Mutex::new(token),
            upstream,
        }
    }

    /// Wrap a bare access token presented as a bearer.
    #[must_use]
    pub fn from_bearer(access_token: &str, upstream: Arc<dyn UpstreamProvider>) -> Self {
        Self::new(
            UpstreamToken {
                access_token: access_token.to_string(),
                refresh_token: None,
                expiry: None,
                scope: None,
            },
            upstream,
        )
    }

    /// Current access token
    #[must_use]
    pub fn access_token(&self) -> String {
        self.token.lock().access_token.clone()
    }

    /// Obtain a new access token from the provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenRejected`] if no refresh token is known, or the
    /// provider's error if the refresh fails.
    pub async fn refresh(&self) -> Result<String> {
        let refresh_token = self
            .token
            .lock()
            .refresh_token
            .clone()
            .ok_or(Error::TokenRejected)?;

        let mut refreshed = self.upstream.refresh(&refresh_token).await?;
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }
        let access_token = refreshed.access_token.clone();
        *self.token.lock() = refreshed;
        Ok(access_token)
    }

    /// Fetch the provider userinfo document.
    ///
    /// With a refresh token known, an access token past its expiry is
    /// refreshed before the call, and a rejected one is refreshed once and
    /// the call retried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenRejected`] when the provider rejects the token.
    pub async fn userinfo(&self) -> Result<serde_json::Value> {
        let (expired, can_refresh) = {
            let token = self.token.lock();
            (token.is_expired(Utc::now()), token.refresh_token.is_some())
        };

        if expired && can_refresh {
            debug!("Provider access token expired, refreshing before use");
            let access_token = self.refresh().await.map_err(|_| Error::TokenRejected)?;
            return self.upstream.userinfo(&access_token).await;
        }

        match self.upstream.userinfo(&self.access_token()).await {
            Err(Error::TokenRejected) if can_refresh => {
                let access_token = self.refresh().await.map_err(|_| Error::TokenRejected)?;
                self.upstream.userinfo(&access_token).await
            }
            other => other,
        }
    }
}

/// 401 with a `WWW-Authenticate` challenge pointing at the resource metadata.
///
/// `error` is added to the challenge when a token was presented and rejected.
/// Without one the body reports `invalid_request` and the challenge carries no
/// error code (RFC 6750 §3.1).
#[must_use]
pub fn unauthorized(base_url: &str, error: Option<&str>) -> Response {
    let metadata_url = resource_metadata_url(base_url);
    let (challenge, body) = match error {
        Some(error) => (
            format!(r#"Bearer resource_metadata="{metadata_url}", error="{error}""#),
            json!({"error": error, "error_description": "The access token was rejected"}),
        ),
        None => (
            format!(r#"Bearer resource_metadata="{metadata_url}""#),
            json!({"error": codes::INVALID_REQUEST, "error_description": "Missing bearer token"}),
        ),
    };

    let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Authentication middleware for the protected API
pub async fn require_bearer(
    State(state): State<ProxyState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string);

    let Some(token) = token else {
        debug!(path = %request.uri().path(), "Protected API request without bearer token");
        return unauthorized(&state.base_url, None);
    };

    let credentials = Arc::new(ProviderCredentials::from_bearer(
        &token,
        Arc::clone(&state.upstream),
    ));
    request.extensions_mut().insert(credentials);

    next.run(request).await
}

/// `GET {resource_path}/userinfo`
pub async fn userinfo(
    State(state): State<ProxyState>,
    Extension(credentials): Extension<Arc<ProviderCredentials>>,
) -> Response {
    match credentials.userinfo().await {
        Ok(document) => Json(document).into_response(),
        Err(Error::TokenRejected) => {
            debug!("Provider rejected bearer token");
            unauthorized(&state.base_url, Some(codes::INVALID_TOKEN))
        }
        Err(e) => {
            warn!(error = %e, "Provider userinfo request failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": codes::SERVER_ERROR,
                    "error_description": "upstream provider request failed",
                })),
            )
                .into_response()
        }
    }
}

/// Anything else under the protected prefix
pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "not_found"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[test]
    fn challenge_without_error() {
        let response = unauthorized("https://proxy.example", None);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            r#"Bearer resource_metadata="https://proxy.example/.well-known/oauth-protected-resource""#
        );
    }

    #[tokio::test]
    async fn missing_token_body_is_invalid_request() {
        let response = unauthorized("https://proxy.example", None);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "invalid_request");
    }

    #[test]
    fn challenge_with_invalid_token() {
        let response = unauthorized("https://proxy.example", Some("invalid_token"));
        let header = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
        assert!(header.contains(r#"resource_metadata="https://proxy.example/.well-known/oauth-protected-resource""#));
        assert!(header.contains(r#"error="invalid_token""#));
    }
}
