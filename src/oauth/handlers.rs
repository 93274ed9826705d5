//! HTTP handlers for the authorization server endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/oauth/register` | Dynamic client registration (RFC 7591) |
//! | `GET` | `/oauth/authorize` | Start an authorization, redirect to the provider |
//! | `GET` | `/oauth/callback` | Provider redirect target, mints our code |
//! | `POST` | `/oauth/token` | `authorization_code` and `refresh_token` grants |
//!
//! ## Provider-facing state
//!
//! The `state` sent to the provider carries both our internal state token and
//! the caller's own `state`, as `BASE64URL(JSON {"t": token, "s": client_state})`.
//! The callback decodes it back into the two fields, so the caller's value is
//! returned verbatim whatever characters it contains.

use axum::{
    Json,
    body::Bytes,
    extract::{Form, Query, State, rejection::FormRejection, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::{
    ProxyState,
    pkce,
    registry::{ResolveError, is_valid_redirect_uri},
    store::{AuthorizationCode, AuthorizationState, generate_token},
    upstream::UpstreamToken,
};
use crate::error::OAuthError;

// ── Request / Response types ───────────────────────────────────────────────

/// RFC 7591 client registration request.
#[derive(Debug, Default, Deserialize)]
pub struct RegistrationRequest {
    /// Display name
    #[serde(default)]
    pub client_name: Option<String>,
    /// Redirect URIs (required, non-empty)
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Requested grant types
    #[serde(default)]
    pub grant_types: Option<Vec<String>>,
    /// Requested response types
    #[serde(default)]
    pub response_types: Option<Vec<String>>,
    /// Requested token endpoint auth method
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
}

/// RFC 7591 client information response.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationResponse {
    /// Issued client id
    pub client_id: String,
    /// Issued client secret
    pub client_secret: String,
    /// Issue time (seconds since the epoch)
    pub client_id_issued_at: i64,
    /// Always `0`: the secret never expires
    pub client_secret_expires_at: i64,
    /// Registered redirect URIs
    pub redirect_uris: Vec<String>,
    /// Granted grant types
    pub grant_types: Vec<String>,
    /// Granted response types
    pub response_types: Vec<String>,
    /// Token endpoint auth method
    pub token_endpoint_auth_method: String,
    /// Display name, echoed when supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

/// `/oauth/authorize` query.
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeParams {
    client_id: Option<String>,
    redirect_uri: Option<String>,
    response_type: Option<String>,
    state: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

/// `/oauth/callback` query, as sent by the provider.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// `/oauth/token` form.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    grant_type: Option<String>,
    code: Option<String>,
    redirect_uri: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    code_verifier: Option<String>,
    refresh_token: Option<String>,
}

/// Successful token endpoint response (RFC 6749 §5.1).
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Provider access token
    pub access_token: String,
    /// Always `"Bearer"`
    pub token_type: String,
    /// Seconds until the provider token expires, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Provider refresh token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scope (space separated)
    pub scope: String,
}

/// The two halves of the provider-facing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderState {
    /// Internal state token (key into the state store)
    #[serde(rename = "t")]
    pub token: String,
    /// Caller's own `state`, returned verbatim
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
}

impl ProviderState {
    /// Encode for the provider round trip.
    #[must_use]
    pub fn encode(&self) -> String {
        // Serializing two strings cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a value returned by the provider.
    #[must_use]
    pub fn decode(value: &str) -> Option<Self> {
        let json = URL_SAFE_NO_PAD.decode(value).ok()?;
        let state: Self = serde_json::from_slice(&json).ok()?;
        (!state.token.is_empty()).then_some(state)
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// 302 Found to `location`
fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => OAuthError::server_error("invalid redirect location").into_response(),
    }
}

/// Token responses must never be cached (RFC 6749 §5.1)
fn token_response(body: TokenResponse) -> Response {
    (
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
            (header::PRAGMA, HeaderValue::from_static("no-cache")),
        ],
        Json(body),
    )
        .into_response()
}

fn required(value: Option<String>, name: &str) -> Result<String, OAuthError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::invalid_request(format!("{name} is required")))
}

/// Client credentials presented at the token endpoint.
#[derive(Debug, Default, PartialEq, Eq)]
struct ClientAuth {
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl ClientAuth {
    /// Credentials from exactly one source: HTTP Basic (`client_secret_basic`)
    /// when the header is present, otherwise the form (`client_secret_post`).
    ///
    /// A form `client_secret` alongside Basic is rejected, and a form
    /// `client_id` must name the same client as the Basic header.
    fn from_request(headers: &HeaderMap, form: &TokenRequest) -> Result<Self, OAuthError> {
        let form_id = form.client_id.clone().filter(|s| !s.is_empty());
        let form_secret = form.client_secret.clone().filter(|s| !s.is_empty());

        let Some((basic_id, basic_secret)) = basic_credentials(headers)? else {
            return Ok(Self {
                client_id: form_id,
                client_secret: form_secret,
            });
        };

        if form_secret.is_some() {
            return Err(OAuthError::invalid_request(
                "multiple client authentication methods",
            ));
        }
        if form_id.is_some_and(|id| id != basic_id) {
            return Err(OAuthError::invalid_client(
                "client_id does not match the Authorization header",
            ));
        }

        Ok(Self {
            client_id: Some(basic_id).filter(|s| !s.is_empty()),
            client_secret: Some(basic_secret).filter(|s| !s.is_empty()),
        })
    }

    /// Check the presented identity against the client a grant is bound to.
    fn authenticate(&self, state: &ProxyState, bound_client_id: &str) -> Result<(), OAuthError> {
        if let Some(client_id) = &self.client_id {
            if client_id != bound_client_id {
                return Err(OAuthError::invalid_client("client_id does not match the grant"));
            }
        }

        if let Some(secret) = &self.client_secret {
            let authenticated = state
                .registry
                .get(bound_client_id)
                .is_some_and(|client| client.secret_matches(secret));
            if !authenticated {
                return Err(OAuthError::invalid_client("client authentication failed"));
            }
        }

        Ok(())
    }
}

/// Decode `Authorization: Basic base64(id:secret)`.
///
/// Both halves are form-urlencoded (RFC 6749 §2.3.1). Returns `Ok(None)` when
/// no Basic header is present and `invalid_client` when one is malformed.
fn basic_credentials(headers: &HeaderMap) -> Result<Option<(String, String)>, OAuthError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let Some((scheme, encoded)) = value.to_str().ok().and_then(|v| v.split_once(' ')) else {
        return Ok(None);
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Ok(None);
    }

    let malformed = || OAuthError::invalid_client("malformed Basic credentials");
    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| malformed())?;
    let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (id, secret) = decoded.split_once(':').ok_or_else(malformed)?;
    Ok(Some((
        form_urldecode(id).ok_or_else(malformed)?,
        form_urldecode(secret).ok_or_else(malformed)?,
    )))
}

/// `application/x-www-form-urlencoded` decoding of a single value
fn form_urldecode(value: &str) -> Option<String> {
    urlencoding::decode(&value.replace('+', " "))
        .ok()
        .map(std::borrow::Cow::into_owned)
}

// ── Handlers ───────────────────────────────────────────────────────────────

/// `POST /oauth/register`
///
/// Takes the raw body so malformed JSON is reported as `invalid_request`
/// rather than axum's plain-text rejection.
pub async fn register(State(state): State<ProxyState>, body: Bytes) -> Result<Response, OAuthError> {
    let request: RegistrationRequest = serde_json::from_slice(&body)
        .map_err(|e| OAuthError::invalid_request(format!("invalid client metadata: {e}")))?;

    if request.redirect_uris.is_empty() {
        return Err(OAuthError::invalid_request("redirect_uris is required"));
    }
    if let Some(bad) = request
        .redirect_uris
        .iter()
        .find(|uri| !is_valid_redirect_uri(uri))
    {
        return Err(OAuthError::invalid_request(format!("invalid redirect_uri: {bad}")));
    }

    let client = state
        .registry
        .register(request.redirect_uris.clone(), request.client_name);

    let response = RegistrationResponse {
        client_id: client.client_id,
        client_secret: client.client_secret,
        client_id_issued_at: client.created_at.timestamp(),
        client_secret_expires_at: 0,
        redirect_uris: request.redirect_uris,
        grant_types: request.grant_types.unwrap_or_else(|| {
            vec!["authorization_code".to_string(), "refresh_token".to_string()]
        }),
        response_types: request
            .response_types
            .unwrap_or_else(|| vec!["code".to_string()]),
        token_endpoint_auth_method: request
            .token_endpoint_auth_method
            .unwrap_or_else(|| "client_secret_basic".to_string()),
        client_name: client.client_name,
    };

    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// `GET /oauth/authorize`
pub async fn authorize(
    State(state): State<ProxyState>,
    query: Result<Query<AuthorizeParams>, QueryRejection>,
) -> Result<Response, OAuthError> {
    let Query(params) = query.map_err(|e| OAuthError::invalid_request(e.body_text()))?;

    let client_id = required(params.client_id, "client_id")?;
    let redirect_uri = required(params.redirect_uri, "redirect_uri")?;
    match params.response_type.as_deref() {
        Some("code") => {}
        None | Some("") => return Err(OAuthError::invalid_request("response_type is required")),
        Some(other) => return Err(OAuthError::unsupported_response_type(other)),
    }

    state
        .registry
        .resolve_or_auto_register(&client_id, &redirect_uri)
        .map_err(|e| match e {
            ResolveError::InvalidRedirectUri(uri) => {
                OAuthError::invalid_request(format!("invalid redirect_uri: {uri}"))
            }
            ResolveError::UnknownClient => OAuthError::invalid_client("unknown client_id"),
            ResolveError::RedirectUriNotRegistered => {
                OAuthError::invalid_request("redirect_uri is not registered for this client")
            }
        })?;

    let token = generate_token();
    let provider_state = ProviderState {
        token: token.clone(),
        client_state: params.state.filter(|s| !s.is_empty()),
    };

    let consent_url = state
        .upstream
        .authorization_url(&provider_state.encode())
        .await
        .map_err(|e| {
            warn!(client_id = %client_id, error = %e, "Failed to build provider consent URL");
            OAuthError::from(e)
        })?;

    state
        .states
        .insert(
            token,
            AuthorizationState {
                client_id: client_id.clone(),
                redirect_uri,
                code_challenge: params.code_challenge.unwrap_or_default(),
                code_challenge_method: params.code_challenge_method,
                created_at: Utc::now(),
            },
        )
        .await;

    info!(client_id = %client_id, "Authorization started, redirecting to provider");
    Ok(found(&consent_url))
}

/// `GET /oauth/callback`
pub async fn callback(
    State(state): State<ProxyState>,
    query: Result<Query<CallbackParams>, QueryRejection>,
) -> Result<Response, OAuthError> {
    let Query(params) = query.map_err(|e| OAuthError::invalid_request(e.body_text()))?;

    if let Some(error) = params.error.filter(|e| !e.is_empty()) {
        warn!(error = %error, "Provider returned an authorization error");
        return Err(OAuthError::new(
            StatusCode::BAD_REQUEST,
            error,
            params.error_description,
        ));
    }

    let provider_code = required(params.code, "code")?;
    let raw_state = required(params.state, "state")?;
    let provider_state = ProviderState::decode(&raw_state)
        .ok_or_else(|| OAuthError::invalid_request("malformed state"))?;

    // Consumed here, before any further validation
    let pending = state
        .states
        .take(&provider_state.token)
        .await
        .ok_or_else(|| OAuthError::invalid_request("unknown or expired state"))?;

    let upstream_token = state
        .upstream
        .exchange_code(&provider_code)
        .await
        .map_err(|e| {
            warn!(client_id = %pending.client_id, error = %e, "Provider code exchange failed");
            OAuthError::invalid_grant("upstream authorization failed")
        })?;

    let mut redirect = Url::parse(&pending.redirect_uri)
        .map_err(|_| OAuthError::invalid_request("invalid redirect_uri"))?;
    let code = generate_token();
    {
        let mut query = redirect.query_pairs_mut();
        query.append_pair("code", &code);
        if let Some(client_state) = &provider_state.client_state {
            query.append_pair("state", client_state);
        }
    }

    let client_id = pending.client_id.clone();
    state
        .codes
        .insert(code, AuthorizationCode::from_state(pending, upstream_token))
        .await;

    info!(client_id = %client_id, "Authorization code issued");
    Ok(found(redirect.as_str()))
}

/// `POST /oauth/token`
pub async fn token(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<Response, OAuthError> {
    let Form(request) = form.map_err(|e| OAuthError::invalid_request(e.body_text()))?;
    let client = ClientAuth::from_request(&headers, &request)?;

    let grant_type = required(request.grant_type.clone(), "grant_type")?;
    debug!(grant_type = %grant_type, client_id = ?client.client_id, "Token request");

    match grant_type.as_str() {
        "authorization_code" => authorization_code_grant(&state, &client, request).await,
        "refresh_token" => refresh_token_grant(&state, &client, request).await,
        other => Err(OAuthError::unsupported_grant_type(other)),
    }
}

async fn authorization_code_grant(
    state: &ProxyState,
    client: &ClientAuth,
    request: TokenRequest,
) -> Result<Response, OAuthError> {
    let code = required(request.code, "code")?;

    let issued = state
        .codes
        .take(&code)
        .await
        .ok_or_else(|| OAuthError::invalid_grant("invalid or expired authorization code"))?;

    client.authenticate(state, &issued.client_id)?;

    if let Some(redirect_uri) = request.redirect_uri.filter(|s| !s.is_empty()) {
        if redirect_uri != issued.redirect_uri {
            return Err(OAuthError::invalid_grant("redirect_uri does not match"));
        }
    }

    pkce::verify(
        &issued.code_challenge,
        issued.code_challenge_method.as_deref(),
        request.code_verifier.as_deref(),
    )
    .map_err(|failure| {
        warn!(client_id = %issued.client_id, ?failure, "PKCE verification failed");
        OAuthError::invalid_grant(failure.description())
    })?;

    info!(client_id = %issued.client_id, "Authorization code exchanged");
    Ok(token_response(reshape(state, issued.upstream_token, None)))
}

async fn refresh_token_grant(
    state: &ProxyState,
    client: &ClientAuth,
    request: TokenRequest,
) -> Result<Response, OAuthError> {
    let refresh_token = required(request.refresh_token, "refresh_token")?;

    if let Some(client_id) = &client.client_id {
        if state.registry.get(client_id).is_none() {
            return Err(OAuthError::invalid_client("unknown client_id"));
        }
        client.authenticate(state, client_id)?;
    }

    let refreshed = state.upstream.refresh(&refresh_token).await.map_err(|e| {
        warn!(client_id = ?client.client_id, error = %e, "Provider refresh failed");
        OAuthError::invalid_grant("upstream refresh failed")
    })?;

    info!(client_id = ?client.client_id, "Token refreshed");
    Ok(token_response(reshape(state, refreshed, Some(refresh_token))))
}

/// Present a provider token as our own token response.
///
/// `previous_refresh` is echoed when the provider did not rotate it.
fn reshape(state: &ProxyState, token: UpstreamToken, previous_refresh: Option<String>) -> TokenResponse {
    TokenResponse {
        expires_in: token.expires_in(Utc::now()),
        refresh_token: token.refresh_token.or(previous_refresh),
        scope: token.scope.unwrap_or_else(|| state.scopes.join(" ")),
        access_token: token.access_token,
        token_type: "Bearer".to_string(),
    }
}
