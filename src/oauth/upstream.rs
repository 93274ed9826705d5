//! Upstream Bridge
//!
//! The second, independent OAuth exchange this proxy runs against the
//! identity provider. Callers never see the provider's client credentials:
//! the bridge builds the consent URL, redeems the provider's code at its
//! token endpoint, and refreshes provider tokens on the caller's behalf.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::credentials::CredentialLoader;
use crate::config::ProviderConfig;
use crate::{Error, Result};

/// Opaque credential obtained from the identity provider.
///
/// Never persisted; held in memory inside an authorization code until the
/// client exchanges it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamToken {
    /// Provider access token
    pub access_token: String,
    /// Provider refresh token (absent when the provider did not issue one)
    pub refresh_token: Option<String>,
    /// When the access token expires, if the provider said
    pub expiry: Option<DateTime<Utc>>,
    /// Scopes the provider granted
    pub scope: Option<String>,
}

impl UpstreamToken {
    /// Seconds until the access token expires (never negative)
    #[must_use]
    pub fn expires_in(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expiry
            .map(|expiry| expiry.signed_duration_since(now).num_seconds().max(0))
    }

    /// `true` once the access token has expired
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

/// Provider token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

impl TokenResponse {
    fn into_token(self) -> UpstreamToken {
        UpstreamToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expiry: self.expires_in.and_then(|secs| {
                chrono::Duration::try_seconds(secs)
                    .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            }),
            scope: self.scope,
        }
    }
}

/// The provider-facing half of the proxy.
///
/// The HTTP implementation is [`HttpUpstream`]; tests substitute a fake.
#[async_trait::async_trait]
pub trait UpstreamProvider: Send + Sync + 'static {
    /// Build the provider consent URL carrying `state` through the round trip.
    ///
    /// Always requests offline access and forces re-consent so a refresh
    /// token is issued even on repeat authorizations.
    async fn authorization_url(&self, state: &str) -> Result<String>;

    /// Redeem a provider authorization code.
    async fn exchange_code(&self, code: &str) -> Result<UpstreamToken>;

    /// Obtain a new access token with a provider refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<UpstreamToken>;

    /// Fetch the provider's userinfo document with an access token.
    ///
    /// Returns [`Error::TokenRejected`] when the provider answers 401.
    async fn userinfo(&self, access_token: &str) -> Result<serde_json::Value>;
}

/// Upstream bridge speaking OAuth 2.0 over HTTP.
pub struct HttpUpstream {
    http_client: Client,
    config: ProviderConfig,
    credentials: Arc<CredentialLoader>,
}

impl HttpUpstream {
    /// Create a bridge for the configured provider.
    #[must_use]
    pub fn new(http_client: Client, config: ProviderConfig, credentials: Arc<CredentialLoader>) -> Self {
        Self {
            http_client,
            config,
            credentials,
        }
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<UpstreamToken> {
        let response = self
            .http_client
            .post(&self.config.token_endpoint)
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Provider token endpoint rejected request");
            return Err(Error::Upstream(format!("HTTP {status} - {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("Failed to parse token response: {e}")))?;
        Ok(token.into_token())
    }
}

#[async_trait::async_trait]
impl UpstreamProvider for HttpUpstream {
    async fn authorization_url(&self, state: &str) -> Result<String> {
        let creds = self.credentials.load().await?;

        let mut url = Url::parse(&self.config.authorization_endpoint)
            .map_err(|e| Error::Config(format!("Invalid authorization endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &creds.client_id)
            .append_pair("redirect_uri", &creds.redirect_uri)
            .append_pair("scope", &creds.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");

        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<UpstreamToken> {
        let creds = self.credentials.load().await?;
        debug!(client_id = %creds.client_id, "Exchanging provider authorization code");

        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("redirect_uri", creds.redirect_uri.as_str()),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<UpstreamToken> {
        let creds = self.credentials.load().await?;
        debug!(client_id = %creds.client_id, "Refreshing provider token");

        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
        ])
        .await
    }

    async fn userinfo(&self, access_token: &str) -> Result<serde_json::Value> {
        let response = self
            .http_client
            .get(&self.config.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(Error::TokenRejected),
            status if status.is_success() => Ok(response.json().await?),
            status => Err(Error::Upstream(format!("userinfo returned HTTP {status}"))),
        }
    }
}
