//! Shared fixtures: a fake identity provider and router helpers
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use chrono::Utc;
use contacts_oauth_proxy::{
    Error, Result,
    config::Config,
    gateway::create_router,
    oauth::{ProxyState, UpstreamProvider, UpstreamToken},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;

pub const BASE_URL: &str = "https://proxy.example";
pub const CLIENT_REDIRECT: &str = "https://client.example/cb";

// RFC 7636 Appendix B
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
pub const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

/// Provider code the fake refuses to exchange
pub const BAD_PROVIDER_CODE: &str = "bad-provider-code";
/// Refresh token the fake refuses
pub const REVOKED_REFRESH_TOKEN: &str = "revoked";

/// In-process stand-in for the identity provider.
#[derive(Default)]
pub struct FakeUpstream {
    /// Issue a new refresh token on refresh
    pub rotate_refresh: bool,
    /// Provider codes redeemed so far
    pub exchanged: Mutex<Vec<String>>,
}

impl FakeUpstream {
    pub fn access_token_for(code: &str) -> String {
        format!("upstream-access-{code}")
    }
}

#[async_trait::async_trait]
impl UpstreamProvider for FakeUpstream {
    async fn authorization_url(&self, state: &str) -> Result<String> {
        let mut url = Url::parse("https://idp.example/authorize").unwrap();
        url.query_pairs_mut()
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<UpstreamToken> {
        if code == BAD_PROVIDER_CODE {
            return Err(Error::Upstream("HTTP 400 - invalid_grant".to_string()));
        }
        self.exchanged.lock().unwrap().push(code.to_string());
        Ok(UpstreamToken {
            access_token: Self::access_token_for(code),
            refresh_token: Some("upstream-refresh".to_string()),
            expiry: Some(Utc::now() + chrono::Duration::seconds(3600)),
            scope: Some("openid email".to_string()),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<UpstreamToken> {
        if refresh_token == REVOKED_REFRESH_TOKEN {
            return Err(Error::Upstream("HTTP 400 - token revoked".to_string()));
        }
        Ok(UpstreamToken {
            access_token: "upstream-access-refreshed".to_string(),
            refresh_token: self.rotate_refresh.then(|| "upstream-refresh-rotated".to_string()),
            expiry: Some(Utc::now() + chrono::Duration::seconds(3600)),
            scope: None,
        })
    }

    async fn userinfo(&self, access_token: &str) -> Result<Value> {
        if access_token.starts_with("upstream-access-") {
            Ok(json!({"email": "user@example.com", "sub": "1234"}))
        } else {
            Err(Error::TokenRejected)
        }
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.public_url = Some(BASE_URL.to_string());
    config
}

/// A proxy wired to a fake provider
pub struct TestProxy {
    pub state: ProxyState,
    pub upstream: Arc<FakeUpstream>,
    pub app: Router,
}

impl TestProxy {
    pub fn new() -> Self {
        Self::with(test_config(), FakeUpstream::default())
    }

    pub fn with(config: Config, upstream: FakeUpstream) -> Self {
        let upstream = Arc::new(upstream);
        let state = ProxyState::new(&config, Arc::clone(&upstream) as Arc<dyn UpstreamProvider>);
        let app = create_router(state.clone(), Duration::from_secs(5));
        Self {
            state,
            upstream,
            app,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> Response<Body> {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_form(&self, uri: &str, pairs: &[(&str, &str)]) -> Response<Body> {
        self.send(form_request(uri, pairs)).await
    }

    /// Register a client bound to [`CLIENT_REDIRECT`], returning `(client_id, client_secret)`
    pub async fn register(&self) -> (String, String) {
        let response = self
            .post_json("/oauth/register", &json!({"redirect_uris": [CLIENT_REDIRECT]}))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        (
            body["client_id"].as_str().unwrap().to_string(),
            body["client_secret"].as_str().unwrap().to_string(),
        )
    }

    /// Start an authorization and return the provider-facing state
    pub async fn authorize(&self, client_id: &str, extra: &[(&str, &str)]) -> String {
        let mut params = vec![
            ("client_id", client_id),
            ("redirect_uri", CLIENT_REDIRECT),
            ("response_type", "code"),
        ];
        params.extend_from_slice(extra);
        let response = self
            .get(&format!("/oauth/authorize?{}", serde_urlencoded::to_string(&params).unwrap()))
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        query_param(&location(&response), "state").unwrap()
    }

    /// Simulate the provider redirecting back, returning the client redirect
    pub async fn callback(&self, provider_code: &str, provider_state: &str) -> Response<Body> {
        let query = serde_urlencoded::to_string([("code", provider_code), ("state", provider_state)])
            .unwrap();
        self.get(&format!("/oauth/callback?{query}")).await
    }

    /// Run authorize + callback with the RFC 7636 challenge; returns our code
    pub async fn issue_code(&self, client_id: &str, provider_code: &str) -> String {
        let provider_state = self
            .authorize(
                client_id,
                &[("code_challenge", CHALLENGE), ("code_challenge_method", "S256")],
            )
            .await;
        let response = self.callback(provider_code, &provider_state).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        query_param(&location(&response), "code").unwrap()
    }
}

pub fn form_request(uri: &str, pairs: &[(&str, &str)]) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(serde_urlencoded::to_string(pairs).unwrap()))
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn location(response: &Response<Body>) -> Url {
    let value = response.headers()[header::LOCATION].to_str().unwrap();
    Url::parse(value).unwrap()
}

pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
