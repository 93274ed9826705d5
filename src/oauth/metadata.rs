//! OAuth Metadata Publishing
//!
//! Serves RFC 8414 (Authorization Server Metadata) and RFC 9728 (Protected
//! Resource Metadata) documents so clients can discover this deployment.
//! Both documents are derived from configuration at startup and never change.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use super::ProxyState;
use super::pkce::S256;

/// Well-known path of the protected resource document
pub const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";

/// Well-known path of the authorization server document
pub const AUTHORIZATION_SERVER_PATH: &str = "/.well-known/oauth-authorization-server";

/// OAuth Authorization Server Metadata (RFC 8414)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Authorization server issuer URL
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// Dynamic client registration endpoint
    pub registration_endpoint: String,

    /// Supported scopes
    pub scopes_supported: Vec<String>,

    /// Supported response types
    pub response_types_supported: Vec<String>,

    /// Supported grant types
    pub grant_types_supported: Vec<String>,

    /// Supported PKCE code challenge methods
    pub code_challenge_methods_supported: Vec<String>,

    /// Supported token endpoint auth methods
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

/// OAuth Protected Resource Metadata (RFC 9728)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// Protected resource identifier
    pub resource: String,

    /// Authorization servers that can issue tokens for this resource
    pub authorization_servers: Vec<String>,

    /// Supported bearer token methods
    pub bearer_methods_supported: Vec<String>,

    /// Supported scopes
    pub scopes_supported: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

impl AuthorizationServerMetadata {
    /// Describe the authorization server rooted at `base_url`.
    #[must_use]
    pub fn for_base_url(base_url: &str, scopes: &[String]) -> Self {
        Self {
            issuer: base_url.to_string(),
            authorization_endpoint: format!("{base_url}/oauth/authorize"),
            token_endpoint: format!("{base_url}/oauth/token"),
            registration_endpoint: format!("{base_url}/oauth/register"),
            scopes_supported: scopes.to_vec(),
            response_types_supported: strings(&["code"]),
            grant_types_supported: strings(&["authorization_code", "refresh_token"]),
            code_challenge_methods_supported: strings(&[S256]),
            token_endpoint_auth_methods_supported: strings(&[
                "none",
                "client_secret_basic",
                "client_secret_post",
            ]),
        }
    }
}

impl ProtectedResourceMetadata {
    /// Describe the resource rooted at `base_url`, protected by this server.
    #[must_use]
    pub fn for_base_url(base_url: &str, scopes: &[String]) -> Self {
        Self {
            resource: base_url.to_string(),
            authorization_servers: vec![base_url.to_string()],
            bearer_methods_supported: strings(&["header"]),
            scopes_supported: scopes.to_vec(),
        }
    }
}

/// URL clients are pointed at by the bearer challenge
#[must_use]
pub fn resource_metadata_url(base_url: &str) -> String {
    format!("{base_url}{PROTECTED_RESOURCE_PATH}")
}

/// GET `/.well-known/oauth-authorization-server`
pub async fn authorization_server(State(state): State<ProxyState>) -> Json<AuthorizationServerMetadata> {
    Json(state.authorization_server_metadata.as_ref().clone())
}

/// GET `/.well-known/oauth-protected-resource`
pub async fn protected_resource(State(state): State<ProxyState>) -> Json<ProtectedResourceMetadata> {
    Json(state.protected_resource_metadata.as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes() -> Vec<String> {
        vec!["https://www.googleapis.com/auth/contacts".to_string()]
    }

    #[test]
    fn authorization_server_document_shape() {
        let doc = AuthorizationServerMetadata::for_base_url("https://proxy.example", &scopes());
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["issuer"], "https://proxy.example");
        assert_eq!(json["authorization_endpoint"], "https://proxy.example/oauth/authorize");
        assert_eq!(json["token_endpoint"], "https://proxy.example/oauth/token");
        assert_eq!(json["registration_endpoint"], "https://proxy.example/oauth/register");
        assert_eq!(json["response_types_supported"], serde_json::json!(["code"]));
        assert_eq!(
            json["grant_types_supported"],
            serde_json::json!(["authorization_code", "refresh_token"])
        );
        assert_eq!(json["code_challenge_methods_supported"], serde_json::json!(["S256"]));
        assert_eq!(
            json["token_endpoint_auth_methods_supported"],
            serde_json::json!(["none", "client_secret_basic", "client_secret_post"])
        );
    }

    #[test]
    fn protected_resource_document_shape() {
        let doc = ProtectedResourceMetadata::for_base_url("https://proxy.example", &scopes());
        assert_eq!(doc.resource, "https://proxy.example");
        assert_eq!(doc.authorization_servers, vec!["https://proxy.example"]);
        assert_eq!(doc.bearer_methods_supported, vec!["header"]);
        assert_eq!(doc.scopes_supported, scopes());
    }

    #[test]
    fn resource_metadata_url_is_well_known() {
        assert_eq!(
            resource_metadata_url("http://127.0.0.1:8080"),
            "http://127.0.0.1:8080/.well-known/oauth-protected-resource"
        );
    }
}
