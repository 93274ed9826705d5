//! OAuth 2.1 authorization-server proxy
//!
//! Issues its own client identities and authorization codes to API clients
//! while brokering a second, independent OAuth exchange with the upstream
//! identity provider. Provider tokens are handed to clients verbatim, so the
//! protected API can use a presented bearer token directly against the provider.
//!
//! Features:
//! - Dynamic client registration (RFC 7591) and auto-registration
//! - Authorize/callback bridge to the identity provider
//! - Token endpoint (`authorization_code` and `refresh_token` grants) with PKCE
//! - Bearer validation middleware for the protected API
//! - Metadata discovery documents (RFC 8414, RFC 9728)
//! - Background reaper for expired states and codes

pub mod bearer;
pub mod credentials;
pub mod handlers;
pub mod metadata;
pub mod pkce;
pub mod registry;
pub mod store;
pub mod upstream;

use std::sync::Arc;

pub use bearer::ProviderCredentials;
pub use credentials::{CredentialLoader, ProviderClient};
pub use metadata::{AuthorizationServerMetadata, ProtectedResourceMetadata};
pub use registry::{ClientRegistry, RegisteredClient};
pub use store::{AuthorizationCode, AuthorizationState, FlowStore, InMemoryFlowStore, spawn_reaper};
pub use upstream::{HttpUpstream, UpstreamProvider, UpstreamToken};

use crate::config::Config;

/// Shared state handed to every OAuth endpoint and the bearer middleware.
///
/// Cheap to clone; every field is reference counted.
#[derive(Clone)]
pub struct ProxyState {
    /// Externally visible base URL, without a trailing slash
    pub base_url: Arc<str>,
    /// Path prefix of the protected API
    pub resource_path: Arc<str>,
    /// Scopes reported when the provider does not echo a granted scope
    pub scopes: Arc<[String]>,
    /// Registered clients
    pub registry: Arc<ClientRegistry>,
    /// Pending authorizations
    pub states: Arc<dyn FlowStore<AuthorizationState>>,
    /// Issued authorization codes
    pub codes: Arc<dyn FlowStore<AuthorizationCode>>,
    /// Provider-facing half of the flow
    pub upstream: Arc<dyn UpstreamProvider>,
    /// Published authorization server document
    pub authorization_server_metadata: Arc<AuthorizationServerMetadata>,
    /// Published protected resource document
    pub protected_resource_metadata: Arc<ProtectedResourceMetadata>,
}

impl ProxyState {
    /// Build the proxy state from configuration around an upstream bridge.
    #[must_use]
    pub fn new(config: &Config, upstream: Arc<dyn UpstreamProvider>) -> Self {
        let base_url = config.server.base_url();
        let scopes = config.provider.scopes.clone();

        Self {
            authorization_server_metadata: Arc::new(AuthorizationServerMetadata::for_base_url(
                &base_url, &scopes,
            )),
            protected_resource_metadata: Arc::new(ProtectedResourceMetadata::for_base_url(
                &base_url, &scopes,
            )),
            resource_path: normalize_resource_path(&config.oauth.resource_path).into(),
            base_url: base_url.into(),
            scopes: scopes.into(),
            registry: Arc::new(ClientRegistry::new(config.oauth.auto_register)),
            states: Arc::new(InMemoryFlowStore::new(config.oauth.state_ttl)),
            codes: Arc::new(InMemoryFlowStore::new(config.oauth.code_ttl)),
            upstream,
        }
    }
}

/// `/oauth/callback` under `base_url`
#[must_use]
pub fn callback_url(base_url: &str) -> String {
    format!("{base_url}/oauth/callback")
}

/// Force a leading slash and strip trailing ones; an empty path becomes `/api`.
#[must_use]
pub fn normalize_resource_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/api".to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_path_normalization() {
        assert_eq!(normalize_resource_path("/api"), "/api");
        assert_eq!(normalize_resource_path("api/"), "/api");
        assert_eq!(normalize_resource_path("/v1/contacts/"), "/v1/contacts");
        assert_eq!(normalize_resource_path(""), "/api");
        assert_eq!(normalize_resource_path("/"), "/api");
    }

    #[test]
    fn callback_url_is_under_base() {
        assert_eq!(
            callback_url("https://proxy.example"),
            "https://proxy.example/oauth/callback"
        );
    }
}
