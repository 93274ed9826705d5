//! Client Registry
//!
//! Holds the clients this authorization server has issued identities to,
//! either through dynamic registration (RFC 7591) or implicitly on their
//! first `/oauth/authorize`. Records live for the life of the process.
//!
//! # Auto-registration
//!
//! An unseen `client_id` arriving at `/oauth/authorize` gets a record bound
//! to the presented redirect URI, and a known client presenting a new valid
//! redirect URI has it appended. This lets zero-config callers skip
//! registration. It also means any caller can mint an identity bound to a
//! redirect URI it controls; PKCE, not client identity, is what stops a
//! stolen code from being redeemed. Set `oauth.auto_register: false` for
//! strict registration.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use subtle::ConstantTimeEq;
use tracing::info;
use url::Url;

use super::store::generate_token;

/// A client known to this authorization server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredClient {
    /// Client identifier
    pub client_id: String,
    /// Client secret; empty for public (PKCE-only) clients
    pub client_secret: String,
    /// Allowed redirect URIs
    pub redirect_uris: BTreeSet<String>,
    /// Display name from registration metadata
    pub client_name: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl RegisteredClient {
    /// `true` if the client was issued a secret
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        !self.client_secret.is_empty()
    }

    /// Constant-time comparison of a presented secret
    #[must_use]
    pub fn secret_matches(&self, presented: &str) -> bool {
        self.is_confidential()
            && bool::from(presented.as_bytes().ct_eq(self.client_secret.as_bytes()))
    }
}

/// Why a client could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Redirect URI is not an absolute URL
    InvalidRedirectUri(String),
    /// Unknown client and auto-registration is disabled
    UnknownClient,
    /// Known client, unregistered redirect URI, auto-registration disabled
    RedirectUriNotRegistered,
}

/// Validate that a redirect URI is an absolute URL without a fragment.
///
/// `http` and `https` URIs need a non-empty authority. The raw text is
/// checked because the parser rewrites `https:///host` to `https://host/`.
#[must_use]
pub fn is_valid_redirect_uri(uri: &str) -> bool {
    let Ok(url) = Url::parse(uri) else {
        return false;
    };
    if uri.contains('#') {
        return false;
    }
    match url.scheme() {
        "http" | "https" => {
            let after_scheme = uri.trim_start().get(url.scheme().len()..).unwrap_or_default();
            url.has_host() && !after_scheme.starts_with(":///")
        }
        _ => true,
    }
}

/// In-memory client table.
///
/// Membership checks take the read lock; registration and redirect URI
/// appends take the write lock.
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, RegisteredClient>>,
    auto_register: bool,
}

impl ClientRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(auto_register: bool) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            auto_register,
        }
    }

    /// Register a client with a fresh random id and secret.
    ///
    /// `redirect_uris` must already be validated and non-empty.
    pub fn register(&self, redirect_uris: Vec<String>, client_name: Option<String>) -> RegisteredClient {
        let client = RegisteredClient {
            client_id: generate_token(),
            client_secret: generate_token(),
            redirect_uris: redirect_uris.into_iter().collect(),
            client_name,
            created_at: Utc::now(),
        };

        info!(client_id = %client.client_id, name = ?client.client_name, "Registered OAuth client");
        self.clients
            .write()
            .insert(client.client_id.clone(), client.clone());
        client
    }

    /// Look up a client by id.
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<RegisteredClient> {
        self.clients.read().get(client_id).cloned()
    }

    /// Resolve the client for an authorize request, auto-registering it or
    /// appending the redirect URI when allowed.
    pub fn resolve_or_auto_register(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<RegisteredClient, ResolveError> {
        if !is_valid_redirect_uri(redirect_uri) {
            return Err(ResolveError::InvalidRedirectUri(redirect_uri.to_string()));
        }

        {
            let clients = self.clients.read();
            if let Some(client) = clients.get(client_id) {
                if client.redirect_uris.contains(redirect_uri) {
                    return Ok(client.clone());
                }
            }
        }

        let mut clients = self.clients.write();
        match clients.get_mut(client_id) {
            Some(client) => {
                if !client.redirect_uris.contains(redirect_uri) {
                    if !self.auto_register {
                        return Err(ResolveError::RedirectUriNotRegistered);
                    }
                    info!(client_id = %client_id, redirect_uri = %redirect_uri, "Added redirect URI to client");
                    client.redirect_uris.insert(redirect_uri.to_string());
                }
                Ok(client.clone())
            }
            None => {
                if !self.auto_register {
                    return Err(ResolveError::UnknownClient);
                }
                let client = RegisteredClient {
                    client_id: client_id.to_string(),
                    client_secret: String::new(),
                    redirect_uris: BTreeSet::from([redirect_uri.to_string()]),
                    client_name: None,
                    created_at: Utc::now(),
                };
                info!(client_id = %client_id, redirect_uri = %redirect_uri, "Auto-registered OAuth client");
                clients.insert(client_id.to_string(), client.clone());
                Ok(client)
            }
        }
    }

    /// Number of known clients
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// `true` if no client is known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_issues_unique_credentials() {
        let registry = ClientRegistry::new(true);
        let a = registry.register(vec!["https://a.example/cb".to_string()], None);
        let b = registry.register(vec!["https://a.example/cb".to_string()], None);

        assert_ne!(a.client_id, b.client_id);
        assert_ne!(a.client_secret, b.client_secret);
        assert!(a.is_confidential());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(&a.client_id), Some(a));
    }

    #[test]
    fn auto_registers_unknown_client() {
        // GIVEN: an empty registry with auto-registration on
        let registry = ClientRegistry::new(true);

        // WHEN: an unseen client id authorizes
        let client = registry
            .resolve_or_auto_register("NEW", "https://a/cb")
            .unwrap();

        // THEN: NEW is now a public client bound to that redirect URI
        assert_eq!(client.client_id, "NEW");
        assert!(!client.is_confidential());
        let stored = registry.get("NEW").unwrap();
        assert!(stored.redirect_uris.contains("https://a/cb"));
    }

    #[test]
    fn appends_unseen_redirect_uri() {
        let registry = ClientRegistry::new(true);
        let client = registry.register(vec!["https://a.example/cb".to_string()], None);

        registry
            .resolve_or_auto_register(&client.client_id, "http://localhost:3000/cb")
            .unwrap();

        let stored = registry.get(&client.client_id).unwrap();
        assert_eq!(stored.redirect_uris.len(), 2);
    }

    #[test]
    fn strict_mode_rejects_unknown_and_unregistered() {
        let registry = ClientRegistry::new(false);
        assert_eq!(
            registry.resolve_or_auto_register("NEW", "https://a/cb"),
            Err(ResolveError::UnknownClient)
        );

        let client = registry.register(vec!["https://a.example/cb".to_string()], None);
        assert_eq!(
            registry.resolve_or_auto_register(&client.client_id, "https://evil.example/cb"),
            Err(ResolveError::RedirectUriNotRegistered)
        );
        assert!(
            registry
                .resolve_or_auto_register(&client.client_id, "https://a.example/cb")
                .is_ok()
        );
    }

    #[test]
    fn rejects_relative_redirect_uri() {
        let registry = ClientRegistry::new(true);
        assert!(matches!(
            registry.resolve_or_auto_register("NEW", "/cb"),
            Err(ResolveError::InvalidRedirectUri(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn redirect_uri_validation() {
        assert!(is_valid_redirect_uri("https://client.example/cb"));
        assert!(is_valid_redirect_uri("http://127.0.0.1:33418/callback"));
        assert!(is_valid_redirect_uri("cursor://anysphere.cursor-mcp/oauth/callback"));
        assert!(!is_valid_redirect_uri("not a url"));
        assert!(!is_valid_redirect_uri("https://client.example/cb#frag"));
        assert!(!is_valid_redirect_uri("https:///nohost"));
        assert!(!is_valid_redirect_uri("http:///127.0.0.1/cb"));
        assert!(is_valid_redirect_uri("myapp:///callback"));
    }

    #[test]
    fn secret_matching() {
        let registry = ClientRegistry::new(true);
        let confidential = registry.register(vec!["https://a.example/cb".to_string()], None);
        assert!(confidential.secret_matches(&confidential.client_secret));
        assert!(!confidential.secret_matches("wrong"));

        let public = registry.resolve_or_auto_register("pub", "https://a/cb").unwrap();
        assert!(!public.secret_matches(""));
    }
}
