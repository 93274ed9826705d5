//! Credential Loader
//!
//! Lazily loads the identity provider's client id/secret the first time a
//! request needs them, then serves the cached value without further I/O.
//! Concurrent first callers share one load. A failed load is not cached, so
//! the next request retries (operators can fix the secret without a restart).

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{CredentialSource, expand_home};
use crate::{Error, Result, secrets};

/// The proxy's own client registration at the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderClient {
    /// Client id issued by the provider
    pub client_id: String,
    /// Client secret issued by the provider
    pub client_secret: String,
    /// Scopes requested at the provider consent page
    pub scopes: Vec<String>,
    /// Always this proxy's own `/oauth/callback`
    pub redirect_uri: String,
}

/// Shapes accepted for the credentials JSON: the provider console download
/// (`{"web": {...}}` or `{"installed": {...}}`) or a flat object.
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    web: Option<ClientSection>,
    installed: Option<ClientSection>,
    #[serde(flatten)]
    flat: Option<ClientSection>,
}

#[derive(Debug, Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    scopes: Vec<String>,
}

/// Parse a credentials document and pin the redirect URI to this proxy.
///
/// # Errors
///
/// Returns a config error if the JSON is malformed or lacks a client id/secret.
pub fn parse_credentials(
    json: &str,
    default_scopes: &[String],
    redirect_uri: &str,
) -> Result<ProviderClient> {
    let file: CredentialsFile = serde_json::from_str(json)
        .map_err(|e| Error::Config(format!("Invalid provider credentials JSON: {e}")))?;

    let section = file
        .web
        .or(file.installed)
        .or(file.flat)
        .ok_or_else(|| Error::Config("Provider credentials lack client_id/client_secret".to_string()))?;

    if section.client_id.is_empty() || section.client_secret.is_empty() {
        return Err(Error::Config(
            "Provider credentials have an empty client_id or client_secret".to_string(),
        ));
    }

    let scopes = if section.scopes.is_empty() {
        default_scopes.to_vec()
    } else {
        section.scopes
    };

    Ok(ProviderClient {
        client_id: section.client_id,
        client_secret: section.client_secret,
        scopes,
        redirect_uri: redirect_uri.to_string(),
    })
}

/// Once-initialized, lock-guarded provider client configuration.
///
/// Passed by `Arc` to every component that talks to the provider, so tests
/// can hand in a [`preloaded`](CredentialLoader::preloaded) value.
pub struct CredentialLoader {
    source: CredentialSource,
    default_scopes: Vec<String>,
    redirect_uri: String,
    cell: OnceCell<Arc<ProviderClient>>,
}

impl CredentialLoader {
    /// Create a loader that reads from `source` on first use.
    #[must_use]
    pub fn new(source: CredentialSource, default_scopes: Vec<String>, redirect_uri: String) -> Self {
        Self {
            source,
            default_scopes,
            redirect_uri,
            cell: OnceCell::new(),
        }
    }

    /// Create a loader that already holds its value.
    #[must_use]
    pub fn preloaded(client: ProviderClient) -> Self {
        Self {
            source: CredentialSource::default(),
            default_scopes: client.scopes.clone(),
            redirect_uri: client.redirect_uri.clone(),
            cell: OnceCell::new_with(Some(Arc::new(client))),
        }
    }

    /// Get the provider client, loading it on first call.
    ///
    /// # Errors
    ///
    /// Returns a config error if no source is configured or every configured
    /// source is unreadable or unparsable.
    pub async fn load(&self) -> Result<Arc<ProviderClient>> {
        self.cell
            .get_or_try_init(|| async {
                let json = self.read_source().await?;
                let client = parse_credentials(&json, &self.default_scopes, &self.redirect_uri)?;
                info!(client_id = %client.client_id, "Loaded provider credentials");
                Ok(Arc::new(client))
            })
            .await
            .cloned()
    }

    /// Secret store first, then the credentials file.
    async fn read_source(&self) -> Result<String> {
        if let Some(reference) = self.source.secret.clone() {
            let lookup = tokio::task::spawn_blocking(move || secrets::fetch(&reference))
                .await
                .map_err(|e| Error::Internal(format!("Secret lookup task failed: {e}")))?;
            match lookup {
                Ok(json) => {
                    debug!("Provider credentials read from secret store");
                    return Ok(json);
                }
                Err(e) => {
                    warn!(error = %e, "Secret store lookup failed, falling back to credentials file");
                }
            }
        }

        let Some(file) = self.source.file.as_deref() else {
            return Err(Error::Config(
                "No usable provider credential source (set provider.credentials.secret or provider.credentials.file)"
                    .to_string(),
            ));
        };

        let path = expand_home(file);
        let json = tokio::fs::read_to_string(Path::new(&path))
            .await
            .map_err(|e| Error::Config(format!("Failed to read credentials file {path}: {e}")))?;
        debug!(path = %path, "Provider credentials read from file");
        Ok(json)
    }
}
