//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authorization-server behaviour
    pub oauth: OAuthConfig,
    /// Upstream identity provider
    pub provider: ProviderConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (CONTACTS_PROXY_ prefix)
        figment = figment.merge(Env::prefixed("CONTACTS_PROXY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` patterns in provider settings
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        let provider = &mut self.provider;
        for value in [
            &mut provider.authorization_endpoint,
            &mut provider.token_endpoint,
            &mut provider.userinfo_endpoint,
        ] {
            *value = expand_string(&re, value);
        }
        if let Some(file) = provider.credentials.file.as_mut() {
            *file = expand_string(&re, file);
        }
        if let Some(url) = self.server.public_url.as_mut() {
            *url = expand_string(&re, url);
        }
        Ok(())
    }
}

/// Expand environment variables in a string
fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Expand a leading `~` to the user's home directory
#[must_use]
pub fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Externally visible base URL (issuer, callback and metadata URLs derive from it)
    pub public_url: Option<String>,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            public_url: None,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Base URL of this deployment, without a trailing slash
    #[must_use]
    pub fn base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

/// Authorization-server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Lifetime of a pending authorization (state token)
    #[serde(with = "humantime_serde")]
    pub state_ttl: Duration,
    /// Lifetime of an issued authorization code
    #[serde(with = "humantime_serde")]
    pub code_ttl: Duration,
    /// How often the reaper purges expired states and codes
    #[serde(with = "humantime_serde")]
    pub reaper_interval: Duration,
    /// Register unknown `client_id`s on their first `/oauth/authorize`.
    ///
    /// Disable for strict RFC 7591 behaviour: only clients obtained from
    /// `/oauth/register` may then start an authorization.
    pub auto_register: bool,
    /// Path prefix of the protected API
    pub resource_path: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl: Duration::from_secs(600),
            code_ttl: Duration::from_secs(600),
            reaper_interval: Duration::from_secs(60),
            auto_register: true,
            resource_path: "/api".to_string(),
        }
    }
}

/// Upstream identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider consent page
    pub authorization_endpoint: String,
    /// Provider token endpoint (code exchange and refresh)
    pub token_endpoint: String,
    /// Provider userinfo endpoint (used by the protected API)
    pub userinfo_endpoint: String,
    /// Scopes requested when the credentials file does not list any
    pub scopes: Vec<String>,
    /// Where the provider client id/secret come from
    pub credentials: CredentialSource,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            authorization_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_endpoint: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "https://www.googleapis.com/auth/contacts".to_string(),
            ],
            credentials: CredentialSource::default(),
        }
    }
}

/// Provider credential sources, tried in order: secret store, then file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CredentialSource {
    /// Secret store reference holding the credentials JSON
    /// (`{keychain.SERVICE}` or `{env.VAR}`)
    pub secret: Option<String>,
    /// Path to a credentials JSON file (supports ~)
    pub file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_flow_lifetimes() {
        let config = Config::default();
        assert_eq!(config.oauth.state_ttl, Duration::from_secs(600));
        assert_eq!(config.oauth.code_ttl, Duration::from_secs(600));
        assert_eq!(config.oauth.reaper_interval, Duration::from_secs(60));
        assert!(config.oauth.auto_register);
    }

    #[test]
    fn base_url_falls_back_to_bind_address() {
        let server = ServerConfig::default();
        assert_eq!(server.base_url(), "http://127.0.0.1:8080");

        let server = ServerConfig {
            public_url: Some("https://contacts.example.com/".to_string()),
            ..ServerConfig::default()
        };
        assert_eq!(server.base_url(), "https://contacts.example.com");
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/proxy.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_yaml_with_humantime_durations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.yaml");
        std::fs::write(
            &path,
            r"
server:
  port: 9999
  public_url: https://proxy.example
oauth:
  state_ttl: 5m
  auto_register: false
provider:
  credentials:
    file: /etc/proxy/credentials.json
",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.oauth.state_ttl, Duration::from_secs(300));
        assert!(!config.oauth.auto_register);
        assert_eq!(
            config.provider.credentials.file.as_deref(),
            Some("/etc/proxy/credentials.json")
        );
    }

    #[test]
    fn expand_string_uses_default() {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        let out = expand_string(&re, "${CONTACTS_PROXY_TEST_UNSET_VAR:-fallback}/token");
        assert_eq!(out, "fallback/token");
    }
}
