//! Contacts OAuth Proxy Library
//!
//! OAuth 2.1 authorization server that fronts an upstream identity provider,
//! so tool-calling clients speaking a generic OAuth flow can reach a contacts
//! API without ever seeing the provider's own client credentials.
//!
//! # Features
//!
//! - **Dynamic client registration**: RFC 7591, plus optional auto-registration
//! - **Upstream bridge**: authorize/callback round trip to the provider
//! - **Token endpoint**: `authorization_code` (PKCE S256) and `refresh_token` grants
//! - **Bearer validation**: middleware for the protected API with RFC 9728 challenges
//! - **Discovery**: RFC 8414 and RFC 9728 metadata documents
//! - **Housekeeping**: cancellable reaper for expired states and codes

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod secrets;

pub use error::{Error, OAuthError, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`. `format` of `json` selects
/// structured output; anything else is plain text.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
