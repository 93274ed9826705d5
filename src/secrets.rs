//! Secret store lookups
//!
//! The provider credentials JSON can live in the system keychain or in an
//! environment variable instead of a file on disk. A reference names one
//! secret:
//!
//! - `{keychain.SERVICE}` - macOS Keychain or Linux secret-tool
//! - `{env.VAR}` - environment variable

#[cfg(any(target_os = "macos", target_os = "linux"))]
use std::process::Command;

use crate::{Error, Result};

/// A parsed secret store reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretRef {
    /// System keychain entry
    Keychain(String),
    /// Environment variable
    Env(String),
}

impl SecretRef {
    /// Parse a `{keychain.X}` / `{env.X}` reference
    ///
    /// # Errors
    ///
    /// Returns a config error if the reference has neither form.
    pub fn parse(reference: &str) -> Result<Self> {
        let inner = reference
            .trim()
            .strip_prefix('{')
            .and_then(|r| r.strip_suffix('}'))
            .ok_or_else(|| Error::Config(format!("Invalid secret reference: {reference}")))?;

        if let Some(service) = inner.strip_prefix("keychain.") {
            if !service.is_empty() {
                return Ok(Self::Keychain(service.to_string()));
            }
        } else if let Some(var) = inner.strip_prefix("env.") {
            if !var.is_empty() {
                return Ok(Self::Env(var.to_string()));
            }
        }

        Err(Error::Config(format!("Invalid secret reference: {reference}")))
    }
}

/// Fetch the secret a reference points to.
///
/// Keychain lookups spawn a subprocess, so callers on the async runtime should
/// run this inside `spawn_blocking`.
///
/// # Errors
///
/// Returns a config error if the reference is malformed, the variable is unset,
/// or the keychain has no such entry.
pub fn fetch(reference: &str) -> Result<String> {
    match SecretRef::parse(reference)? {
        SecretRef::Env(var) => match std::env::var(&var) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(Error::Config(format!("Environment variable '{var}' is not set"))),
        },
        SecretRef::Keychain(service) => fetch_from_keychain(&service),
    }
}

/// Fetch a secret from the system keychain (macOS)
#[cfg(target_os = "macos")]
fn fetch_from_keychain(service: &str) -> Result<String> {
    let output = Command::new("security")
        .args(["find-generic-password", "-s", service, "-w"])
        .output()
        .map_err(|e| Error::Config(format!("Failed to access macOS Keychain: {e}")))?;

    if output.status.success() {
        non_empty(service, &output.stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::warn!(service = service, error = %stderr, "Keychain lookup failed");
        Err(Error::Config(format!(
            "Keychain entry '{service}' not found. Add it with:\n  \
            security add-generic-password -s '{service}' -a 'contacts-oauth-proxy' -w \"$(cat credentials.json)\""
        )))
    }
}

/// Fetch a secret from the system keychain (Linux)
#[cfg(target_os = "linux")]
fn fetch_from_keychain(service: &str) -> Result<String> {
    let output = Command::new("secret-tool")
        .args(["lookup", "service", service])
        .output()
        .map_err(|e| {
            Error::Config(format!(
                "Failed to access Linux secret service: {e}. Is libsecret installed?"
            ))
        })?;

    if output.status.success() {
        non_empty(service, &output.stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::warn!(service = service, error = %stderr, "Secret service lookup failed");
        Err(Error::Config(format!(
            "Secret service entry for '{service}' not found. Add it with:\n  \
            secret-tool store --label='Contacts OAuth proxy' service {service} < credentials.json"
        )))
    }
}

/// Fetch from keychain (unsupported platforms)
#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn fetch_from_keychain(_service: &str) -> Result<String> {
    Err(Error::Config(
        "Keychain access is only supported on macOS and Linux. Use {env.VAR} instead."
            .to_string(),
    ))
}

#[cfg(any(target_os = "macos", target_os = "linux"))]
fn non_empty(service: &str, stdout: &[u8]) -> Result<String> {
    let secret = String::from_utf8_lossy(stdout).trim().to_string();
    if secret.is_empty() {
        Err(Error::Config(format!("Keychain entry '{service}' is empty")))
    } else {
        Ok(secret)
    }
}
