//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// OAuth 2.1 authorization-server proxy for the contacts API
#[derive(Parser, Debug)]
#[command(name = "contacts-oauth-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CONTACTS_PROXY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CONTACTS_PROXY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "CONTACTS_PROXY_HOST")]
    pub host: Option<String>,

    /// Externally visible base URL (defaults to http://HOST:PORT)
    #[arg(long, env = "CONTACTS_PROXY_PUBLIC_URL", global = true)]
    pub public_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CONTACTS_PROXY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CONTACTS_PROXY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy server (default)
    Serve,

    /// Load the provider credentials and report what was found
    CheckCredentials,

    /// Print the S256 PKCE challenge for a code verifier
    PkceChallenge {
        /// Code verifier
        #[arg(required = true)]
        verifier: String,
    },
}
