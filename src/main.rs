//! Contacts OAuth Proxy
//!
//! OAuth 2.1 authorization server brokering an upstream identity provider.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use contacts_oauth_proxy::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    oauth::pkce,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Handle subcommands
    match cli.command {
        Some(Command::PkceChallenge { ref verifier }) => {
            println!("{}", pkce::s256_challenge(verifier));
            ExitCode::SUCCESS
        }
        Some(Command::CheckCredentials) => run_check_credentials(&cli).await,
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host.clone_from(host);
            }
            if let Some(ref public_url) = cli.public_url {
                config.server.public_url = Some(public_url.clone());
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Load the provider credentials once and report them (never the secret)
async fn run_check_credentials(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    match gateway.credentials().load().await {
        Ok(client) => {
            println!("✅ Provider credentials loaded");
            println!("   Client ID:    {}", client.client_id);
            println!("   Redirect URI: {}", client.redirect_uri);
            println!("   Scopes:       {}", client.scopes.join(" "));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        base_url = %config.server.base_url(),
        auto_register = config.oauth.auto_register,
        "Starting Contacts OAuth Proxy"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
