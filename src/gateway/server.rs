//! Proxy server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::create_router;
use crate::config::Config;
use crate::oauth::{CredentialLoader, HttpUpstream, ProxyState, callback_url, spawn_reaper};
use crate::{Error, Result};

/// OAuth proxy server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared endpoint state
    state: ProxyState,
    /// Provider credentials, loaded on first use
    credentials: Arc<CredentialLoader>,
}

impl Gateway {
    /// Create a new gateway
    ///
    /// # Errors
    ///
    /// Returns an error if the outbound HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let base_url = config.server.base_url();
        let credentials = Arc::new(CredentialLoader::new(
            config.provider.credentials.clone(),
            config.provider.scopes.clone(),
            callback_url(&base_url),
        ));

        let http_client = reqwest::Client::builder()
            .timeout(config.server.request_timeout)
            .build()?;
        let upstream = Arc::new(HttpUpstream::new(
            http_client,
            config.provider.clone(),
            Arc::clone(&credentials),
        ));

        let state = ProxyState::new(&config, upstream);

        Ok(Self {
            config,
            state,
            credentials,
        })
    }

    /// Provider credential loader
    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialLoader> {
        &self.credentials
    }

    /// Run the gateway until Ctrl-C or SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        // Create shutdown channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let reaper = spawn_reaper(
            Arc::clone(&self.state.states),
            Arc::clone(&self.state.codes),
            self.config.oauth.reaper_interval,
            shutdown_tx.subscribe(),
        );

        let app = create_router(self.state.clone(), self.config.server.request_timeout);
        let listener = TcpListener::bind(addr).await?;

        let base = &self.state.base_url;
        info!("============================================================");
        info!("CONTACTS OAUTH PROXY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(issuer = %base, "Authorization server:");
        info!("  GET  {base}/.well-known/oauth-authorization-server");
        info!("  GET  {base}/.well-known/oauth-protected-resource");
        info!("  POST {base}/oauth/register");
        info!("  GET  {base}/oauth/authorize");
        info!("  GET  {base}/oauth/callback  (register this at the provider)");
        info!("  POST {base}/oauth/token");
        info!("Protected API:");
        info!("  GET  {base}{}/userinfo", self.state.resource_path);
        if self.config.oauth.auto_register {
            warn!("AUTO-REGISTRATION enabled - unknown client_ids are registered on first authorize");
        }
        info!("============================================================");

        // Run server with graceful shutdown
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
            .await
            .map_err(|e| Error::Internal(e.to_string()));

        // A server error never reaches the signal handler
        let _ = shutdown_tx.send(());
        if tokio::time::timeout(self.config.server.shutdown_timeout, reaper)
            .await
            .is_err()
        {
            warn!("Reaper did not stop within the shutdown timeout");
        }

        served
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
