//! Short-lived flow records: pending authorizations and issued codes.
//!
//! Both tables share one shape: a random key mapping to a record that is
//! valid for a fixed TTL and can be consumed exactly once. The [`FlowStore`]
//! trait abstracts over storage backends so a multi-replica deployment can
//! swap in a networked key-value store keyed identically. The only current
//! implementation is [`InMemoryFlowStore`], backed by a `DashMap`.
//!
//! # Single use
//!
//! [`FlowStore::take`] removes the entry and checks its age under the shard
//! lock of the same `DashMap::remove` call, so two concurrent redemptions of
//! one key see exactly one success. An expired entry is removed and reported
//! as absent whether or not the reaper has run.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngExt;
use tokio::task::JoinHandle;
use tracing::debug;

use super::upstream::UpstreamToken;

/// A record with a creation time
pub trait Expiring: Send + Sync + 'static {
    /// When the record was created
    fn created_at(&self) -> DateTime<Utc>;

    /// `true` once the record is older than `ttl`
    fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at());
        chrono::Duration::from_std(ttl).is_ok_and(|ttl| age > ttl)
    }
}

/// A pending `/oauth/authorize` request, keyed by the internal state token.
#[derive(Debug, Clone)]
pub struct AuthorizationState {
    /// Client that started the authorization
    pub client_id: String,
    /// Where the user agent goes once the code is minted
    pub redirect_uri: String,
    /// PKCE challenge (empty if the client sent none)
    pub code_challenge: String,
    /// PKCE method as sent by the client
    pub code_challenge_method: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Expiring for AuthorizationState {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// An issued authorization code, keyed by the code value.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    /// Client the code was issued to
    pub client_id: String,
    /// Redirect URI the code was delivered to
    pub redirect_uri: String,
    /// PKCE challenge (empty if the client sent none)
    pub code_challenge: String,
    /// PKCE method as sent by the client
    pub code_challenge_method: Option<String>,
    /// Provider token obtained at `/oauth/callback`
    pub upstream_token: UpstreamToken,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl AuthorizationCode {
    /// Bind a freshly exchanged provider token to a consumed state
    #[must_use]
    pub fn from_state(state: AuthorizationState, upstream_token: UpstreamToken) -> Self {
        Self {
            client_id: state.client_id,
            redirect_uri: state.redirect_uri,
            code_challenge: state.code_challenge,
            code_challenge_method: state.code_challenge_method,
            upstream_token,
            created_at: Utc::now(),
        }
    }
}

impl Expiring for AuthorizationCode {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Trait abstracting the flow record storage backend.
#[async_trait::async_trait]
pub trait FlowStore<V: Expiring>: Send + Sync + 'static {
    /// Insert a record under `key`.
    async fn insert(&self, key: String, value: V);

    /// Atomically remove and return the record for `key`.
    ///
    /// Returns `None` if the key is unknown, already consumed, or expired.
    async fn take(&self, key: &str) -> Option<V>;

    /// Remove all expired records. Called periodically by the reaper.
    async fn reap_expired(&self) -> usize;

    /// Number of records currently held (expired ones included).
    async fn len(&self) -> usize;
}

/// In-memory flow store backed by a `DashMap`.
pub struct InMemoryFlowStore<V> {
    entries: DashMap<String, V>,
    ttl: Duration,
}

impl<V: Expiring> InMemoryFlowStore<V> {
    /// Create an empty store whose records live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }
}

#[async_trait::async_trait]
impl<V: Expiring> FlowStore<V> for InMemoryFlowStore<V> {
    async fn insert(&self, key: String, value: V) {
        self.entries.insert(key, value);
    }

    async fn take(&self, key: &str) -> Option<V> {
        let (_, value) = self.entries.remove(key)?;
        if value.is_expired(self.ttl, Utc::now()) {
            debug!("Discarded expired flow record");
            return None;
        }
        Some(value)
    }

    async fn reap_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired(self.ttl, now));
        before.saturating_sub(self.entries.len())
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Generate a cryptographically random opaque key (state token, code, client id).
///
/// 256 bits of entropy, URL-safe base64 without padding. The alphabet is
/// `[A-Za-z0-9_-]`, so the value never needs escaping in a query string.
#[must_use]
pub fn generate_token() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Spawn a background task that purges expired states and codes every `interval`.
///
/// The task exits when the `shutdown` receiver fires; the returned handle lets
/// the server wait for it.
pub fn spawn_reaper(
    states: Arc<dyn FlowStore<AuthorizationState>>,
    codes: Arc<dyn FlowStore<AuthorizationCode>>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let states_reaped = states.reap_expired().await;
                    let codes_reaped = codes.reap_expired().await;
                    if states_reaped + codes_reaped > 0 {
                        debug!(states = states_reaped, codes = codes_reaped, "Reaped expired flow records");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Flow reaper shutting down");
                    break;
                }
            }
        }
    })
}
