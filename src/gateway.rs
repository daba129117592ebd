//! Admission and gateway-key lookup for incoming tool calls.
//!
//! Identity, key storage and rate limiting are collaborators behind traits.
//! The in-process implementations here are enough for a single-user bridge
//! and for tests; a hosted deployment plugs in its own.

use std::collections::HashMap;
use std::env;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::{AppError, Result};

/// Keychain service name used by [`KeyringKeyStore::default`].
pub const KEYRING_SERVICE: &str = "tool-bridge";

/// Boxed future returned by [`GatewayKeyStore`].
pub type KeyFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;

/// Validates caller credentials and maps them to user ids.
pub trait IdentityProvider: Send + Sync {
    /// Whether `token` is a currently valid credential.
    fn validate_auth_token(&self, token: &str) -> bool;

    /// User id the credential belongs to.
    fn extract_user_id(&self, credential: &str) -> Option<String>;
}

/// Source of per-user gateway keys.
pub trait GatewayKeyStore: Send + Sync {
    /// Gateway key for `user_id`, `Ok(None)` if none is stored.
    ///
    /// # Errors
    ///
    /// Implementation-defined lookup failure.
    fn read_gateway_key<'a>(&'a self, user_id: &'a str) -> KeyFuture<'a>;
}

/// Admission throttle keyed by user id.
pub trait RateLimiter: Send + Sync {
    /// Record one call for `key`; `false` means deny.
    fn allow(&self, key: &str) -> bool;
}

/// Fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    users: HashMap<String, String>,
}

impl StaticIdentityProvider {
    /// Empty table; every token is rejected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `user_id`.
    #[must_use]
    pub fn with_user(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.users.insert(token.into(), user_id.into());
        self
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn validate_auth_token(&self, token: &str) -> bool {
        !token.is_empty() && self.users.contains_key(token)
    }

    fn extract_user_id(&self, credential: &str) -> Option<String> {
        self.users.get(credential).cloned()
    }
}

/// In-memory key table.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    keys: HashMap<String, String>,
}

impl MemoryKeyStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `key` for `user_id`.
    #[must_use]
    pub fn with_key(mut self, user_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert(user_id.into(), key.into());
        self
    }
}

impl GatewayKeyStore for MemoryKeyStore {
    fn read_gateway_key<'a>(&'a self, user_id: &'a str) -> KeyFuture<'a> {
        let key = self.keys.get(user_id).cloned();
        Box::pin(async move { Ok(key) })
    }
}

/// OS keychain lookup (one entry per user id) with an optional environment
/// variable fallback.
#[derive(Debug, Clone)]
pub struct KeyringKeyStore {
    service: String,
    env_fallback: Option<String>,
}

impl KeyringKeyStore {
    /// Look keys up under keychain `service`.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            env_fallback: None,
        }
    }

    /// Fall back to environment variable `var` when the keychain has no
    /// usable entry.
    #[must_use]
    pub fn with_env_fallback(mut self, var: impl Into<String>) -> Self {
        self.env_fallback = Some(var.into());
        self
    }
}

impl Default for KeyringKeyStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl GatewayKeyStore for KeyringKeyStore {
    fn read_gateway_key<'a>(&'a self, user_id: &'a str) -> KeyFuture<'a> {
        Box::pin(async move {
            let service = self.service.clone();
            let user = user_id.to_owned();

            // keyring does synchronous I/O.
            let lookup = tokio::task::spawn_blocking(move || {
                keyring::Entry::new(&service, &user).and_then(|entry| entry.get_password())
            })
            .await
            .map_err(|err| AppError::Io(format!("keychain task panicked: {err}")))?;

            match lookup {
                Ok(value) if !value.is_empty() => return Ok(Some(value)),
                Ok(_) => warn!(user_id, "keychain entry is empty"),
                Err(keyring::Error::NoEntry) => debug!(user_id, "no keychain entry"),
                Err(err) => warn!(user_id, ?err, "keychain lookup failed"),
            }

            Ok(self
                .env_fallback
                .as_deref()
                .and_then(|var| env::var(var).ok())
                .filter(|value| !value.is_empty()))
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Key count at which expired windows are first pruned.
const PRUNE_AT: usize = 1024;

#[derive(Debug)]
struct Windows {
    by_key: HashMap<String, Window>,
    prune_at: usize,
}

impl Windows {
    /// Drop every window that has run out, then move the next prune point
    /// past the live keys so pruning stays amortised.
    fn prune(&mut self, now: Instant, length: Duration) {
        self.by_key
            .retain(|_, window| now.duration_since(window.started) < length);
        self.prune_at = PRUNE_AT.max(self.by_key.len() * 2);
        debug!(live = self.by_key.len(), "rate limiter: pruned expired windows");
    }
}

/// Allows `limit` calls per key in each fixed window.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<Windows>,
}

impl FixedWindowRateLimiter {
    /// `limit` calls per `window`.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(Windows {
                by_key: HashMap::new(),
                prune_at: PRUNE_AT,
            }),
        }
    }

    /// Build from the `[rate_limit]` config section.
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.calls_per_window,
            Duration::from_secs(config.window_seconds),
        )
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if windows.by_key.len() >= windows.prune_at {
            windows.prune(now, self.window);
        }
        let entry = windows.by_key.entry(key.to_owned()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }
}

/// Front door for tool calls: who is calling, may they call now, and which
/// gateway key their explore sub-agent should use.
#[derive(Clone)]
pub struct Gateway {
    identity: Arc<dyn IdentityProvider>,
    keys: Arc<dyn GatewayKeyStore>,
    limiter: Arc<dyn RateLimiter>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

impl Gateway {
    /// Assemble a gateway from its collaborators.
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        keys: Arc<dyn GatewayKeyStore>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            identity,
            keys,
            limiter,
        }
    }

    /// Authenticate `credential` and charge one call to its user.
    ///
    /// # Errors
    ///
    /// - [`AppError::Unauthorized`] if the token is invalid or names no user.
    /// - [`AppError::RateLimited`] if the user is over the limit.
    pub fn admit(&self, credential: &str) -> Result<String> {
        if !self.identity.validate_auth_token(credential) {
            warn!("gateway: invalid credential rejected");
            return Err(AppError::Unauthorized("invalid credential".into()));
        }
        let user_id = self.identity.extract_user_id(credential).ok_or_else(|| {
            AppError::Unauthorized("credential does not identify a user".into())
        })?;
        if !self.limiter.allow(&user_id) {
            warn!(user_id = %user_id, "gateway: rate limit exceeded");
            return Err(AppError::RateLimited(format!(
                "too many calls for user {user_id}"
            )));
        }
        debug!(user_id = %user_id, "gateway: call admitted");
        Ok(user_id)
    }

    /// Gateway key for `user_id`.
    ///
    /// # Errors
    ///
    /// - [`AppError::MissingGatewayKey`] if none is stored.
    /// - Whatever the key store reports on lookup failure.
    pub async fn gateway_key(&self, user_id: &str) -> Result<String> {
        self.keys
            .read_gateway_key(user_id)
            .await?
            .ok_or_else(|| AppError::MissingGatewayKey(format!("no gateway key for user {user_id}")))
    }
}
