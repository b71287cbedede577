use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{Config, AUTH_TIMEOUT_SECS, TOKEN_LIFETIME_SECS, TOKEN_REFRESH_MARGIN_SECS};
use crate::error::{AppError, Result};

/// Performs one credentials → bearer token exchange.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self) -> Result<String>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OAuth2 client-credentials grant against the marketplace auth server.
pub struct ClientCredentials {
    client: reqwest::Client,
    auth_url: String,
    client_id: String,
    client_secret: String,
}

impl ClientCredentials {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(AUTH_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            auth_url: cfg.auth_url.clone(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
        })
    }
}

#[async_trait]
impl TokenExchange for ClientCredentials {
    async fn exchange(&self) -> Result<String> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let resp = self
            .client
            .post(&self.auth_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Auth(format!("token endpoint returned {status}")));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Auth(format!("token response unreadable: {e}")))?;
        Ok(body.access_token)
    }
}

/// Cached bearer token.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub value: String,
    pub issued_at: Instant,
    pub lifetime: Duration,
}

impl AuthToken {
    fn is_fresh(&self, margin: Duration) -> bool {
        self.issued_at.elapsed() < self.lifetime.saturating_sub(margin)
    }
}

/// Hands out the upstream bearer token, refreshing it shortly before expiry.
///
/// The cache lives behind an async mutex that is held across the exchange, so
/// callers arriving during a refresh wait for it and reuse its result instead
/// of starting their own.
pub struct TokenManager {
    exchange: Arc<dyn TokenExchange>,
    lifetime: Duration,
    refresh_margin: Duration,
    cache: Mutex<Option<AuthToken>>,
}

impl TokenManager {
    pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
        Self::with_lifetime(
            exchange,
            Duration::from_secs(TOKEN_LIFETIME_SECS),
            Duration::from_secs(TOKEN_REFRESH_MARGIN_SECS),
        )
    }

    pub fn with_lifetime(exchange: Arc<dyn TokenExchange>, lifetime: Duration, refresh_margin: Duration) -> Self {
        Self {
            exchange,
            lifetime,
            refresh_margin,
            cache: Mutex::new(None),
        }
    }

    /// Return the cached token, exchanging credentials for a new one when the
    /// cache is empty or within the refresh margin of expiry. Exchange
    /// failures propagate; the caller decides when to retry.
    pub async fn get_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref() {
            if token.is_fresh(self.refresh_margin) {
                return Ok(token.value.clone());
            }
            debug!("Bearer token near expiry, refreshing");
        }

        // Stamp before the request so network latency eats into our margin, not past it.
        let issued_at = Instant::now();
        let value = self.exchange.exchange().await?;
        *cache = Some(AuthToken {
            value: value.clone(),
            issued_at,
            lifetime: self.lifetime,
        });
        info!("Acquired new bearer token");
        Ok(value)
    }

    /// Forget the cached token so the next call performs a fresh exchange.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    pub async fn has_fresh_token(&self) -> bool {
        self.cache
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| t.is_fresh(self.refresh_margin))
    }
}
